use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use counsel::models::{ApprovalPrompt, CounselConfig, NewChunk, TradeAction};
use counsel::trade::{seek_approval, ApprovalChannel, Ledger, TradeError};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config/counsel.toml";

#[derive(Parser, Debug)]
#[command(name = "counsel", about = "Grounded stock verdicts and human-gated trades")]
struct Cli {
    /// Path to configuration file (defaults to config/counsel.toml when present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest already-chunked filing text from a JSON array
    Ingest {
        /// JSON file of `{chunk_id?, ticker, fiscal_year, quarter, text}` objects
        file: String,
    },
    /// Ask the analysts about a ticker and print the evaluation
    Analyze {
        ticker: String,
        /// What to ask (defaults to the configured query)
        #[arg(short, long)]
        query: Option<String>,
        /// Ignore any stored evaluation and run the analysts again
        #[arg(long)]
        refresh: bool,
        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Propose a trade and ask for approval on stdin
    Trade {
        #[arg(value_enum)]
        side: Side,
        ticker: String,
        #[arg(long)]
        quantity: Decimal,
        #[arg(long)]
        price: Decimal,
    },
    /// Manage the cash balance
    Cash {
        #[command(subcommand)]
        action: CashCommand,
    },
    /// Show open positions at average cost
    Portfolio {
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CashCommand {
    Deposit { amount: Decimal },
    Withdraw { amount: Decimal },
    Balance,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Side {
    Buy,
    Sell,
}

impl From<Side> for TradeAction {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => TradeAction::Buy,
            Side::Sell => TradeAction::Sell,
        }
    }
}

/// Prints the prompt on stderr and reads one answer line from stdin.
struct StdinApprovalChannel;

#[async_trait]
impl ApprovalChannel for StdinApprovalChannel {
    async fn request(&self, prompt: &ApprovalPrompt) -> Result<bool, TradeError> {
        eprint!("{prompt}\nApprove? [y/N] ");
        let _ = std::io::stderr().flush();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        match lines.next_line().await {
            Ok(Some(answer)) => Ok(is_yes(&answer)),
            Ok(None) => Err(TradeError::ChannelClosed),
            Err(e) => {
                warn!(error = %e, "Failed to read approval answer");
                Err(TradeError::ChannelClosed)
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "approve"
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing (respects RUST_LOG env var)
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }

    let config = match &cli.config {
        Some(path) => counsel::load_config(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => counsel::load_config(DEFAULT_CONFIG)?,
        None => CounselConfig::default(),
    };

    match cli.command {
        Command::Ingest { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read input: {file}"))?;
            let chunks: Vec<NewChunk> =
                serde_json::from_str(&raw).context("Failed to parse chunk JSON")?;
            let research = counsel::build_research(&config)?;
            let report = research.ingestor.ingest(chunks).context("Ingestion failed")?;
            print_json(&serde_json::to_value(&report)?, false)?;
        }
        Command::Analyze {
            ticker,
            query,
            refresh,
            pretty,
        } => {
            let research = counsel::build_research(&config)?;
            let evaluation = counsel::analyze(&research, &ticker, query.as_deref(), refresh)
                .await
                .context("Evaluation failed")?;
            print_json(&serde_json::to_value(&evaluation)?, pretty)?;
        }
        Command::Trade {
            side,
            ticker,
            quantity,
            price,
        } => {
            let trading = counsel::build_trading(&config)?;
            let proposal = trading
                .machine
                .propose(&ticker, side.into(), quantity, price)
                .context("Trade proposal refused")?;
            let done = seek_approval(&trading.machine, proposal.proposal_id, &StdinApprovalChannel)
                .await
                .context("Approval failed")?;
            print_json(&serde_json::to_value(&done)?, true)?;
        }
        Command::Cash { action } => {
            let trading = counsel::build_trading(&config)?;
            let balance = match action {
                CashCommand::Deposit { amount } => trading.ledger.deposit(amount)?,
                CashCommand::Withdraw { amount } => trading.ledger.withdraw(amount)?,
                CashCommand::Balance => trading.ledger.current_cash()?,
            };
            print_json(&serde_json::json!({ "cash": balance }), false)?;
        }
        Command::Portfolio { pretty } => {
            let trading = counsel::build_trading(&config)?;
            let snapshot = trading.ledger.portfolio()?;
            print_json(&serde_json::to_value(&snapshot)?, pretty)?;
        }
    }

    Ok(())
}

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}
