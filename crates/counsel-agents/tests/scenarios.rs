//! End-to-end evaluation scenarios.
//!
//! Each test ingests filing excerpts into an in-memory store, then runs the
//! counsel with scenario analysts over real retrieval output.

use std::sync::Arc;
use std::time::Duration;

use counsel_agents::test_support::{KeywordAnalyst, ScriptedAnalyst};
use counsel_agents::{AgentError, AnalysisAgent, Counsel, PriceFeed, RetrievalPlanner, StubPriceFeed};
use counsel_models::{
    AgentsConfig, AgreementLevel, AnalystOutput, DebateLevel, NewChunk, PriceContext,
    PriceFeedConfig, Recommendation, RetrievalConfig,
};
use counsel_store::{DocumentIndex, Ingestor, SqliteDocumentIndex, SqliteStore, TickerQuarterIndex};
use rust_decimal_macros::dec;

fn filing(ticker: &str, year: i32, quarter: u8, text: &str) -> NewChunk {
    NewChunk {
        chunk_id: None,
        ticker: ticker.to_string(),
        fiscal_year: year,
        quarter,
        text: text.to_string(),
    }
}

struct Fixture {
    planner: Arc<RetrievalPlanner>,
    ingestor: Ingestor,
}

fn fixture(chunks: Vec<NewChunk>) -> Fixture {
    let store = SqliteStore::open_in_memory().unwrap().into_shared();
    let quarters = Arc::new(TickerQuarterIndex::new());
    let index = Arc::new(SqliteDocumentIndex::new(
        store.clone(),
        100,
        Duration::from_secs(60),
    ));
    let ingestor = Ingestor::new(store, quarters.clone(), index.clone());
    ingestor.ingest(chunks).unwrap();
    let planner = Arc::new(RetrievalPlanner::new(
        index as Arc<dyn DocumentIndex>,
        quarters,
        Duration::from_secs(5),
    ));
    Fixture { planner, ingestor }
}

fn agents_config(timeout_seconds: u64) -> AgentsConfig {
    AgentsConfig {
        agent_timeout_seconds: timeout_seconds,
        ..AgentsConfig::default()
    }
}

fn counsel_with_rounds(
    fixture: &Fixture,
    analysts: Vec<Arc<dyn AnalysisAgent>>,
    debate_rounds: u32,
) -> Counsel {
    let config = AgentsConfig {
        debate_rounds,
        ..agents_config(30)
    };
    Counsel::new(
        analysts,
        fixture.planner.clone(),
        no_quotes(),
        &config,
        RetrievalConfig::default(),
    )
}

fn counsel(
    fixture: &Fixture,
    analysts: Vec<Arc<dyn AnalysisAgent>>,
    price_feed: Arc<dyn PriceFeed>,
    timeout_seconds: u64,
) -> Counsel {
    Counsel::new(
        analysts,
        fixture.planner.clone(),
        price_feed,
        &agents_config(timeout_seconds),
        RetrievalConfig::default(),
    )
}

fn no_quotes() -> Arc<dyn PriceFeed> {
    Arc::new(StubPriceFeed::default())
}

fn growth_filings() -> Vec<NewChunk> {
    vec![
        filing("NVDA", 2025, 1, "Data center revenue grew to a record 39.1 billion."),
        filing("NVDA", 2025, 1, "Gross margin expanded on Hopper demand."),
        filing("NVDA", 2025, 2, "Revenue grew 69 percent and beat guidance."),
        filing("NVDA", 2025, 2, "Networking revenue increased sequentially."),
        filing("NVDA", 2025, 3, "Blackwell shipments grew; another record quarter."),
        filing("NVDA", 2025, 3, "Gaming revenue declined slightly on supply."),
        filing("NVDA", 2024, 4, "Automotive revenue grew 103 percent."),
    ]
}

#[tokio::test]
async fn unanimous_buy_on_growth_filings() {
    let fx = fixture(growth_filings());
    let analysts: Vec<Arc<dyn AnalysisAgent>> = vec![
        Arc::new(KeywordAnalyst::new("socrates")),
        Arc::new(KeywordAnalyst::new("pythagoras").with_focus("cash flow and margin")),
        Arc::new(KeywordAnalyst::new("diogenes")),
    ];

    let evaluation = counsel(&fx, analysts, no_quotes(), 30)
        .evaluate("nvda", None)
        .await
        .unwrap();

    assert_eq!(evaluation.ticker, "NVDA");
    assert_eq!(evaluation.consensus.final_recommendation, Recommendation::Buy);
    assert_eq!(evaluation.consensus.vote_tally.count(Recommendation::Buy), 3);
    assert!(!evaluation.consensus.degraded);
    assert!(evaluation.guaranteed_context);
    assert_eq!(evaluation.chunks_retrieved, 7);
    assert_eq!(evaluation.query, AgentsConfig::default().default_query);
    assert!(evaluation.consensus.contributing_rationale.starts_with("[socrates]"));
}

#[tokio::test]
async fn orcl_never_sees_googl_chunks() {
    let fx = fixture(vec![
        filing("ORCL", 2025, 1, "Oracle cloud infrastructure revenue grew 49 percent."),
        filing("ORCL", 2025, 2, "Remaining performance obligations reached a record."),
        filing("GOOGL", 2025, 1, "Google Cloud revenue grew 28 percent; cloud backlog grew."),
        filing("GOOGL", 2025, 2, "Cloud infrastructure revenue grew with AI demand."),
    ]);
    let recorder = Arc::new(ScriptedAnalyst::voting(
        "socrates",
        Recommendation::Hold,
        "Cloud growth offset by capex",
    ));

    let evaluation = counsel(&fx, vec![recorder.clone() as Arc<dyn AnalysisAgent>], no_quotes(), 30)
        .evaluate("ORCL", Some("cloud infrastructure revenue growth"))
        .await
        .unwrap();

    let requests = recorder.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].chunks.len(), 2);
    assert!(requests[0].chunks.iter().all(|c| c.ticker == "ORCL"));
    assert_eq!(evaluation.chunks_retrieved, 2);
}

#[tokio::test]
async fn newest_quarters_lead_the_context() {
    let fx = fixture(growth_filings());
    let recorder = Arc::new(ScriptedAnalyst::voting("socrates", Recommendation::Buy, "ok"));

    counsel(&fx, vec![recorder.clone() as Arc<dyn AnalysisAgent>], no_quotes(), 30)
        .evaluate("NVDA", Some("revenue"))
        .await
        .unwrap();

    let requests = recorder.requests();
    let chunks = &requests[0].chunks;
    let leading: Vec<String> = chunks.iter().take(3).map(|c| c.quarter.label()).collect();
    assert_eq!(leading, vec!["Q3 2025", "Q2 2025", "Q1 2025"]);
    let mut ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), chunks.len());
}

#[tokio::test]
async fn failed_analyst_degrades_consensus() {
    let fx = fixture(growth_filings());
    let analysts: Vec<Arc<dyn AnalysisAgent>> = vec![
        Arc::new(ScriptedAnalyst::voting("socrates", Recommendation::Buy, "Demand strong")),
        Arc::new(ScriptedAnalyst::failing("pythagoras", "claude exited 1")),
        Arc::new(ScriptedAnalyst::voting("diogenes", Recommendation::Buy, "Margins up")),
    ];

    let evaluation = counsel(&fx, analysts, no_quotes(), 30)
        .evaluate("NVDA", None)
        .await
        .unwrap();

    let c = &evaluation.consensus;
    assert_eq!(c.final_recommendation, Recommendation::Buy);
    assert!(c.degraded);
    assert_eq!(c.dispatched, 3);
    assert_eq!(c.participating_agents, vec!["socrates", "diogenes"]);
    assert_eq!(
        c.contributing_rationale,
        "[socrates] Demand strong\n\n[diogenes] Margins up"
    );

    let failed = &evaluation.verdicts[1];
    assert_eq!(failed.agent_id, "pythagoras");
    assert!(!failed.valid);
    assert!(failed.error.as_deref().unwrap().contains("claude exited 1"));
    assert!(evaluation.headline().contains("degraded"));
}

#[tokio::test]
async fn slow_and_panicking_analysts_are_invalid() {
    let fx = fixture(growth_filings());
    let analysts: Vec<Arc<dyn AnalysisAgent>> = vec![
        Arc::new(ScriptedAnalyst::stalling("socrates", Duration::from_secs(10))),
        Arc::new(ScriptedAnalyst::panicking("pythagoras")),
        Arc::new(ScriptedAnalyst::voting("diogenes", Recommendation::Sell, "Valuation stretched")),
    ];

    let evaluation = counsel(&fx, analysts, no_quotes(), 1)
        .evaluate("NVDA", None)
        .await
        .unwrap();

    let ids: Vec<&str> = evaluation.verdicts.iter().map(|v| v.agent_id.as_str()).collect();
    assert_eq!(ids, vec!["socrates", "pythagoras", "diogenes"]);
    assert!(evaluation.verdicts[0]
        .error
        .as_deref()
        .unwrap()
        .contains("timed out"));
    assert!(!evaluation.verdicts[1].valid);
    assert_eq!(evaluation.consensus.final_recommendation, Recommendation::Sell);
    assert!(evaluation.consensus.degraded);
}

#[tokio::test]
async fn schema_violations_do_not_vote() {
    let fx = fixture(growth_filings());
    let analysts: Vec<Arc<dyn AnalysisAgent>> = vec![
        Arc::new(ScriptedAnalyst::answering(
            "socrates",
            AnalystOutput {
                stock: Some("AMD".to_string()),
                recommendation: Some("BUY".to_string()),
                rationale: Some("wrong company".to_string()),
                ..Default::default()
            },
        )),
        Arc::new(ScriptedAnalyst::answering(
            "pythagoras",
            AnalystOutput {
                recommendation: Some("STRONG BUY".to_string()),
                rationale: Some("very bullish".to_string()),
                ..Default::default()
            },
        )),
        Arc::new(ScriptedAnalyst::voting("diogenes", Recommendation::Hold, "Fairly priced")),
    ];

    let evaluation = counsel(&fx, analysts, no_quotes(), 30)
        .evaluate("NVDA", None)
        .await
        .unwrap();

    assert_eq!(evaluation.consensus.final_recommendation, Recommendation::Hold);
    assert_eq!(evaluation.consensus.participating_agents, vec!["diogenes"]);
    assert!(evaluation.verdicts[0].error.as_deref().unwrap().contains("AMD"));
}

#[tokio::test]
async fn every_analyst_failing_is_insufficient_data() {
    let fx = fixture(growth_filings());
    let analysts: Vec<Arc<dyn AnalysisAgent>> = vec![
        Arc::new(ScriptedAnalyst::failing("socrates", "down")),
        Arc::new(ScriptedAnalyst::failing("pythagoras", "down")),
    ];

    let err = counsel(&fx, analysts, no_quotes(), 30)
        .evaluate("NVDA", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::InsufficientData(_)));
}

#[tokio::test]
async fn unknown_ticker_is_not_found() {
    let fx = fixture(growth_filings());
    let recorder = Arc::new(ScriptedAnalyst::voting("socrates", Recommendation::Buy, "x"));

    let err = counsel(&fx, vec![recorder.clone() as Arc<dyn AnalysisAgent>], no_quotes(), 30)
        .evaluate("TSLA", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::NotFound(ref t) if t == "TSLA"));
    assert!(recorder.requests().is_empty());
}

#[tokio::test]
async fn price_context_reaches_analysts() {
    let fx = fixture(growth_filings());
    let mut quotes = PriceFeedConfig::default();
    quotes.quotes.insert(
        "NVDA".to_string(),
        PriceContext {
            last_price: Some(dec!(181.20)),
            pe_ratio: Some(dec!(52.4)),
            ..Default::default()
        },
    );
    let recorder = Arc::new(ScriptedAnalyst::voting("socrates", Recommendation::Hold, "x"));

    let evaluation = counsel(
        &fx,
        vec![recorder.clone() as Arc<dyn AnalysisAgent>],
        Arc::new(StubPriceFeed::new(&quotes)),
        30,
    )
    .evaluate("NVDA", None)
    .await
    .unwrap();

    let price = evaluation.price_context.unwrap();
    assert_eq!(price.last_price, Some(dec!(181.20)));
    assert_eq!(
        recorder.requests()[0].price_context.as_ref().unwrap().pe_ratio,
        Some(dec!(52.4))
    );
}

#[tokio::test]
async fn new_filings_are_visible_after_ingest() {
    let fx = fixture(growth_filings());
    let recorder = Arc::new(ScriptedAnalyst::voting("socrates", Recommendation::Buy, "x"));
    let c = counsel(&fx, vec![recorder.clone() as Arc<dyn AnalysisAgent>], no_quotes(), 30);

    c.evaluate("NVDA", Some("revenue")).await.unwrap();
    fx.ingestor
        .ingest(vec![filing("NVDA", 2025, 4, "Revenue grew to 57 billion.")])
        .unwrap();
    c.evaluate("NVDA", Some("revenue")).await.unwrap();

    let requests = recorder.requests();
    let second = &requests[1];
    assert_eq!(second.chunks[0].quarter.label(), "Q4 2025");
}

#[tokio::test]
async fn consensus_is_deterministic_across_runs() {
    let fx = fixture(growth_filings());
    let build = || -> Vec<Arc<dyn AnalysisAgent>> {
        vec![
            Arc::new(KeywordAnalyst::new("diogenes")),
            Arc::new(KeywordAnalyst::new("socrates")),
            Arc::new(KeywordAnalyst::new("pythagoras").with_margin(50)),
        ]
    };

    let first = counsel(&fx, build(), no_quotes(), 30)
        .evaluate("NVDA", Some("revenue"))
        .await
        .unwrap();
    let second = counsel(&fx, build(), no_quotes(), 30)
        .evaluate("NVDA", Some("revenue"))
        .await
        .unwrap();

    assert_eq!(first.consensus.contributing_rationale, second.consensus.contributing_rationale);
    assert_eq!(first.consensus.vote_tally, second.consensus.vote_tally);
}

#[tokio::test]
async fn buy_against_sell_gets_a_follow_up_round() {
    let fx = fixture(growth_filings());
    let socrates = Arc::new(ScriptedAnalyst::voting("socrates", Recommendation::Buy, "Demand strong"));
    let pythagoras = Arc::new(ScriptedAnalyst::voting("pythagoras", Recommendation::Buy, "Cash rich"));
    let diogenes = Arc::new(ScriptedAnalyst::conceding(
        "diogenes",
        Recommendation::Sell,
        Recommendation::Buy,
    ));
    let analysts: Vec<Arc<dyn AnalysisAgent>> = vec![
        socrates.clone() as Arc<dyn AnalysisAgent>,
        pythagoras.clone() as Arc<dyn AnalysisAgent>,
        diogenes.clone() as Arc<dyn AnalysisAgent>,
    ];

    let evaluation = counsel_with_rounds(&fx, analysts, 1)
        .evaluate("NVDA", None)
        .await
        .unwrap();

    let c = &evaluation.consensus;
    assert_eq!(c.final_recommendation, Recommendation::Buy);
    assert_eq!(c.vote_tally.count(Recommendation::Buy), 3);
    assert_eq!(c.agreement.level, AgreementLevel::Unanimous);
    assert!(!c.agreement.debate_warranted);

    let debate = evaluation.debate.as_ref().unwrap();
    assert_eq!(debate.rounds, 1);
    assert_eq!(debate.opening_verdicts[2].recommendation, Recommendation::Sell);
    assert_eq!(debate.position_changes.len(), 1);
    let change = &debate.position_changes[0];
    assert_eq!(change.agent_id, "diogenes");
    assert_eq!((change.from, change.to), (Recommendation::Sell, Recommendation::Buy));

    // The follow-up reuses the opening excerpts and shows the other two positions.
    let asked = diogenes.requests();
    assert_eq!(asked.len(), 2);
    assert_eq!(asked[1].chunks, asked[0].chunks);
    let peers: Vec<&str> = asked[1].peer_positions.iter().map(|p| p.agent_id.as_str()).collect();
    assert_eq!(peers, vec!["socrates", "pythagoras"]);
    assert_eq!(socrates.requests().len(), 2);
}

#[tokio::test]
async fn split_panel_stays_split_after_bounded_rounds() {
    let fx = fixture(growth_filings());
    let socrates = Arc::new(ScriptedAnalyst::voting("socrates", Recommendation::Buy, "Growth"));
    let analysts: Vec<Arc<dyn AnalysisAgent>> = vec![
        socrates.clone() as Arc<dyn AnalysisAgent>,
        Arc::new(ScriptedAnalyst::voting("pythagoras", Recommendation::Hold, "Fair")),
        Arc::new(ScriptedAnalyst::voting("diogenes", Recommendation::Sell, "Dear")),
    ];

    let evaluation = counsel_with_rounds(&fx, analysts, 2)
        .evaluate("NVDA", None)
        .await
        .unwrap();

    let c = &evaluation.consensus;
    assert_eq!(c.final_recommendation, Recommendation::Hold);
    assert_eq!(c.agreement.level, AgreementLevel::Split);
    assert_eq!(c.agreement.debate_level, DebateLevel::Large);
    assert_eq!(c.agreement.dissenting_agents, vec!["socrates", "diogenes"]);
    let debate = evaluation.debate.as_ref().unwrap();
    assert_eq!(debate.rounds, 2);
    assert!(debate.position_changes.is_empty());
    assert_eq!(socrates.requests().len(), 3);
    assert!(evaluation.headline().contains("split panel"));
}

#[tokio::test]
async fn follow_up_rounds_can_be_disabled() {
    let fx = fixture(growth_filings());
    let diogenes = Arc::new(ScriptedAnalyst::conceding(
        "diogenes",
        Recommendation::Sell,
        Recommendation::Buy,
    ));
    let analysts: Vec<Arc<dyn AnalysisAgent>> = vec![
        Arc::new(ScriptedAnalyst::voting("socrates", Recommendation::Buy, "Growth")),
        diogenes.clone() as Arc<dyn AnalysisAgent>,
    ];

    let evaluation = counsel_with_rounds(&fx, analysts, 0)
        .evaluate("NVDA", None)
        .await
        .unwrap();

    assert_eq!(evaluation.consensus.final_recommendation, Recommendation::Hold);
    assert!(evaluation.consensus.agreement.debate_warranted);
    assert!(evaluation.debate.is_none());
    assert_eq!(diogenes.requests().len(), 1);
}

#[tokio::test]
async fn steadfast_dissent_leaves_the_majority_standing() {
    let fx = fixture(growth_filings());
    let analysts: Vec<Arc<dyn AnalysisAgent>> = vec![
        Arc::new(ScriptedAnalyst::voting("socrates", Recommendation::Buy, "Growth")),
        Arc::new(ScriptedAnalyst::voting("pythagoras", Recommendation::Buy, "Cash")),
        Arc::new(ScriptedAnalyst::answering(
            "diogenes",
            AnalystOutput {
                recommendation: Some("SELL".to_string()),
                rationale: Some("Dear".to_string()),
                ..Default::default()
            },
        )),
    ];

    let evaluation = counsel_with_rounds(&fx, analysts, 1)
        .evaluate("NVDA", None)
        .await
        .unwrap();

    let c = &evaluation.consensus;
    assert_eq!(c.final_recommendation, Recommendation::Buy);
    assert_eq!(c.agreement.dissenting_agents, vec!["diogenes"]);
    assert!(c.agreement.debate_warranted);
    assert_eq!(evaluation.debate.as_ref().unwrap().rounds, 1);
    assert_eq!(evaluation.verdicts[2].recommendation, Recommendation::Sell);
}
