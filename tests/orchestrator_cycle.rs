use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tempfile::TempDir;

use tradecouncil::audit::MemoryAudit;
use tradecouncil::deliberation::{
    Assessment, DeliberationContext, DeliberationEngine, DeliberationError, PhaseEvaluator, PhaseWeights,
    ReasoningPhase,
};
use tradecouncil::constitution::{OrderConstitution, RestingOrder, Side, VerdictCode};
use tradecouncil::execution::PaperVenue;
use tradecouncil::modules::{AnalyticalModule, DeliberationModule, ModuleSet, RiskPrecheck};
use tradecouncil::orchestrator::{CycleOutcome, DecisionOrchestrator, MarketTick, OrchestratorConfig};
use tradecouncil::profile::store::ProfileStore;
use tradecouncil::profile::GlobalSwitch;
use tradecouncil::signals::ModuleKind;
use tradecouncil::voter::{ConsensusVoter, FinalVerdict, VoterConfig};

enum Behaviour {
    Reply(Value),
    Fail,
    Panic,
    Sleep(Duration),
}

struct Stub {
    kind: ModuleKind,
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl Stub {
    fn new(kind: ModuleKind, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self { kind, behaviour, calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl AnalyticalModule for Stub {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    async fn evaluate(&self, _tick: &MarketTick) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Reply(v) => Ok(v.clone()),
            Behaviour::Fail => Err(anyhow!("upstream unavailable")),
            Behaviour::Panic => panic!("module blew up"),
            Behaviour::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(json!({"signal": "STRONG_BUY"}))
            }
        }
    }
}

fn strong_buy() -> Arc<Stub> {
    Stub::new(ModuleKind::Quant, Behaviour::Reply(json!({"signal": "STRONG_BUY"})))
}

fn bullish() -> Arc<Stub> {
    Stub::new(ModuleKind::Sentiment, Behaviour::Reply(json!({"sentiment": "BULLISH", "score": 0.9})))
}

struct Harness {
    orchestrator: DecisionOrchestrator,
    store: Arc<ProfileStore>,
    venue: Arc<PaperVenue>,
    audit: Arc<MemoryAudit>,
    _dir: TempDir,
}

fn harness(modules: ModuleSet, venue: PaperVenue, active: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ProfileStore::open(dir.path().join("strategy_profile.json")));
    if active {
        let mut p = (*store.snapshot()).clone();
        p.global_switch = GlobalSwitch::Active;
        store.save(p, "test").unwrap();
    }
    let venue = Arc::new(venue);
    let audit = Arc::new(MemoryAudit::default());
    let orchestrator = DecisionOrchestrator::new(
        store.clone(),
        ConsensusVoter::new(VoterConfig::default()),
        Arc::new(OrderConstitution::default()),
        modules,
        venue.clone(),
        audit.clone(),
        OrchestratorConfig { module_timeout: Duration::from_millis(100), order_quantity: dec!(0.01) },
    );
    Harness { orchestrator, store, venue, audit, _dir: dir }
}

fn tick(features: Value) -> MarketTick {
    MarketTick {
        symbol: "BTCUSDT".into(),
        price: dec!(50000),
        volatility: 0.01,
        context_id: "CTX-0001-test".into(),
        features,
    }
}

fn risk() -> Arc<RiskPrecheck> {
    Arc::new(RiskPrecheck::default())
}

#[tokio::test]
async fn actionable_vote_is_validated_and_dispatched() {
    let modules = ModuleSet::new(risk()).with(strong_buy()).with(bullish());
    let h = harness(modules, PaperVenue::default(), true);

    let report = h.orchestrator.run_cycle(tick(json!({}))).await;

    assert!(matches!(report.outcome, CycleOutcome::Dispatched(_)), "{:?}", report.outcome);
    let receipt = report.receipt.unwrap();
    assert_eq!(receipt.final_verdict, FinalVerdict::Buy);
    let sent = h.venue.submitted();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].side, Side::Buy);
    assert_eq!(sent[0].quantity, dec!(0.01));
    assert_eq!(sent[0].price, Some(dec!(50000)));
    assert_eq!(h.audit.receipts().len(), 1);
}

#[tokio::test]
async fn failing_and_panicking_modules_only_lose_their_vote() {
    let modules = ModuleSet::new(risk())
        .with(strong_buy())
        .with(Stub::new(ModuleKind::Sentiment, Behaviour::Panic));
    let h = harness(modules, PaperVenue::default(), true);

    let report = h.orchestrator.run_cycle(tick(json!({}))).await;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, ModuleKind::Sentiment);
    assert!(report.contributed.contains(&ModuleKind::Quant));
    assert!(matches!(report.outcome, CycleOutcome::Dispatched(_)));

    let modules = ModuleSet::new(risk())
        .with(strong_buy())
        .with(Stub::new(ModuleKind::Sentiment, Behaviour::Fail));
    let h = harness(modules, PaperVenue::default(), true);
    let report = h.orchestrator.run_cycle(tick(json!({}))).await;
    assert_eq!(report.failed[0].1, "upstream unavailable");
    assert!(matches!(report.outcome, CycleOutcome::Dispatched(_)));
}

#[tokio::test]
async fn slow_module_times_out() {
    let slow = Stub::new(ModuleKind::Sentiment, Behaviour::Sleep(Duration::from_secs(5)));
    let modules = ModuleSet::new(risk()).with(strong_buy()).with(slow);
    let h = harness(modules, PaperVenue::default(), true);

    let started = std::time::Instant::now();
    let report = h.orchestrator.run_cycle(tick(json!({}))).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("timed out"));
}

#[tokio::test]
async fn malformed_record_is_no_contribution() {
    let modules = ModuleSet::new(risk())
        .with(strong_buy())
        .with(Stub::new(ModuleKind::Sentiment, Behaviour::Reply(json!({"score": "very high"}))));
    let h = harness(modules, PaperVenue::default(), true);
    let report = h.orchestrator.run_cycle(tick(json!({}))).await;
    assert!(report.failed[0].1.starts_with("malformed record"));
    assert!(!report.receipt.unwrap().votes.contains_key("sentiment"));
}

#[tokio::test]
async fn risk_block_holds_without_dispatch() {
    let modules = ModuleSet::new(risk()).with(strong_buy()).with(bullish());
    let h = harness(modules, PaperVenue::default(), true);

    let report = h.orchestrator.run_cycle(tick(json!({"account": {"leverage": 5.0}}))).await;

    assert_eq!(report.outcome, CycleOutcome::Hold);
    let receipt = report.receipt.unwrap();
    assert!(receipt.veto_active);
    assert!(receipt.veto_reason.unwrap().contains("Leverage"));
    assert!(h.venue.submitted().is_empty());
}

#[tokio::test]
async fn missing_risk_answer_holds() {
    let modules = ModuleSet::new(Stub::new(ModuleKind::Risk, Behaviour::Fail)).with(strong_buy());
    let h = harness(modules, PaperVenue::default(), true);
    let report = h.orchestrator.run_cycle(tick(json!({}))).await;
    assert_eq!(report.outcome, CycleOutcome::Hold);
    assert_eq!(report.receipt.unwrap().veto_reason.as_deref(), Some("Risk: precheck unavailable"));
}

#[tokio::test]
async fn paused_profile_votes_but_never_dispatches() {
    let modules = ModuleSet::new(risk()).with(strong_buy()).with(bullish());
    let h = harness(modules, PaperVenue::default(), false);

    let report = h.orchestrator.run_cycle(tick(json!({}))).await;

    assert_eq!(report.outcome, CycleOutcome::Paused);
    assert_eq!(report.receipt.unwrap().final_verdict, FinalVerdict::Buy);
    assert!(h.venue.submitted().is_empty());
    assert_eq!(h.audit.receipts().len(), 1);
}

#[tokio::test]
async fn wash_trade_is_rejected_before_dispatch() {
    let book = vec![RestingOrder { symbol: "BTCUSDT".into(), side: Side::Sell, price: dec!(49000), quantity: dec!(1) }];
    let modules = ModuleSet::new(risk()).with(strong_buy()).with(bullish());
    let h = harness(modules, PaperVenue::with_resting(book), true);

    let report = h.orchestrator.run_cycle(tick(json!({}))).await;

    match report.outcome {
        CycleOutcome::Rejected(v) => assert_eq!(v.code, VerdictCode::WashTradingViolation),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(h.venue.submitted().is_empty());
}

#[tokio::test]
async fn venue_failure_is_reported() {
    let modules = ModuleSet::new(risk()).with(strong_buy()).with(bullish());
    let venue = PaperVenue::default();
    venue.fail_with("exchange maintenance");
    let h = harness(modules, venue, true);

    let report = h.orchestrator.run_cycle(tick(json!({}))).await;
    assert_eq!(report.outcome, CycleOutcome::DispatchFailed("exchange maintenance".to_string()));
}

#[tokio::test]
async fn disabled_modules_are_not_consulted() {
    let hybrid = Stub::new(ModuleKind::Hybrid, Behaviour::Reply(json!({"final_verdict": "STRONG_SELL", "final_score": 1.0})));
    let modules = ModuleSet::new(risk()).with(strong_buy()).with(hybrid.clone());
    let h = harness(modules, PaperVenue::default(), true);

    let report = h.orchestrator.run_cycle(tick(json!({}))).await;

    assert_eq!(hybrid.calls.load(Ordering::SeqCst), 0);
    assert!(!report.contributed.contains(&ModuleKind::Hybrid));
    assert!(report.contributed.contains(&ModuleKind::Risk));
}

/// Blocks the calling thread for `delay` on every phase.
struct SluggishPhases {
    delay: Duration,
}

impl PhaseEvaluator for SluggishPhases {
    fn assess(&self, _phase: ReasoningPhase, _ctx: &DeliberationContext) -> Result<Assessment, DeliberationError> {
        std::thread::sleep(self.delay);
        Ok(Assessment {
            premise: "slow".into(),
            observation: "slow".into(),
            deduction: "slow".into(),
            confidence: 0.9,
        })
    }
}

#[tokio::test]
async fn slow_deliberation_respects_module_deadline() {
    let engine = DeliberationEngine::new(
        Box::new(SluggishPhases { delay: Duration::from_millis(300) }),
        PhaseWeights::default(),
        Arc::new(MemoryAudit::default()),
    )
    .unwrap();
    let hybrid = Arc::new(DeliberationModule::new(Arc::new(engine), "LONG_BREAKOUT"));
    let modules = ModuleSet::new(risk()).with(strong_buy()).with(hybrid);
    let h = harness(modules, PaperVenue::default(), true);
    h.store.update_module_state(ModuleKind::Hybrid, true, Some(1.0)).unwrap();

    let started = std::time::Instant::now();
    let report = h.orchestrator.run_cycle(tick(json!({}))).await;

    assert!(started.elapsed() < Duration::from_millis(900), "cycle took {:?}", started.elapsed());
    assert!(report
        .failed
        .iter()
        .any(|(kind, reason)| *kind == ModuleKind::Hybrid && reason.contains("timed out")));
    assert!(report.contributed.contains(&ModuleKind::Quant));
}

#[tokio::test]
async fn profile_edits_on_disk_apply_next_cycle() {
    let modules = ModuleSet::new(risk()).with(strong_buy()).with(bullish());
    let h = harness(modules, PaperVenue::default(), false);

    let mut edited = (*h.store.snapshot()).clone();
    edited.global_switch = GlobalSwitch::Active;
    std::fs::write(h.store.path(), serde_json::to_string_pretty(&edited).unwrap()).unwrap();

    let report = h.orchestrator.run_cycle(tick(json!({}))).await;

    assert!(matches!(report.outcome, CycleOutcome::Dispatched(_)), "{:?}", report.outcome);
    assert_eq!(h.venue.submitted().len(), 1);
}
