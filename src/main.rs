use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};

use tradecouncil::audit::{AuditSink, JsonlAudit};
use tradecouncil::config::Config;
use tradecouncil::constitution::OrderConstitution;
use tradecouncil::deliberation::{DeliberationEngine, MarketPhases};
use tradecouncil::execution::PaperVenue;
use tradecouncil::logging::{log, obj, ts_epoch_ms, v_num, v_str, Domain, Level};
use tradecouncil::modules::{AnalyticalModule, DeliberationModule, ModuleSet};
use tradecouncil::orchestrator::{CycleOutcome, DecisionOrchestrator, MarketTick};
use tradecouncil::profile::store::ProfileStore;
use tradecouncil::signals::ModuleKind;
use tradecouncil::voter::ConsensusVoter;

/// Momentum call from the synthetic order-flow imbalance.
struct FlowQuant;

#[async_trait]
impl AnalyticalModule for FlowQuant {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Quant
    }

    async fn evaluate(&self, tick: &MarketTick) -> Result<Value> {
        let ofi = tick.features["order_flow"]["ofi"].as_f64().unwrap_or(0.0);
        let signal = match ofi {
            x if x > 0.5 => "STRONG_BUY",
            x if x > 0.2 => "BUY",
            x if x < -0.5 => "STRONG_SELL",
            x if x < -0.2 => "SELL",
            _ => "NEUTRAL",
        };
        Ok(json!({"signal": signal, "confidence": ofi.abs().min(1.0)}))
    }
}

/// Echoes the synthetic crowd mood.
struct CrowdSentiment;

#[async_trait]
impl AnalyticalModule for CrowdSentiment {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Sentiment
    }

    async fn evaluate(&self, tick: &MarketTick) -> Result<Value> {
        Ok(tick.features["sentiment"].clone())
    }
}

fn synthetic_tick(symbol: &str, price: &mut f64, cycle: u64) -> MarketTick {
    let mut rng = rand::thread_rng();
    let ret: f64 = rng.gen_range(-0.02..0.02);
    *price *= 1.0 + ret;
    let score: f64 = rng.gen_range(-1.0..1.0);
    let ofi: f64 = rng.gen_range(-1.0..1.0);
    let leverage: f64 = rng.gen_range(0.5..4.0);
    let drawdown: f64 = rng.gen_range(0.0..0.2);
    let (regime, trend) = if ret > 0.0 { ("RISK_ON", "UP") } else { ("NEUTRAL", "DOWN") };
    let mood = if score > 0.0 { "BULLISH" } else { "BEARISH" };
    MarketTick {
        symbol: symbol.to_string(),
        price: Decimal::from_f64(*price).unwrap_or(Decimal::ONE_HUNDRED).round_dp(2),
        volatility: ret.abs() * 3.0,
        context_id: format!("CTX{:05}-{}", cycle, ts_epoch_ms()),
        features: json!({
            "macro": {"regime": regime, "volatility_index": 15.0 + ret.abs() * 1000.0},
            "technical": {"trend": trend, "rsi": 50.0 + ret * 1000.0},
            "order_flow": {"ofi": ofi},
            "sentiment": {"sentiment": mood, "overall": mood, "score": score},
            "account": {"leverage": leverage, "drawdown_pct": drawdown}
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("symbol", v_str(&cfg.symbol)),
            ("profile_path", v_str(&cfg.profile_path)),
            ("cycles", v_num(cfg.cycles as f64)),
        ]),
    );

    let profiles = Arc::new(ProfileStore::open(&cfg.profile_path));
    let audit: Arc<dyn AuditSink> = Arc::new(JsonlAudit::open(&cfg.audit_path)?);
    let engine = Arc::new(DeliberationEngine::with_market_phases(
        MarketPhases { max_leverage: cfg.max_leverage, max_drawdown_pct: cfg.max_drawdown_pct },
        Arc::clone(&audit),
    ));
    let modules = ModuleSet::new(Arc::new(cfg.risk_precheck()))
        .with(Arc::new(FlowQuant))
        .with(Arc::new(CrowdSentiment))
        .with(Arc::new(DeliberationModule::new(engine, "LONG_CONTINUATION")));

    let orchestrator = DecisionOrchestrator::new(
        profiles,
        ConsensusVoter::new(cfg.voter()),
        Arc::new(OrderConstitution::new(cfg.constitution())),
        modules,
        Arc::new(PaperVenue::default()),
        audit,
        cfg.orchestrator(),
    );

    let mut price = 50_000.0;
    let mut cycle = 0u64;
    loop {
        cycle += 1;
        let tick = synthetic_tick(&cfg.symbol, &mut price, cycle);
        let report = orchestrator.run_cycle(tick).await;
        if let CycleOutcome::Failed(reason) = &report.outcome {
            log(Level::Warn, Domain::System, "cycle_failed", obj(&[("reason", v_str(reason))]));
        }
        if cfg.cycles > 0 && cycle >= cfg.cycles {
            break;
        }
        sleep(Duration::from_secs(cfg.tick_secs)).await;
    }

    log(Level::Info, Domain::System, "shutdown", obj(&[("cycles", v_num(cycle as f64))]));
    Ok(())
}
