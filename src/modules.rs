//! Analytical modules consulted once per cycle.
//!
//! The set of module kinds is closed and resolved at construction; the
//! orchestrator only decides per cycle which of them the profile lets vote.
//! Risk is the exception: it always runs.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::deliberation::{DeliberationEngine, TraceVerdict};
use crate::orchestrator::MarketTick;
use crate::signals::ModuleKind;

#[async_trait]
pub trait AnalyticalModule: Send + Sync {
    fn kind(&self) -> ModuleKind;
    /// Raw record; the orchestrator parses it into a typed signal.
    async fn evaluate(&self, tick: &MarketTick) -> Result<Value>;
}

#[derive(Clone)]
pub struct ModuleSet {
    quant: Option<Arc<dyn AnalyticalModule>>,
    sentiment: Option<Arc<dyn AnalyticalModule>>,
    hybrid: Option<Arc<dyn AnalyticalModule>>,
    risk: Arc<dyn AnalyticalModule>,
}

impl ModuleSet {
    /// A set always carries a risk module.
    pub fn new(risk: Arc<dyn AnalyticalModule>) -> Self {
        Self { quant: None, sentiment: None, hybrid: None, risk }
    }

    /// Install a module in the slot matching its kind.
    pub fn with(mut self, module: Arc<dyn AnalyticalModule>) -> Self {
        match module.kind() {
            ModuleKind::Quant => self.quant = Some(module),
            ModuleKind::Sentiment => self.sentiment = Some(module),
            ModuleKind::Hybrid => self.hybrid = Some(module),
            ModuleKind::Risk => self.risk = module,
        }
        self
    }

    pub fn get(&self, kind: ModuleKind) -> Option<Arc<dyn AnalyticalModule>> {
        match kind {
            ModuleKind::Quant => self.quant.clone(),
            ModuleKind::Sentiment => self.sentiment.clone(),
            ModuleKind::Hybrid => self.hybrid.clone(),
            ModuleKind::Risk => Some(Arc::clone(&self.risk)),
        }
    }
}

// =============================================================================
// Built-in risk precheck
// =============================================================================

/// Blocks when the account is over-levered or too deep in drawdown.
#[derive(Debug, Clone)]
pub struct RiskPrecheck {
    pub max_leverage: f64,
    pub max_drawdown_pct: f64,
}

impl Default for RiskPrecheck {
    fn default() -> Self {
        Self { max_leverage: 3.0, max_drawdown_pct: 0.15 }
    }
}

fn account_field(features: &Value, key: &str, default: f64) -> f64 {
    match features.get("account").and_then(|a| a.get(key)) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(f64::NAN),
        Some(Value::Null) | None => default,
        Some(_) => f64::NAN,
    }
}

#[async_trait]
impl AnalyticalModule for RiskPrecheck {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Risk
    }

    async fn evaluate(&self, tick: &MarketTick) -> Result<Value> {
        let leverage = account_field(&tick.features, "leverage", 1.0);
        let drawdown = account_field(&tick.features, "drawdown_pct", 0.0);
        if !leverage.is_finite() || !drawdown.is_finite() {
            return Err(anyhow!("account state unreadable"));
        }
        if leverage > self.max_leverage {
            return Ok(json!({
                "status": "BLOCK",
                "reason": format!("Leverage {}x exceeds {}x", leverage, self.max_leverage)
            }));
        }
        if drawdown > self.max_drawdown_pct {
            return Ok(json!({
                "status": "BLOCK",
                "reason": format!("Drawdown {:.1}% exceeds {:.1}%", drawdown * 100.0, self.max_drawdown_pct * 100.0)
            }));
        }
        Ok(json!({"status": "ALLOW", "reason": "Within risk limits"}))
    }
}

// =============================================================================
// Deliberation as the hybrid module
// =============================================================================

/// Runs a structured deliberation over the tick features and reports its
/// verdict as the hybrid vote.
pub struct DeliberationModule {
    engine: Arc<DeliberationEngine>,
    hypothesis: String,
}

impl DeliberationModule {
    pub fn new(engine: Arc<DeliberationEngine>, hypothesis: &str) -> Self {
        Self { engine, hypothesis: hypothesis.to_string() }
    }
}

#[async_trait]
impl AnalyticalModule for DeliberationModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Hybrid
    }

    /// Deliberation is synchronous and writes the audit trail, so it runs on
    /// the blocking pool where the caller's deadline can still fire.
    async fn evaluate(&self, tick: &MarketTick) -> Result<Value> {
        let engine = Arc::clone(&self.engine);
        let hypothesis = self.hypothesis.clone();
        let features = tick.features.clone();
        let context_id = tick.context_id.clone();
        let trace = tokio::task::spawn_blocking(move || engine.deliberate(&hypothesis, &features, &context_id))
            .await
            .map_err(|e| anyhow!("deliberation task failed: {}", e))?;
        if trace.final_verdict == TraceVerdict::Error {
            return Err(anyhow!(
                "deliberation {} failed: {}",
                trace.trace_id,
                trace.veto_reason.unwrap_or_default()
            ));
        }
        Ok(json!({
            "final_verdict": trace.final_verdict.as_str(),
            "final_score": trace.final_score,
            "trace_id": trace.trace_id,
        }))
    }
}
