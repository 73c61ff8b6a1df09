//! One decision cycle per market tick.
//!
//! ```text
//! reload profile ───► fan out modules ─► gather ─► vote ─► validate ─► dispatch
//!                     (spawn + timeout)            │          │
//!                                                  └─ HOLD    └─ REJECT
//! ```
//!
//! Each module runs in its own task with its own deadline and owns its
//! output. A panic, error, timeout or malformed record from one module
//! removes only that module's vote. Nothing escapes `run_cycle`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::future::join_all;
use futures_util::FutureExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::AuditSink;
use crate::constitution::{OrderCandidate, OrderConstitution, OrderType, Side, Verdict};
use crate::execution::{ExecutionVenue, OrderAck, OrderRequest};
use crate::logging::{
    log, log_dispatch, log_module_failure, obj, v_num, v_str, Domain, Level, ProfileScope,
};
use crate::modules::{AnalyticalModule, ModuleSet};
use crate::profile::store::ProfileStore;
use crate::signals::{AgentSignal, ModuleKind, SignalSet};
use crate::voter::{ConsensusVoter, FinalVerdict, VoteReceipt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub price: Decimal,
    /// Fractional volatility, e.g. 0.05 for 5%.
    pub volatility: f64,
    pub context_id: String,
    /// Free-form context: macro, technical, order_flow, sentiment, account.
    #[serde(default)]
    pub features: Value,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub module_timeout: Duration,
    pub order_quantity: Decimal,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { module_timeout: Duration::from_millis(2000), order_quantity: Decimal::new(1, 2) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Hold,
    /// Vote was actionable but the global switch is off.
    Paused,
    Rejected(Verdict),
    Dispatched(OrderAck),
    DispatchFailed(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub context_id: String,
    pub receipt: Option<VoteReceipt>,
    pub contributed: Vec<ModuleKind>,
    pub failed: Vec<(ModuleKind, String)>,
    pub outcome: CycleOutcome,
}

pub struct DecisionOrchestrator {
    profiles: Arc<ProfileStore>,
    voter: ConsensusVoter,
    constitution: Arc<OrderConstitution>,
    modules: ModuleSet,
    venue: Arc<dyn ExecutionVenue>,
    audit: Arc<dyn AuditSink>,
    config: OrchestratorConfig,
}

impl DecisionOrchestrator {
    pub fn new(
        profiles: Arc<ProfileStore>,
        voter: ConsensusVoter,
        constitution: Arc<OrderConstitution>,
        modules: ModuleSet,
        venue: Arc<dyn ExecutionVenue>,
        audit: Arc<dyn AuditSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { profiles, voter, constitution, modules, venue, audit, config }
    }

    /// Run one cycle. Never fails; a top-level problem becomes `Failed`.
    pub async fn run_cycle(&self, tick: MarketTick) -> CycleReport {
        let context_id = tick.context_id.clone();
        let _scope = ProfileScope::with_context("cycle", &[("context_id", v_str(&context_id))]);

        let outcome = AssertUnwindSafe(self.cycle(tick)).catch_unwind().await;
        let report = match outcome {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => self.failed(&context_id, e.to_string()),
            Err(_) => self.failed(&context_id, "cycle panicked".to_string()),
        };

        log(
            Level::Info,
            Domain::Cycle,
            "cycle_done",
            obj(&[
                ("context_id", v_str(&report.context_id)),
                ("outcome", v_str(outcome_label(&report.outcome))),
                ("contributed", v_num(report.contributed.len() as f64)),
                ("failed", v_num(report.failed.len() as f64)),
            ]),
        );
        report
    }

    fn failed(&self, context_id: &str, reason: String) -> CycleReport {
        log(
            Level::Error,
            Domain::Cycle,
            "cycle_failed",
            obj(&[("context_id", v_str(context_id)), ("reason", v_str(&reason))]),
        );
        CycleReport {
            context_id: context_id.to_string(),
            receipt: None,
            contributed: vec![],
            failed: vec![],
            outcome: CycleOutcome::Failed(reason),
        }
    }

    async fn cycle(&self, tick: MarketTick) -> Result<CycleReport> {
        // Pick up edits from any external config writer before deciding.
        let profile = self.profiles.reload();
        let tick = Arc::new(tick);

        let mut selected: Vec<(ModuleKind, Arc<dyn AnalyticalModule>)> = Vec::new();
        for kind in ModuleKind::ALL {
            let wanted = kind == ModuleKind::Risk || profile.is_enabled(kind);
            if let Some(module) = self.modules.get(kind).filter(|_| wanted) {
                selected.push((kind, module));
            }
        }

        let (signals, contributed, failed) = self.gather(&tick, selected).await;

        let receipt = self.voter.cast_vote(&tick.context_id, &profile, &signals, tick.volatility);
        self.audit.record_receipt(&receipt);

        let side = match receipt.final_verdict {
            _ if receipt.veto_active => None,
            FinalVerdict::Buy => Some(Side::Buy),
            FinalVerdict::Sell => Some(Side::Sell),
            FinalVerdict::Hold => None,
        };
        let report = |outcome| CycleReport {
            context_id: tick.context_id.clone(),
            receipt: Some(receipt.clone()),
            contributed: contributed.clone(),
            failed: failed.clone(),
            outcome,
        };

        let Some(side) = side else {
            log(
                Level::Info,
                Domain::Cycle,
                "hold",
                obj(&[
                    ("context_id", v_str(&tick.context_id)),
                    ("msg", v_str("Weak Signal")),
                    ("net_score", v_num(receipt.net_score)),
                    ("veto_reason", receipt.veto_reason.as_deref().map(v_str).unwrap_or(Value::Null)),
                ]),
            );
            return Ok(report(CycleOutcome::Hold));
        };

        if profile.is_paused() {
            log(
                Level::Warn,
                Domain::Cycle,
                "paused",
                obj(&[("context_id", v_str(&tick.context_id)), ("side", v_str(side.as_str()))]),
            );
            return Ok(report(CycleOutcome::Paused));
        }

        let candidate = OrderCandidate::limit(
            &tick.symbol,
            side,
            &self.config.order_quantity.to_string(),
            &tick.price.to_string(),
        );
        let resting = self
            .venue
            .open_orders(&tick.symbol)
            .await
            .map_err(|e| anyhow!("open orders unavailable: {}", e))?;
        let verdict = self.constitution.validate(&candidate, &resting);
        if !verdict.valid {
            return Ok(report(CycleOutcome::Rejected(verdict)));
        }

        let request = OrderRequest {
            symbol: tick.symbol.clone(),
            side,
            order_type: OrderType::Limit,
            quantity: self.config.order_quantity,
            price: Some(tick.price),
            client_id: format!("{}-{}", receipt.id, side.as_str()),
        };
        log_dispatch(
            &request.symbol,
            side.as_str(),
            &request.quantity.to_string(),
            &tick.price.to_string(),
            &receipt.id,
        );
        let outcome = match self.venue.submit(request).await {
            Ok(ack) => CycleOutcome::Dispatched(ack),
            Err(e) => {
                log(
                    Level::Error,
                    Domain::Exec,
                    "dispatch_failed",
                    obj(&[("context_id", v_str(&tick.context_id)), ("reason", v_str(&e.to_string()))]),
                );
                CycleOutcome::DispatchFailed(e.to_string())
            }
        };
        Ok(report(outcome))
    }

    /// Launch every selected module in its own task and wait for all of them.
    async fn gather(
        &self,
        tick: &Arc<MarketTick>,
        selected: Vec<(ModuleKind, Arc<dyn AnalyticalModule>)>,
    ) -> (SignalSet, Vec<ModuleKind>, Vec<(ModuleKind, String)>) {
        let deadline = self.config.module_timeout;
        let mut kinds = Vec::with_capacity(selected.len());
        let mut handles = Vec::with_capacity(selected.len());
        for (kind, module) in selected {
            let tick = Arc::clone(tick);
            kinds.push(kind);
            handles.push(tokio::spawn(async move {
                tokio::time::timeout(deadline, module.evaluate(&tick)).await
            }));
        }

        let mut signals = SignalSet::default();
        let mut contributed = Vec::new();
        let mut failed = Vec::new();
        for (kind, joined) in kinds.into_iter().zip(join_all(handles).await) {
            let parsed = match joined {
                Ok(Ok(Ok(raw))) => AgentSignal::parse(kind, &raw)
                    .ok_or_else(|| format!("malformed record: {}", raw)),
                Ok(Ok(Err(e))) => Err(e.to_string()),
                Ok(Err(_)) => Err(format!("timed out after {}ms", deadline.as_millis())),
                Err(e) if e.is_panic() => Err("module panicked".to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(signal) => {
                    signals.insert(signal);
                    contributed.push(kind);
                }
                Err(reason) => {
                    log_module_failure(&tick.context_id, kind.as_str(), &reason);
                    failed.push((kind, reason));
                }
            }
        }
        (signals, contributed, failed)
    }
}

fn outcome_label(outcome: &CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::Hold => "HOLD",
        CycleOutcome::Paused => "PAUSED",
        CycleOutcome::Rejected(_) => "REJECTED",
        CycleOutcome::Dispatched(_) => "DISPATCHED",
        CycleOutcome::DispatchFailed(_) => "DISPATCH_FAILED",
        CycleOutcome::Failed(_) => "FAILED",
    }
}
