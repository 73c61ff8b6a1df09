//! Phase-ordered deliberation with fail-fast vetoes.
//!
//! ```text
//! Foundation ──► Tactical ──► Sentiment ──► Risk ──► Synthesis
//!     │                                       │
//!     └── conf < 0.30: REJECTED               └── conf < 0.80: BLOCKED_BY_RISK
//! ```
//!
//! Only Foundation and Risk can stop a hypothesis. Every trace, vetoed or
//! not, is handed to the audit sink once it is final.

pub mod phases;

use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::audit::AuditSink;
use crate::logging::{log_trace_verdict, ts_now};

pub use phases::{DeliberationContext, MarketPhases};

pub const FOUNDATION_VETO_BELOW: f64 = 0.30;
pub const RISK_VETO_BELOW: f64 = 0.80;
pub const STRONG_BUY_AT: f64 = 0.75;
pub const WEAK_BUY_AT: f64 = 0.60;

#[derive(Debug, thiserror::Error)]
pub enum DeliberationError {
    #[error("non-finite value in context field {field}")]
    NonFinite { field: String },
    #[error("phase weight for {phase:?} must be positive, got {weight}")]
    InvalidWeight { phase: ReasoningPhase, weight: f64 },
    #[error("evaluator failed: {0}")]
    Evaluator(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReasoningPhase {
    Foundation,
    Tactical,
    Sentiment,
    Risk,
}

impl ReasoningPhase {
    pub const ORDER: [ReasoningPhase; 4] = [
        ReasoningPhase::Foundation,
        ReasoningPhase::Tactical,
        ReasoningPhase::Sentiment,
        ReasoningPhase::Risk,
    ];

    fn step_id(&self) -> &'static str {
        match self {
            ReasoningPhase::Foundation => "STEP-FND",
            ReasoningPhase::Tactical => "STEP-TAC",
            ReasoningPhase::Sentiment => "STEP-SNT",
            ReasoningPhase::Risk => "STEP-RSK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceVerdict {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "REJECTED")]
    Rejected,
    #[serde(rename = "BLOCKED_BY_RISK")]
    BlockedByRisk,
    #[serde(rename = "STRONG_BUY")]
    StrongBuy,
    #[serde(rename = "WEAK_BUY")]
    WeakBuy,
    #[serde(rename = "HOLD/REJECT")]
    HoldOrReject,
    #[serde(rename = "ERROR")]
    Error,
}

impl TraceVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceVerdict::Pending => "PENDING",
            TraceVerdict::Rejected => "REJECTED",
            TraceVerdict::BlockedByRisk => "BLOCKED_BY_RISK",
            TraceVerdict::StrongBuy => "STRONG_BUY",
            TraceVerdict::WeakBuy => "WEAK_BUY",
            TraceVerdict::HoldOrReject => "HOLD/REJECT",
            TraceVerdict::Error => "ERROR",
        }
    }

    fn from_score(score: f64) -> Self {
        if score >= STRONG_BUY_AT {
            TraceVerdict::StrongBuy
        } else if score >= WEAK_BUY_AT {
            TraceVerdict::WeakBuy
        } else {
            TraceVerdict::HoldOrReject
        }
    }
}

/// What an evaluator concluded about one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub premise: String,
    pub observation: String,
    pub deduction: String,
    pub confidence: f64,
}

/// Grades a single phase against the context.
pub trait PhaseEvaluator: Send + Sync {
    fn assess(&self, phase: ReasoningPhase, ctx: &DeliberationContext) -> Result<Assessment, DeliberationError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub id: String,
    pub phase: ReasoningPhase,
    pub premise: String,
    pub observation: String,
    pub deduction: String,
    pub confidence: f64,
    pub weight: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliberationTrace {
    pub trace_id: String,
    pub context_hash: String,
    pub hypothesis: String,
    pub steps: Vec<ReasoningStep>,
    pub final_verdict: TraceVerdict,
    pub final_score: f64,
    pub veto_triggered: bool,
    pub veto_reason: Option<String>,
}

impl DeliberationTrace {
    fn open(hypothesis: &str, context: &Value, context_id: &str) -> Self {
        Self {
            trace_id: format!("TRC-{:08x}", rand::random::<u32>()),
            context_hash: context_hash(context_id, context),
            hypothesis: hypothesis.to_string(),
            steps: Vec::new(),
            final_verdict: TraceVerdict::Pending,
            final_score: 0.0,
            veto_triggered: false,
            veto_reason: None,
        }
    }

    pub fn phases(&self) -> Vec<ReasoningPhase> {
        self.steps.iter().map(|s| s.phase).collect()
    }

    fn synthesize(&mut self) {
        let (num, den) = self
            .steps
            .iter()
            .fold((0.0, 0.0), |(n, d), s| (n + s.confidence * s.weight, d + s.weight));
        let score = if den > 0.0 { num / den } else { 0.0 };
        self.final_score = round4(score.clamp(0.0, 1.0));
        self.final_verdict = TraceVerdict::from_score(score);
    }

    fn apply_veto(&mut self, veto: Veto) {
        self.veto_triggered = true;
        self.veto_reason = Some(veto.reason);
        self.final_verdict = veto.verdict;
        self.final_score = veto.score;
    }

    fn fail(&mut self, reason: String) {
        self.final_verdict = TraceVerdict::Error;
        self.final_score = 0.0;
        self.veto_reason = Some(reason);
    }
}

/// Terminal early exit from the phase pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Veto {
    pub verdict: TraceVerdict,
    pub score: f64,
    pub reason: String,
}

/// Relative importance of each phase in the synthesis. All must be positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseWeights {
    pub foundation: f64,
    pub tactical: f64,
    pub sentiment: f64,
    pub risk: f64,
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self { foundation: 0.25, tactical: 0.35, sentiment: 0.20, risk: 0.20 }
    }
}

impl PhaseWeights {
    pub fn get(&self, phase: ReasoningPhase) -> f64 {
        match phase {
            ReasoningPhase::Foundation => self.foundation,
            ReasoningPhase::Tactical => self.tactical,
            ReasoningPhase::Sentiment => self.sentiment,
            ReasoningPhase::Risk => self.risk,
        }
    }

    pub fn validate(&self) -> Result<(), DeliberationError> {
        for phase in ReasoningPhase::ORDER {
            let weight = self.get(phase);
            if !(weight.is_finite() && weight > 0.0) {
                return Err(DeliberationError::InvalidWeight { phase, weight });
            }
        }
        Ok(())
    }
}

pub struct DeliberationEngine {
    evaluator: Box<dyn PhaseEvaluator>,
    weights: PhaseWeights,
    audit: Arc<dyn AuditSink>,
}

impl DeliberationEngine {
    pub fn new(
        evaluator: Box<dyn PhaseEvaluator>,
        weights: PhaseWeights,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, DeliberationError> {
        weights.validate()?;
        Ok(Self { evaluator, weights, audit })
    }

    pub fn with_market_phases(phases: MarketPhases, audit: Arc<dyn AuditSink>) -> Self {
        Self { evaluator: Box::new(phases), weights: PhaseWeights::default(), audit }
    }

    /// Run one deliberation session. Never fails: internal errors become an
    /// `ERROR` trace carrying the failure message.
    pub fn deliberate(&self, hypothesis: &str, context: &Value, context_id: &str) -> DeliberationTrace {
        let mut trace = DeliberationTrace::open(hypothesis, context, context_id);
        let ctx = DeliberationContext::from_value(context);

        let mut steps = Vec::with_capacity(ReasoningPhase::ORDER.len());
        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_phases(&ctx, &mut steps)));
        trace.steps = steps;

        match outcome {
            Ok(Ok(ControlFlow::Continue(()))) => trace.synthesize(),
            Ok(Ok(ControlFlow::Break(veto))) => trace.apply_veto(veto),
            Ok(Err(err)) => trace.fail(err.to_string()),
            Err(_) => trace.fail("evaluator panicked".to_string()),
        }

        log_trace_verdict(
            &trace.trace_id,
            &trace.hypothesis,
            trace.final_verdict.as_str(),
            trace.final_score,
            trace.veto_reason.as_deref(),
        );
        self.audit.record_trace(&trace);
        trace
    }

    fn run_phases(
        &self,
        ctx: &DeliberationContext,
        steps: &mut Vec<ReasoningStep>,
    ) -> Result<ControlFlow<Veto>, DeliberationError> {
        let foundation = self.step(ReasoningPhase::Foundation, ctx, steps)?;
        if foundation.confidence < FOUNDATION_VETO_BELOW {
            return Ok(ControlFlow::Break(Veto {
                verdict: TraceVerdict::Rejected,
                score: 0.1,
                reason: format!("Foundation Collapse: {}", foundation.deduction),
            }));
        }

        self.step(ReasoningPhase::Tactical, ctx, steps)?;
        self.step(ReasoningPhase::Sentiment, ctx, steps)?;

        let risk = self.step(ReasoningPhase::Risk, ctx, steps)?;
        if risk.confidence < RISK_VETO_BELOW {
            return Ok(ControlFlow::Break(Veto {
                verdict: TraceVerdict::BlockedByRisk,
                score: 0.0,
                reason: format!("Risk Violation: {}", risk.deduction),
            }));
        }

        Ok(ControlFlow::Continue(()))
    }

    fn step(
        &self,
        phase: ReasoningPhase,
        ctx: &DeliberationContext,
        steps: &mut Vec<ReasoningStep>,
    ) -> Result<ReasoningStep, DeliberationError> {
        let a = self.evaluator.assess(phase, ctx)?;
        if !a.confidence.is_finite() {
            return Err(DeliberationError::Evaluator(format!(
                "{:?} produced non-finite confidence",
                phase
            )));
        }
        let step = ReasoningStep {
            id: phase.step_id().to_string(),
            phase,
            premise: a.premise,
            observation: a.observation,
            deduction: a.deduction,
            confidence: a.confidence.clamp(0.0, 1.0),
            weight: self.weights.get(phase),
            timestamp: ts_now(),
        };
        steps.push(step.clone());
        Ok(step)
    }
}

/// SHA-256 over the context id and the canonical (key-sorted) context JSON.
pub fn context_hash(context_id: &str, context: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(context.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
