//! Weighted consensus over module signals.
//!
//! Order of business for every vote:
//! 1. Resolve weights from the profile snapshot, adjusted for volatility.
//! 2. Risk veto: a BLOCK (or no risk answer at all) ends the vote as HOLD.
//! 3. Weighted mean of the contributing module scores.
//! 4. Verdict by threshold, consensus mode by agreement.
//!
//! `cast_vote` is a pure function of its inputs and never fails.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::logging::{log, log_vote, obj, ts_now, v_num, v_str, Domain, Level};
use crate::profile::StrategyProfile;
use crate::signals::{verdict_constant, ModuleKind, RiskSignal, SignalSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FinalVerdict {
    Buy,
    Sell,
    Hold,
}

impl FinalVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalVerdict::Buy => "BUY",
            FinalVerdict::Sell => "SELL",
            FinalVerdict::Hold => "HOLD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsensusMode {
    Unanimous,
    Majority,
    Split,
    Vetoed,
}

impl ConsensusMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusMode::Unanimous => "UNANIMOUS",
            ConsensusMode::Majority => "MAJORITY",
            ConsensusMode::Split => "SPLIT",
            ConsensusMode::Vetoed => "VETOED",
        }
    }
}

/// Immutable record of one vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub id: String,
    pub timestamp: String,
    pub final_verdict: FinalVerdict,
    pub net_score: f64,
    pub confidence: f64,
    pub consensus_mode: ConsensusMode,
    pub veto_active: bool,
    pub veto_reason: Option<String>,
    /// Normalized score of each contributing module.
    pub votes: BTreeMap<String, f64>,
    /// Effective weight of each contributing module.
    pub weights: BTreeMap<String, f64>,
}

impl VoteReceipt {
    pub fn is_actionable(&self) -> bool {
        !self.veto_active && self.final_verdict != FinalVerdict::Hold
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoterConfig {
    pub high_volatility_threshold: f64,
    pub sentiment_discount: f64,
    pub risk_boost: f64,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub majority_threshold: f64,
    /// Floor on the risk weight; the profile can raise it, never lower it.
    pub risk_min_weight: f64,
}

impl Default for VoterConfig {
    fn default() -> Self {
        Self {
            high_volatility_threshold: 0.05,
            sentiment_discount: 0.5,
            risk_boost: 1.5,
            buy_threshold: 0.6,
            sell_threshold: -0.6,
            majority_threshold: 0.5,
            risk_min_weight: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsensusVoter {
    config: VoterConfig,
}

impl ConsensusVoter {
    pub fn new(config: VoterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VoterConfig {
        &self.config
    }

    pub fn cast_vote(
        &self,
        context_id: &str,
        profile: &StrategyProfile,
        signals: &SignalSet,
        volatility: f64,
    ) -> VoteReceipt {
        let receipt = match &signals.risk {
            None => self.veto(context_id, self.configured_weights(profile), "Risk: precheck unavailable".to_string()),
            Some(risk) if risk.is_block() => {
                let reason = risk.reason.as_deref().unwrap_or("unspecified");
                self.veto(context_id, self.configured_weights(profile), format!("Risk: {}", reason))
            }
            Some(risk) => {
                let weights = self.resolve_weights(context_id, profile, volatility);
                self.tally(context_id, weights, signals, risk)
            }
        };

        log_vote(
            &receipt.id,
            receipt.final_verdict.as_str(),
            receipt.net_score,
            receipt.consensus_mode.as_str(),
            receipt.veto_reason.as_deref(),
        );
        receipt
    }

    /// Profile weights of every module allowed to vote, before any volatility adjustment.
    fn configured_weights(&self, profile: &StrategyProfile) -> BTreeMap<ModuleKind, f64> {
        let mut weights = BTreeMap::new();
        for kind in [ModuleKind::Quant, ModuleKind::Sentiment, ModuleKind::Hybrid] {
            let cfg = profile.module(kind);
            if cfg.is_active() {
                weights.insert(kind, cfg.weight);
            }
        }
        let configured = profile.risk_parameters.risk_weight;
        let risk = if configured.is_finite() { configured.max(self.config.risk_min_weight) } else { self.config.risk_min_weight };
        weights.insert(ModuleKind::Risk, risk);
        weights
    }

    /// Weights of every module allowed to vote this round.
    fn resolve_weights(&self, context_id: &str, profile: &StrategyProfile, volatility: f64) -> BTreeMap<ModuleKind, f64> {
        let mut weights = self.configured_weights(profile);

        let vol = if volatility.is_finite() { volatility } else { 0.0 };
        if vol > self.config.high_volatility_threshold {
            if let Some(w) = weights.get_mut(&ModuleKind::Sentiment) {
                *w *= self.config.sentiment_discount;
            }
            if let Some(w) = weights.get_mut(&ModuleKind::Risk) {
                *w *= self.config.risk_boost;
            }
            log(
                Level::Info,
                Domain::Vote,
                "high_volatility",
                obj(&[("context_id", v_str(context_id)), ("volatility", v_num(vol))]),
            );
        }
        weights
    }

    fn tally(
        &self,
        context_id: &str,
        weights: BTreeMap<ModuleKind, f64>,
        signals: &SignalSet,
        risk: &RiskSignal,
    ) -> VoteReceipt {
        let mut votes: BTreeMap<ModuleKind, f64> = BTreeMap::new();

        for (&kind, _) in weights.iter() {
            let score = match kind {
                ModuleKind::Quant => signals.quant.as_ref().map(|q| verdict_constant(&q.signal)),
                ModuleKind::Sentiment => signals.sentiment.as_ref().map(|s| {
                    let raw = s.score.clamp(-1.0, 1.0);
                    let signed = match s.sentiment.as_deref().map(str::to_uppercase).as_deref() {
                        Some("BEARISH") => -raw.abs(),
                        Some("BULLISH") => raw.abs(),
                        _ => raw,
                    };
                    signed * unit(s.confidence.unwrap_or(1.0))
                }),
                ModuleKind::Hybrid => signals
                    .hybrid
                    .as_ref()
                    .map(|h| verdict_constant(&h.final_verdict) * unit(h.final_score)),
                ModuleKind::Risk => risk.score.map(|s| s.clamp(-1.0, 1.0)),
            };
            if let Some(score) = score.filter(|s| s.is_finite()) {
                votes.insert(kind, score);
            }
        }

        let (num, den) = votes.iter().fold((0.0, 0.0), |(n, d), (kind, score)| {
            let w = weights.get(kind).copied().unwrap_or(0.0);
            (n + score * w, d + w)
        });
        let net = if den > 0.0 { (num / den).clamp(-1.0, 1.0) } else { 0.0 };

        let verdict = if net > self.config.buy_threshold {
            FinalVerdict::Buy
        } else if net < self.config.sell_threshold {
            FinalVerdict::Sell
        } else {
            FinalVerdict::Hold
        };

        let nonzero: Vec<f64> = votes.values().copied().filter(|s| *s != 0.0).collect();
        let mode = if !nonzero.is_empty() && (nonzero.iter().all(|s| *s > 0.0) || nonzero.iter().all(|s| *s < 0.0)) {
            ConsensusMode::Unanimous
        } else if net.abs() > self.config.majority_threshold {
            ConsensusMode::Majority
        } else {
            ConsensusMode::Split
        };

        let used: BTreeMap<String, f64> = votes
            .keys()
            .filter_map(|k| weights.get(k).map(|w| (k.as_str().to_string(), *w)))
            .collect();

        VoteReceipt {
            id: receipt_id(context_id),
            timestamp: ts_now(),
            final_verdict: verdict,
            net_score: round_to(net, 4),
            confidence: round_to(net.abs(), 2),
            consensus_mode: mode,
            veto_active: false,
            veto_reason: None,
            votes: votes.into_iter().map(|(k, v)| (k.as_str().to_string(), v)).collect(),
            weights: used,
        }
    }

    fn veto(&self, context_id: &str, weights: BTreeMap<ModuleKind, f64>, reason: String) -> VoteReceipt {
        VoteReceipt {
            id: receipt_id(context_id),
            timestamp: ts_now(),
            final_verdict: FinalVerdict::Hold,
            net_score: 0.0,
            confidence: 1.0,
            consensus_mode: ConsensusMode::Vetoed,
            veto_active: true,
            veto_reason: Some(reason),
            votes: BTreeMap::new(),
            weights: weights.into_iter().map(|(k, v)| (k.as_str().to_string(), v)).collect(),
        }
    }
}

fn receipt_id(context_id: &str) -> String {
    let head: String = context_id.chars().take(8).collect();
    format!("VOTE-{}", head)
}

fn unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn round_to(x: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (x * f).round() / f
}
