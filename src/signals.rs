//! Normalized analytical signals.
//!
//! Each analytical module returns a small JSON record. This module turns
//! those records into typed signals, one variant per module kind. Anything
//! that does not fit the expected shape is dropped, never guessed at.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of analytical modules that can vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Quant,
    Sentiment,
    Hybrid,
    Risk,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 4] = [
        ModuleKind::Quant,
        ModuleKind::Sentiment,
        ModuleKind::Hybrid,
        ModuleKind::Risk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Quant => "quant",
            ModuleKind::Sentiment => "sentiment",
            ModuleKind::Hybrid => "hybrid",
            ModuleKind::Risk => "risk",
        }
    }

    /// Key of this module inside the strategy profile's `modules` table.
    pub fn config_key(&self) -> &'static str {
        match self {
            ModuleKind::Quant => "quant_analysis",
            ModuleKind::Sentiment => "sentiment_analysis",
            ModuleKind::Hybrid => "hybrid_reasoning",
            ModuleKind::Risk => "risk_precheck",
        }
    }
}

/// Quant module output: a textual call such as `BUY` or `STRONG_SELL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantSignal {
    pub signal: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Sentiment module output: a signed score with an optional label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentSignal {
    #[serde(default)]
    pub sentiment: Option<String>,
    pub score: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Hybrid reasoning output: a verdict and the score backing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSignal {
    #[serde(alias = "verdict")]
    pub final_verdict: String,
    #[serde(alias = "score", default = "default_hybrid_score")]
    pub final_score: f64,
}

fn default_hybrid_score() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskStatus {
    #[serde(alias = "OK")]
    Allow,
    Block,
}

/// Risk precheck output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub status: RiskStatus,
    #[serde(default)]
    pub reason: Option<String>,
    /// Optional directional opinion; when present it votes with the risk weight.
    #[serde(default)]
    pub score: Option<f64>,
}

impl RiskSignal {
    pub fn allow(reason: &str) -> Self {
        Self { status: RiskStatus::Allow, reason: Some(reason.to_string()), score: None }
    }

    pub fn block(reason: &str) -> Self {
        Self { status: RiskStatus::Block, reason: Some(reason.to_string()), score: None }
    }

    pub fn is_block(&self) -> bool {
        self.status == RiskStatus::Block
    }
}

/// One module's contribution to a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentSignal {
    Quant(QuantSignal),
    Sentiment(SentimentSignal),
    Hybrid(HybridSignal),
    Risk(RiskSignal),
}

impl AgentSignal {
    /// Parse a raw module record. Malformed records yield `None`.
    pub fn parse(kind: ModuleKind, raw: &Value) -> Option<AgentSignal> {
        let signal = match kind {
            ModuleKind::Quant => AgentSignal::Quant(serde_json::from_value(raw.clone()).ok()?),
            ModuleKind::Sentiment => {
                AgentSignal::Sentiment(serde_json::from_value(raw.clone()).ok()?)
            }
            ModuleKind::Hybrid => AgentSignal::Hybrid(serde_json::from_value(raw.clone()).ok()?),
            ModuleKind::Risk => AgentSignal::Risk(serde_json::from_value(raw.clone()).ok()?),
        };
        signal.is_well_formed().then_some(signal)
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            AgentSignal::Quant(_) => ModuleKind::Quant,
            AgentSignal::Sentiment(_) => ModuleKind::Sentiment,
            AgentSignal::Hybrid(_) => ModuleKind::Hybrid,
            AgentSignal::Risk(_) => ModuleKind::Risk,
        }
    }

    fn is_well_formed(&self) -> bool {
        let finite = |v: Option<f64>| v.map_or(true, f64::is_finite);
        match self {
            AgentSignal::Quant(q) => finite(q.confidence),
            AgentSignal::Sentiment(s) => s.score.is_finite() && finite(s.confidence),
            AgentSignal::Hybrid(h) => h.final_score.is_finite(),
            AgentSignal::Risk(r) => finite(r.score),
        }
    }
}

/// Everything the voter sees for one cycle. Absent slots did not contribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalSet {
    pub quant: Option<QuantSignal>,
    pub sentiment: Option<SentimentSignal>,
    pub hybrid: Option<HybridSignal>,
    pub risk: Option<RiskSignal>,
}

impl SignalSet {
    /// Place a parsed signal in its slot, replacing any earlier value.
    pub fn insert(&mut self, signal: AgentSignal) {
        match signal {
            AgentSignal::Quant(s) => self.quant = Some(s),
            AgentSignal::Sentiment(s) => self.sentiment = Some(s),
            AgentSignal::Hybrid(s) => self.hybrid = Some(s),
            AgentSignal::Risk(s) => self.risk = Some(s),
        }
    }
}

/// Map a textual call to its signed constant.
pub fn verdict_constant(text: &str) -> f64 {
    let s = text.to_uppercase();
    if s.contains("STRONG_BUY") {
        1.0
    } else if s.contains("BUY") {
        0.6
    } else if s.contains("STRONG_SELL") {
        -1.0
    } else if s.contains("SELL") {
        -0.6
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verdict_constants() {
        assert_eq!(verdict_constant("STRONG_BUY"), 1.0);
        assert_eq!(verdict_constant("buy"), 0.6);
        assert_eq!(verdict_constant("WEAK_BUY"), 0.6);
        assert_eq!(verdict_constant("STRONG_SELL"), -1.0);
        assert_eq!(verdict_constant("SELL"), -0.6);
        assert_eq!(verdict_constant("NEUTRAL"), 0.0);
        assert_eq!(verdict_constant("HOLD/REJECT"), 0.0);
        assert_eq!(verdict_constant("BLOCKED_BY_RISK"), 0.0);
    }

    #[test]
    fn test_parse_risk_statuses() {
        let allow = AgentSignal::parse(ModuleKind::Risk, &json!({"status": "OK"}));
        assert!(matches!(allow, Some(AgentSignal::Risk(RiskSignal { status: RiskStatus::Allow, .. }))));

        let block = AgentSignal::parse(
            ModuleKind::Risk,
            &json!({"status": "BLOCK", "reason": "High Leverage"}),
        );
        match block {
            Some(AgentSignal::Risk(r)) => {
                assert!(r.is_block());
                assert_eq!(r.reason.as_deref(), Some("High Leverage"));
            }
            other => panic!("expected risk signal, got {:?}", other),
        }

        assert!(AgentSignal::parse(ModuleKind::Risk, &json!({"status": "MAYBE"})).is_none());
    }

    #[test]
    fn test_malformed_records_are_dropped() {
        assert!(AgentSignal::parse(ModuleKind::Quant, &json!({})).is_none());
        assert!(AgentSignal::parse(ModuleKind::Quant, &json!("BUY")).is_none());
        assert!(AgentSignal::parse(ModuleKind::Sentiment, &json!({"score": "high"})).is_none());
        assert!(AgentSignal::parse(ModuleKind::Hybrid, &json!({"final_score": 0.9})).is_none());
    }

    #[test]
    fn test_hybrid_aliases() {
        let parsed = AgentSignal::parse(ModuleKind::Hybrid, &json!({"verdict": "WEAK_BUY", "score": 0.6}));
        assert_eq!(
            parsed,
            Some(AgentSignal::Hybrid(HybridSignal {
                final_verdict: "WEAK_BUY".to_string(),
                final_score: 0.6
            }))
        );
    }

    #[test]
    fn test_signal_set_slots() {
        let mut set = SignalSet::default();
        set.insert(AgentSignal::Quant(QuantSignal { signal: "BUY".into(), confidence: None }));
        set.insert(AgentSignal::Risk(RiskSignal::allow("ok")));
        assert!(set.quant.is_some());
        assert!(set.risk.is_some());
        assert!(set.sentiment.is_none());
        assert!(set.hybrid.is_none());
    }
}
