//! Market-context phase evaluator.
//!
//! Reads the deliberation context (macro, technical, order flow, sentiment,
//! account) and grades each phase. Missing or mistyped fields fall back to
//! neutral values.

use serde_json::Value;

use super::{Assessment, DeliberationError, PhaseEvaluator, ReasoningPhase};

/// Typed view of the free-form deliberation context.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliberationContext {
    pub regime: String,
    pub volatility_index: f64,
    pub trend: String,
    pub rsi: f64,
    pub ofi: f64,
    pub sentiment: String,
    pub sentiment_score: f64,
    pub leverage: f64,
    pub drawdown_pct: f64,
}

impl Default for DeliberationContext {
    fn default() -> Self {
        Self {
            regime: "NEUTRAL".to_string(),
            volatility_index: 20.0,
            trend: "SIDEWAYS".to_string(),
            rsi: 50.0,
            ofi: 0.0,
            sentiment: "NEUTRAL".to_string(),
            sentiment_score: 0.0,
            leverage: 1.0,
            drawdown_pct: 0.0,
        }
    }
}

fn num(root: &Value, section: &str, key: &str, default: f64) -> f64 {
    match root.get(section).and_then(|s| s.get(key)) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn text(root: &Value, section: &str, key: &str, default: &str) -> String {
    root.get(section)
        .and_then(|s| s.get(key))
        .and_then(Value::as_str)
        .map(|s| s.to_uppercase())
        .unwrap_or_else(|| default.to_string())
}

impl DeliberationContext {
    /// Never fails; absent sections read as neutral.
    pub fn from_value(root: &Value) -> Self {
        let d = Self::default();
        Self {
            regime: text(root, "macro", "regime", &d.regime),
            volatility_index: num(root, "macro", "volatility_index", d.volatility_index),
            trend: text(root, "technical", "trend", &d.trend),
            rsi: num(root, "technical", "rsi", d.rsi),
            ofi: num(root, "order_flow", "ofi", d.ofi),
            sentiment: text(root, "sentiment", "overall", &d.sentiment),
            sentiment_score: num(root, "sentiment", "score", d.sentiment_score),
            leverage: num(root, "account", "leverage", d.leverage),
            drawdown_pct: num(root, "account", "drawdown_pct", d.drawdown_pct),
        }
    }
}

/// Default evaluator grading the market context.
#[derive(Debug, Clone)]
pub struct MarketPhases {
    pub max_leverage: f64,
    pub max_drawdown_pct: f64,
}

impl Default for MarketPhases {
    fn default() -> Self {
        Self { max_leverage: 3.0, max_drawdown_pct: 0.15 }
    }
}

fn finite(name: &str, value: f64) -> Result<f64, DeliberationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DeliberationError::NonFinite { field: name.to_string() })
    }
}

impl MarketPhases {
    fn foundation(&self, ctx: &DeliberationContext) -> Result<Assessment, DeliberationError> {
        let vix = finite("volatility_index", ctx.volatility_index)?;
        let (confidence, deduction) = if ctx.regime == "RISK_ON" && vix < 25.0 {
            (0.9, "Favorable macro winds (Risk-On).")
        } else if ctx.regime == "RISK_OFF" || vix > 35.0 {
            (0.2, "Hostile environment (High Volatility/Risk-Off).")
        } else {
            (0.5, "Market environment is neutral.")
        };
        Ok(Assessment {
            premise: "Capital requires stability or clear trends.".to_string(),
            observation: format!("Regime: {}, VIX: {}", ctx.regime, vix),
            deduction: deduction.to_string(),
            confidence,
        })
    }

    fn tactical(&self, ctx: &DeliberationContext) -> Result<Assessment, DeliberationError> {
        let ofi = finite("ofi", ctx.ofi)?;
        let (confidence, deduction) = match ctx.trend.as_str() {
            "UP" if ofi > 0.2 => (0.95, "Strong confluence: Trend + Buying Pressure."),
            "UP" if ofi < -0.2 => (0.4, "Divergence warning: Price rising but flow is selling."),
            "DOWN" => (0.1, "Trend is bearish."),
            _ => (0.5, "No clear tactical advantage."),
        };
        Ok(Assessment {
            premise: "Align with the path of least resistance.".to_string(),
            observation: format!("Trend: {}, OFI: {:.2}, RSI: {}", ctx.trend, ofi, ctx.rsi),
            deduction: deduction.to_string(),
            confidence,
        })
    }

    fn sentiment(&self, ctx: &DeliberationContext) -> Result<Assessment, DeliberationError> {
        let score = finite("sentiment_score", ctx.sentiment_score)?.clamp(-1.0, 1.0);
        // Strength of feeling raises conviction; the hypothesis is long.
        let strength = 0.5 + score.abs() * 0.5;
        let confidence = if ctx.sentiment == "BULLISH" { strength } else { 1.0 - strength };
        Ok(Assessment {
            premise: "Crowd psychology drives short-term moves.".to_string(),
            observation: format!("Intent: {}, Score: {:.2}", ctx.sentiment, score),
            deduction: format!("Market sentiment is {}.", ctx.sentiment),
            confidence,
        })
    }

    fn risk(&self, ctx: &DeliberationContext) -> Result<Assessment, DeliberationError> {
        let lev = finite("leverage", ctx.leverage)?;
        let dd = finite("drawdown_pct", ctx.drawdown_pct)?;
        let observation = format!("Lev: {}x, DD: {:.1}%", lev, dd * 100.0);
        if lev > self.max_leverage || dd > self.max_drawdown_pct {
            return Ok(Assessment {
                premise: "Preservation of capital is paramount.".to_string(),
                observation,
                deduction: "CRITICAL RISK LEVEL EXCEEDED.".to_string(),
                confidence: 0.0,
            });
        }
        Ok(Assessment {
            premise: "Risk parameters within safety limits.".to_string(),
            observation,
            deduction: "Trade is permissive within risk budget.".to_string(),
            confidence: 1.0,
        })
    }
}

impl PhaseEvaluator for MarketPhases {
    fn assess(&self, phase: ReasoningPhase, ctx: &DeliberationContext) -> Result<Assessment, DeliberationError> {
        match phase {
            ReasoningPhase::Foundation => self.foundation(ctx),
            ReasoningPhase::Tactical => self.tactical(ctx),
            ReasoningPhase::Sentiment => self.sentiment(ctx),
            ReasoningPhase::Risk => self.risk(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_sections_are_neutral() {
        let ctx = DeliberationContext::from_value(&json!({}));
        assert_eq!(ctx, DeliberationContext::default());
        let ctx = DeliberationContext::from_value(&json!("not an object"));
        assert_eq!(ctx, DeliberationContext::default());
    }

    #[test]
    fn test_mistyped_fields_are_neutral() {
        let ctx = DeliberationContext::from_value(&json!({
            "macro": {"regime": 7, "volatility_index": "abc"},
            "account": {"leverage": "2.5"}
        }));
        assert_eq!(ctx.regime, "NEUTRAL");
        assert_eq!(ctx.volatility_index, 20.0);
        assert_eq!(ctx.leverage, 2.5);
    }

    #[test]
    fn test_foundation_grades() {
        let phases = MarketPhases::default();
        let mut ctx = DeliberationContext::default();
        ctx.regime = "RISK_ON".into();
        ctx.volatility_index = 18.5;
        assert_eq!(phases.foundation(&ctx).unwrap().confidence, 0.9);
        ctx.volatility_index = 40.0;
        assert_eq!(phases.foundation(&ctx).unwrap().confidence, 0.2);
        ctx.regime = "NEUTRAL".into();
        ctx.volatility_index = 20.0;
        assert_eq!(phases.foundation(&ctx).unwrap().confidence, 0.5);
    }

    #[test]
    fn test_tactical_confluence_and_divergence() {
        let phases = MarketPhases::default();
        let mut ctx = DeliberationContext::default();
        ctx.trend = "UP".into();
        ctx.ofi = 0.45;
        assert_eq!(phases.tactical(&ctx).unwrap().confidence, 0.95);
        ctx.ofi = -0.5;
        assert_eq!(phases.tactical(&ctx).unwrap().confidence, 0.4);
        ctx.trend = "DOWN".into();
        assert_eq!(phases.tactical(&ctx).unwrap().confidence, 0.1);
    }

    #[test]
    fn test_sentiment_favours_bullish() {
        let phases = MarketPhases::default();
        let mut ctx = DeliberationContext::default();
        ctx.sentiment = "BULLISH".into();
        ctx.sentiment_score = 0.8;
        assert!((phases.sentiment(&ctx).unwrap().confidence - 0.9).abs() < 1e-12);
        ctx.sentiment = "BEARISH".into();
        assert!((phases.sentiment(&ctx).unwrap().confidence - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_risk_breach() {
        let phases = MarketPhases::default();
        let mut ctx = DeliberationContext::default();
        assert_eq!(phases.risk(&ctx).unwrap().confidence, 1.0);
        ctx.leverage = 3.5;
        assert_eq!(phases.risk(&ctx).unwrap().confidence, 0.0);
        ctx.leverage = 1.0;
        ctx.drawdown_pct = 0.2;
        assert_eq!(phases.risk(&ctx).unwrap().confidence, 0.0);
    }

    #[test]
    fn test_non_finite_is_an_error() {
        let phases = MarketPhases::default();
        let mut ctx = DeliberationContext::default();
        ctx.leverage = f64::NAN;
        assert!(phases.risk(&ctx).is_err());
    }
}
