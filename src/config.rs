//! Process configuration from the environment.
//!
//! The strategy profile is separate: it lives on disk and is hot-reloaded
//! through [`crate::profile::store::ProfileStore`].

use std::collections::BTreeSet;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::constitution::Constitution;
use crate::modules::RiskPrecheck;
use crate::orchestrator::OrchestratorConfig;
use crate::voter::VoterConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub symbol: String,
    pub profile_path: String,
    pub audit_path: String,
    pub module_timeout_ms: u64,
    pub tick_secs: u64,
    /// 0 runs until killed.
    pub cycles: u64,
    pub order_qty: Decimal,
    pub max_order_value: Decimal,
    pub min_notional: Decimal,
    pub banned_assets: BTreeSet<String>,
    pub restricted_modes: BTreeSet<String>,
    pub high_vol_threshold: f64,
    pub max_leverage: f64,
    pub max_drawdown_pct: f64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            symbol: std::env::var("SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string()),
            profile_path: std::env::var("PROFILE_PATH").unwrap_or_else(|_| "./logic/strategy_profile.json".to_string()),
            audit_path: std::env::var("AUDIT_PATH").unwrap_or_else(|_| "./audit/decisions.jsonl".to_string()),
            module_timeout_ms: std::env::var("MODULE_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(2000),
            tick_secs: std::env::var("TICK_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            cycles: std::env::var("CYCLES").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            order_qty: std::env::var("ORDER_QTY").ok().and_then(|v| v.parse().ok()).unwrap_or(Decimal::new(1, 2)),
            max_order_value: std::env::var("MAX_ORDER_VALUE").ok().and_then(|v| v.parse().ok()).unwrap_or(Decimal::new(5000, 0)),
            min_notional: std::env::var("MIN_NOTIONAL").ok().and_then(|v| v.parse().ok()).unwrap_or(Decimal::new(10, 0)),
            banned_assets: list_var("BANNED_ASSETS", "LUNA,FTT,UST"),
            restricted_modes: list_var("RESTRICTED_MODES", "HFT_MANIPULATION,PUMP_DUMP"),
            high_vol_threshold: std::env::var("HIGH_VOL_THRESHOLD").ok().and_then(|v| v.parse().ok()).unwrap_or(0.05),
            max_leverage: std::env::var("MAX_LEVERAGE").ok().and_then(|v| v.parse().ok()).unwrap_or(3.0),
            max_drawdown_pct: std::env::var("MAX_DRAWDOWN_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.15),
        }
    }

    pub fn constitution(&self) -> Constitution {
        Constitution {
            max_order_value: self.max_order_value,
            min_notional: self.min_notional,
            banned_assets: self.banned_assets.clone(),
            restricted_modes: self.restricted_modes.clone(),
        }
    }

    pub fn voter(&self) -> VoterConfig {
        VoterConfig { high_volatility_threshold: self.high_vol_threshold, ..VoterConfig::default() }
    }

    pub fn risk_precheck(&self) -> RiskPrecheck {
        RiskPrecheck { max_leverage: self.max_leverage, max_drawdown_pct: self.max_drawdown_pct }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            module_timeout: Duration::from_millis(self.module_timeout_ms),
            order_quantity: self.order_qty,
        }
    }
}

fn list_var(key: &str, default: &str) -> BTreeSet<String> {
    parse_list(&std::env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn parse_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
