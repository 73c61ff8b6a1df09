//! Strategy profile: which modules vote, how loudly, and whether trading is live.
//!
//! The profile is an immutable value. Writers build a complete new profile
//! and hand it to the [`store::ProfileStore`], which swaps it in atomically.

pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::logging::ts_now;
use crate::signals::ModuleKind;

pub const PROFILE_SCHEMA_VERSION: &str = "2.0";

/// Default weight given to the risk module when nothing else is configured.
pub const DEFAULT_RISK_WEIGHT: f64 = 2.0;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile has no modules table")]
    NoModules,
    #[error("module {module} has invalid weight {weight}")]
    InvalidWeight { module: String, weight: f64 },
    #[error("risk weight must be finite and non-negative, got {0}")]
    InvalidRiskWeight(f64),
    #[error("profile io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("profile json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProfileError {
    pub fn is_missing_file(&self) -> bool {
        matches!(self, ProfileError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMeta {
    pub version: String,
    pub last_updated: String,
    pub updated_by: String,
}

impl ProfileMeta {
    pub fn stamped(author: &str) -> Self {
        Self {
            version: PROFILE_SCHEMA_VERSION.to_string(),
            last_updated: ts_now(),
            updated_by: author.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub enabled: bool,
    pub weight: f64,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "STANDARD".to_string()
}

impl ModuleConfig {
    pub fn new(enabled: bool, weight: f64, mode: &str) -> Self {
        Self { enabled, weight, mode: mode.to_string() }
    }

    pub fn disabled() -> Self {
        Self::new(false, 0.0, "DISABLED")
    }

    /// A module votes only when enabled with a positive weight.
    pub fn is_active(&self) -> bool {
        self.enabled && self.weight > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParameters {
    pub strict_mode: bool,
    #[serde(default = "default_risk_weight")]
    pub risk_weight: f64,
}

fn default_risk_weight() -> f64 {
    DEFAULT_RISK_WEIGHT
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self { strict_mode: true, risk_weight: DEFAULT_RISK_WEIGHT }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GlobalSwitch {
    Active,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyProfile {
    #[serde(rename = "_meta")]
    pub meta: ProfileMeta,
    pub modules: BTreeMap<String, ModuleConfig>,
    #[serde(default)]
    pub risk_parameters: RiskParameters,
    pub global_switch: GlobalSwitch,
}

impl StrategyProfile {
    /// Hardened factory defaults: reasoning off, strict risk, trading paused.
    pub fn factory_default() -> Self {
        let mut modules = BTreeMap::new();
        modules.insert(
            ModuleKind::Quant.config_key().to_string(),
            ModuleConfig::new(true, 1.0, "STANDARD"),
        );
        modules.insert(
            ModuleKind::Sentiment.config_key().to_string(),
            ModuleConfig::new(true, 1.0, "HYBRID"),
        );
        modules.insert(ModuleKind::Hybrid.config_key().to_string(), ModuleConfig::disabled());
        Self {
            meta: ProfileMeta::stamped("AUTO_RECOVERY"),
            modules,
            risk_parameters: RiskParameters::default(),
            global_switch: GlobalSwitch::Paused,
        }
    }

    /// Config for one module; unknown modules read as disabled.
    pub fn module(&self, kind: ModuleKind) -> ModuleConfig {
        self.modules
            .get(kind.config_key())
            .cloned()
            .unwrap_or_else(ModuleConfig::disabled)
    }

    pub fn is_enabled(&self, kind: ModuleKind) -> bool {
        self.module(kind).is_active()
    }

    pub fn is_paused(&self) -> bool {
        self.global_switch == GlobalSwitch::Paused
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.modules.is_empty() {
            return Err(ProfileError::NoModules);
        }
        for (name, cfg) in &self.modules {
            if !cfg.weight.is_finite() || cfg.weight < 0.0 {
                return Err(ProfileError::InvalidWeight { module: name.clone(), weight: cfg.weight });
            }
        }
        let rw = self.risk_parameters.risk_weight;
        if !rw.is_finite() || rw < 0.0 {
            return Err(ProfileError::InvalidRiskWeight(rw));
        }
        Ok(())
    }
}
