//! Order constitution: the last gate before an order reaches the venue.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! | Level       | Check                         | Code                     |
//! |-------------|-------------------------------|--------------------------|
//! | technical   | quantity/price parse          | MALFORMED_NUMBERS        |
//! | technical   | quantity > 0                  | ZERO_QTY                 |
//! | technical   | limit price > 0               | ZERO_PRICE               |
//! | integrity   | symbol contains banned asset  | BANNED_ASSET             |
//! | financial   | notional >= floor             | DUST_ERROR               |
//! | financial   | notional <= cap               | FAT_FINGER               |
//! | compliance  | strategy mode not restricted  | RESTRICTED_MODE          |
//! | compliance  | no self-trade                 | WASH_TRADING_VIOLATION   |
//!
//! All arithmetic is exact decimal. Rules are an immutable snapshot that
//! amendments replace whole; a validation in flight keeps the rules it
//! started with.

pub mod wash;

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::logging::{log, log_order_verdict, obj, ts_now, v_num, v_str, Domain, Level};

pub use wash::RestingOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// An order as proposed, numbers still in their textual form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCandidate {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub strategy_mode: Option<String>,
}

impl OrderCandidate {
    pub fn limit(symbol: &str, side: Side, quantity: &str, price: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity: quantity.to_string(),
            price: Some(price.to_string()),
            strategy_mode: None,
        }
    }

    pub fn market(symbol: &str, side: Side, quantity: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: quantity.to_string(),
            price: None,
            strategy_mode: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictCode {
    Approved,
    MalformedNumbers,
    ZeroQty,
    ZeroPrice,
    BannedAsset,
    DustError,
    FatFinger,
    RestrictedMode,
    WashTradingViolation,
    InternalError,
}

impl VerdictCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictCode::Approved => "APPROVED",
            VerdictCode::MalformedNumbers => "MALFORMED_NUMBERS",
            VerdictCode::ZeroQty => "ZERO_QTY",
            VerdictCode::ZeroPrice => "ZERO_PRICE",
            VerdictCode::BannedAsset => "BANNED_ASSET",
            VerdictCode::DustError => "DUST_ERROR",
            VerdictCode::FatFinger => "FAT_FINGER",
            VerdictCode::RestrictedMode => "RESTRICTED_MODE",
            VerdictCode::WashTradingViolation => "WASH_TRADING_VIOLATION",
            VerdictCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    pub code: VerdictCode,
    pub reason: String,
    pub risk_score: f64,
    pub timestamp: String,
}

impl Verdict {
    fn approve(risk_score: f64) -> Self {
        Self {
            valid: true,
            code: VerdictCode::Approved,
            reason: "Passed all constitutional checks".to_string(),
            risk_score,
            timestamp: ts_now(),
        }
    }

    fn reject(rejection: Rejection) -> Self {
        Self {
            valid: false,
            code: rejection.code,
            reason: rejection.reason,
            risk_score: 1.0,
            timestamp: ts_now(),
        }
    }

    /// Equal in every field but the timestamp.
    pub fn same_outcome(&self, other: &Verdict) -> bool {
        self.valid == other.valid
            && self.code == other.code
            && self.reason == other.reason
            && self.risk_score == other.risk_score
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Rejection {
    code: VerdictCode,
    reason: String,
}

fn reject(code: VerdictCode, reason: impl Into<String>) -> Rejection {
    Rejection { code, reason: reason.into() }
}

// =============================================================================
// Rules
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constitution {
    /// Fat-finger cap on order notional.
    pub max_order_value: Decimal,
    /// Dust floor on order notional.
    pub min_notional: Decimal,
    pub banned_assets: BTreeSet<String>,
    pub restricted_modes: BTreeSet<String>,
}

impl Default for Constitution {
    fn default() -> Self {
        Self {
            max_order_value: Decimal::new(5000, 0),
            min_notional: Decimal::new(10, 0),
            banned_assets: ["LUNA", "FTT", "UST"].iter().map(|s| s.to_string()).collect(),
            restricted_modes: ["HFT_MANIPULATION", "PUMP_DUMP"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Constitution {
    pub fn validate(&self) -> Result<(), ConstitutionError> {
        if self.max_order_value <= Decimal::ZERO {
            return Err(ConstitutionError::InvalidCap(self.max_order_value));
        }
        if self.min_notional < Decimal::ZERO {
            return Err(ConstitutionError::InvalidFloor(self.min_notional));
        }
        if self.min_notional > self.max_order_value {
            return Err(ConstitutionError::FloorAboveCap { floor: self.min_notional, cap: self.max_order_value });
        }
        Ok(())
    }

    fn is_banned(&self, symbol: &str) -> bool {
        let symbol = symbol.to_uppercase();
        self.banned_assets.iter().any(|b| !b.is_empty() && symbol.contains(b.as_str()))
    }

    fn judge(&self, order: &OrderCandidate, resting: &[RestingOrder]) -> Result<Decimal, Rejection> {
        // technical
        let qty = parse_decimal(&order.quantity)
            .ok_or_else(|| reject(VerdictCode::MalformedNumbers, "Non-numeric quantity"))?;
        let price = match &order.price {
            Some(raw) => Some(
                parse_decimal(raw).ok_or_else(|| reject(VerdictCode::MalformedNumbers, "Non-numeric price"))?,
            ),
            None => None,
        };
        if qty <= Decimal::ZERO {
            return Err(reject(VerdictCode::ZeroQty, "Quantity must be positive"));
        }
        let limit_price = match (order.order_type, price) {
            (OrderType::Limit, Some(px)) if px > Decimal::ZERO => Some(px),
            (OrderType::Limit, _) => {
                return Err(reject(VerdictCode::ZeroPrice, "Limit order must have positive price"));
            }
            (OrderType::Market, Some(px)) if px < Decimal::ZERO => {
                return Err(reject(VerdictCode::ZeroPrice, "Price must not be negative"));
            }
            (OrderType::Market, _) => None,
        };

        // integrity
        if self.is_banned(&order.symbol) {
            return Err(reject(
                VerdictCode::BannedAsset,
                format!("Symbol {} contains blacklisted asset", order.symbol.to_uppercase()),
            ));
        }

        // financial
        let reference = price.filter(|px| *px > Decimal::ZERO);
        let notional = match reference {
            Some(px) => Some(qty.checked_mul(px).ok_or_else(|| {
                reject(VerdictCode::FatFinger, format!("Order value overflows; cap {}", self.max_order_value))
            })?),
            None => None,
        };
        if let Some(n) = notional {
            if n < self.min_notional {
                return Err(reject(
                    VerdictCode::DustError,
                    format!("Order value {} < Min {}", n, self.min_notional),
                ));
            }
            if n > self.max_order_value {
                return Err(reject(
                    VerdictCode::FatFinger,
                    format!("Value {} exceeds safety cap {}", n, self.max_order_value),
                ));
            }
        }

        // compliance
        if let Some(mode) = &order.strategy_mode {
            let mode = mode.to_uppercase();
            if self.restricted_modes.contains(&mode) {
                return Err(reject(VerdictCode::RestrictedMode, format!("Strategy mode {} is restricted", mode)));
            }
        }
        let incoming = wash::Incoming { symbol: &order.symbol, side: order.side, limit_price };
        if let Some(hit) = wash::find_cross(&incoming, resting) {
            return Err(reject(
                VerdictCode::WashTradingViolation,
                format!(
                    "Order execution would result in self-trade against resting {} @ {}",
                    hit.side.as_str(),
                    hit.price
                ),
            ));
        }

        Ok(notional.unwrap_or(Decimal::ZERO))
    }

    fn risk_score(&self, notional: Decimal) -> f64 {
        if self.max_order_value <= Decimal::ZERO {
            return 1.0;
        }
        let ratio = (notional / self.max_order_value).round_dp(4);
        ratio.to_f64().unwrap_or(1.0).clamp(0.0, 1.0)
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str_exact(raw.trim()).ok()
}

// =============================================================================
// Amendments
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConstitutionError {
    #[error("order value cap must be positive, got {0}")]
    InvalidCap(Decimal),
    #[error("notional floor must not be negative, got {0}")]
    InvalidFloor(Decimal),
    #[error("notional floor {floor} is above cap {cap}")]
    FloorAboveCap { floor: Decimal, cap: Decimal },
    #[error("empty entry in amendment")]
    EmptyEntry,
}

/// A batch of rule changes applied together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstitutionUpdate {
    pub max_order_value: Option<Decimal>,
    pub min_notional: Option<Decimal>,
    pub blacklist_add: Vec<String>,
    pub blacklist_remove: Vec<String>,
    pub restrict_modes_add: Vec<String>,
    pub restrict_modes_remove: Vec<String>,
}

impl ConstitutionUpdate {
    fn apply_to(&self, rules: &mut Constitution) -> Result<(), ConstitutionError> {
        if let Some(cap) = self.max_order_value {
            rules.max_order_value = cap;
        }
        if let Some(floor) = self.min_notional {
            rules.min_notional = floor;
        }
        apply_set(&mut rules.banned_assets, &self.blacklist_add, &self.blacklist_remove)?;
        apply_set(&mut rules.restricted_modes, &self.restrict_modes_add, &self.restrict_modes_remove)?;
        rules.validate()
    }
}

fn apply_set(set: &mut BTreeSet<String>, add: &[String], remove: &[String]) -> Result<(), ConstitutionError> {
    for entry in add.iter().chain(remove) {
        if entry.trim().is_empty() {
            return Err(ConstitutionError::EmptyEntry);
        }
    }
    for entry in remove {
        set.remove(&entry.trim().to_uppercase());
    }
    for entry in add {
        set.insert(entry.trim().to_uppercase());
    }
    Ok(())
}

// =============================================================================
// OrderConstitution
// =============================================================================

#[derive(Debug)]
pub struct OrderConstitution {
    rules: RwLock<Arc<Constitution>>,
    version: AtomicU64,
    writer: Mutex<()>,
}

impl Default for OrderConstitution {
    fn default() -> Self {
        Self::new(Constitution::default())
    }
}

impl OrderConstitution {
    pub fn new(rules: Constitution) -> Self {
        Self { rules: RwLock::new(Arc::new(rules)), version: AtomicU64::new(1), writer: Mutex::new(()) }
    }

    pub fn rules(&self) -> Arc<Constitution> {
        let guard = self.rules.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Judge an order against the current rules. Never fails.
    pub fn validate(&self, order: &OrderCandidate, resting: &[RestingOrder]) -> Verdict {
        let rules = self.rules();
        let verdict = match catch_unwind(AssertUnwindSafe(|| rules.judge(order, resting))) {
            Ok(Ok(notional)) => Verdict::approve(rules.risk_score(notional)),
            Ok(Err(rejection)) => Verdict::reject(rejection),
            Err(_) => {
                log(
                    Level::Fatal,
                    Domain::Constitution,
                    "validator_crash",
                    obj(&[("symbol", v_str(&order.symbol))]),
                );
                Verdict::reject(reject(VerdictCode::InternalError, "validator crashed; order refused"))
            }
        };
        log_order_verdict(&order.symbol, verdict.code.as_str(), &verdict.reason, verdict.valid);
        verdict
    }

    /// Apply an amendment atomically. Returns the new rules version.
    pub fn amend(&self, update: &ConstitutionUpdate) -> Result<u64, ConstitutionError> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = (*self.rules()).clone();
        update.apply_to(&mut next)?;

        let cap = next.max_order_value;
        let floor = next.min_notional;
        {
            let mut guard = self.rules.write().unwrap_or_else(|e| e.into_inner());
            *guard = Arc::new(next);
        }
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        log(
            Level::Warn,
            Domain::Constitution,
            "amended",
            obj(&[
                ("version", v_num(version as f64)),
                ("max_order_value", v_str(&cap.to_string())),
                ("min_notional", v_str(&floor.to_string())),
            ]),
        );
        Ok(version)
    }
}
