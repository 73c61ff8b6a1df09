//! Self-trade detection.
//!
//! Resting orders on both sides of a book are fine (market making). A new
//! order is a wash trade only when it would execute against one of our own
//! resting orders. Any price overlap counts, regardless of quantity.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// One of our own orders already resting on the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestingOrder {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// The priced view of an incoming order the detector needs.
#[derive(Debug, Clone, Copy)]
pub struct Incoming<'a> {
    pub symbol: &'a str,
    pub side: Side,
    /// `None` for market orders: they cross anything on the other side.
    pub limit_price: Option<Decimal>,
}

/// First resting order the incoming order would trade against.
pub fn find_cross<'r>(incoming: &Incoming<'_>, resting: &'r [RestingOrder]) -> Option<&'r RestingOrder> {
    resting
        .iter()
        .filter(|r| r.symbol.eq_ignore_ascii_case(incoming.symbol))
        .filter(|r| r.side == incoming.side.opposite())
        .find(|r| match incoming.limit_price {
            None => true,
            Some(px) => match incoming.side {
                Side::Buy => px >= r.price,
                Side::Sell => px <= r.price,
            },
        })
}
