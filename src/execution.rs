//! Order dispatch to a trading venue.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constitution::{OrderType, RestingOrder, Side};

/// A validated order ready for the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
}

/// Venue collaborator. One attempt per order; retries are the caller's call.
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    async fn submit(&self, req: OrderRequest) -> Result<OrderAck>;
    /// Our own orders currently resting on the book for `symbol`.
    async fn open_orders(&self, symbol: &str) -> Result<Vec<RestingOrder>>;
}

/// Paper venue: accepts everything unless told to fail, remembers what it saw.
#[derive(Debug, Default)]
pub struct PaperVenue {
    submitted: Mutex<Vec<OrderRequest>>,
    resting: Mutex<Vec<RestingOrder>>,
    failure: Mutex<Option<String>>,
}

impl PaperVenue {
    pub fn with_resting(resting: Vec<RestingOrder>) -> Self {
        Self { resting: Mutex::new(resting), ..Default::default() }
    }

    /// Every subsequent submit fails with `reason`.
    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.to_string());
    }

    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.submitted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    async fn submit(&self, req: OrderRequest) -> Result<OrderAck> {
        if let Some(reason) = self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(anyhow!(reason));
        }
        let ack = OrderAck { order_id: format!("paper-{}", req.client_id), status: "NEW".to_string() };
        self.submitted.lock().unwrap_or_else(|e| e.into_inner()).push(req);
        Ok(ack)
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<RestingOrder>> {
        let resting = self.resting.lock().unwrap_or_else(|e| e.into_inner());
        Ok(resting.iter().filter(|r| r.symbol.eq_ignore_ascii_case(symbol)).cloned().collect())
    }
}
