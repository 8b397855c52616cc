// Exchange adapter module
pub mod gemini;

pub use gemini::{spawn_order_events, GeminiAdapter, GeminiCredentials};

use crate::error::OrderError;
use crate::models::TradeSide;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderMethod {
    Limit,
    Market,
}

/// An order the ledger wants placed. The client order id is generated by the
/// caller so a retry after an ambiguous failure resubmits the same id and the
/// exchange can deduplicate.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub client_order_id: Uuid,
    pub code: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub method: OrderMethod,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub client_order_id: Uuid,
    pub order_id: Option<String>,
}

/// Contract the live ledger depends on.
///
/// `submit` must record the order attempt durably before transmitting, and
/// only commit that record when transmission succeeds: a crash between the
/// two leaves a rollback-eligible record rather than a phantom order.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn submit(&self, request: &OrderRequest) -> Result<OrderAck, OrderError>;

    async fn cancel_all(&self) -> Result<(), OrderError>;
}
