use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed price sample for an asset. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub ts: DateTime<Utc>,
    pub price: f64,
}

impl PricePoint {
    pub fn new(ts: DateTime<Utc>, price: f64) -> Self {
        Self { ts, price }
    }
}

/// Statistical summary of the in-range points of a window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub first: f64,
    pub last: f64,
    pub average: f64,
    /// (max - min) / average
    pub flux_ratio: f64,
    /// (last - first) / first
    pub change_ratio: f64,
    /// change_ratio normalized by the window's wall-clock span in hours.
    pub change_per_hour: f64,
    /// flux_ratio normalized by the window's wall-clock span in hours.
    pub flux_per_hour: f64,
}

/// What a strategy proposes to do with the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentKind {
    Buy,
    Sell,
    Defer,
    StopLossSell,
}

impl IntentKind {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, IntentKind::Defer)
    }
}

/// A strategy's proposed action for one tick.
///
/// `price` of `None` means "at market": the ledger fills using the last
/// observed price. Strategies may emit several intents per tick; the ledger
/// honors the first actionable one, so stop-loss intents are emitted ahead
/// of variant signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub price: Option<f64>,
    pub reason: String,
    pub ts: DateTime<Utc>,
}

impl Intent {
    pub fn defer(ts: DateTime<Utc>) -> Self {
        Self {
            kind: IntentKind::Defer,
            price: None,
            reason: String::new(),
            ts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// One executed trade in a ledger's append-only log. Never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub side: TradeSide,
    pub ts: DateTime<Utc>,
    pub code: String,
    pub strategy: String,
    pub quantity: f64,
    pub price: f64,
    pub total: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defer_is_not_actionable() {
        assert!(!IntentKind::Defer.is_actionable());
        assert!(IntentKind::Buy.is_actionable());
        assert!(IntentKind::StopLossSell.is_actionable());
    }

    #[test]
    fn trade_side_labels() {
        assert_eq!(TradeSide::Buy.as_str(), "buy");
        assert_eq!(TradeSide::Sell.as_str(), "sell");
    }
}
