// Trading strategy module
pub mod midpoint;
pub mod rapid;
pub mod slope;
pub mod trend;

pub use midpoint::{MidpointConfig, MidpointReversionStrategy};
pub use rapid::{Direction, RapidChangeConfig, RapidChangeStrategy, RapidWindowConfig};
pub use slope::{SlopeConfig, SlopeDetectionStrategy};
pub use trend::{TrendConfig, TrendFollowingStrategy};

use crate::models::{Intent, IntentKind, PricePoint, TradeSide, Transaction};
use crate::window::MemoryWindow;
use chrono::Duration;

/// What a strategy may read from its ledger: the fee it trades under and the
/// last recorded transaction, so it never suggests a trade strictly worse
/// than the one just made.
#[derive(Debug, Clone, Default)]
pub struct LedgerView {
    pub fee: f64,
    pub last_transaction: Option<Transaction>,
}

/// One decision strategy for one asset.
///
/// `update` is called once per tick and returns intents in precedence order:
/// the ledger honors the first actionable (non-defer) one, so the shared
/// stop-loss check always comes before the variant's own signal.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn code(&self) -> &str;

    fn update(&mut self, point: &PricePoint, ledger: &LedgerView) -> Vec<Intent>;

    /// Seed internal windows from a bulk-loaded history window. Backtests
    /// call this once before replay so per-tick updates stay in memory.
    fn hydrate(&mut self, history: &MemoryWindow) {
        let _ = history;
    }

    /// History needed before a backtest's start for the windows to be warm.
    fn lookback(&self) -> Duration {
        Duration::zero()
    }
}

/// State shared by every strategy variant: identity, the stop-loss guard, and
/// the last emitted actionable intent (kept to avoid repeating log noise, not
/// to suppress re-evaluation).
#[derive(Debug)]
pub(crate) struct StrategyCore {
    pub name: String,
    pub code: String,
    pub stoploss_ratio: f64,
    pub last_intent: IntentKind,
}

impl StrategyCore {
    pub fn new(name: &str, code: &str, stoploss_ratio: f64) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
            stoploss_ratio,
            last_intent: IntentKind::Defer,
        }
    }

    /// The base behavior every variant runs first: if the last transaction
    /// was a sell and the price has fallen more than the stop-loss ratio
    /// below that sell price, cap the loss.
    pub fn stop_loss(&self, point: &PricePoint, ledger: &LedgerView) -> Option<Intent> {
        let tx = ledger.last_transaction.as_ref()?;
        if tx.side == TradeSide::Sell && point.price < tx.price * (1.0 - self.stoploss_ratio) {
            Some(Intent {
                kind: IntentKind::StopLossSell,
                price: None,
                reason: format!("price fell below stop-loss floor of last sell at {}", tx.price),
                ts: point.ts,
            })
        } else {
            None
        }
    }

    /// Log actionable intent transitions once, then remember the new state.
    pub fn note(&mut self, intent: &Intent) {
        if intent.kind.is_actionable() {
            if intent.kind != self.last_intent {
                tracing::info!(
                    strategy = %self.name,
                    code = %self.code,
                    kind = ?intent.kind,
                    price = ?intent.price,
                    reason = %intent.reason,
                    "intent changed"
                );
            }
            self.last_intent = intent.kind;
        }
    }
}

/// A buy is favorable unless the last transaction was a sell at a lower
/// price (net of fee). Once `max_hold` has elapsed since that sell, an
/// unfavorable buy is allowed rather than holding out indefinitely.
pub(crate) fn favorable_to_buy(point: &PricePoint, ledger: &LedgerView, max_hold: Duration) -> bool {
    match &ledger.last_transaction {
        Some(tx) if tx.side == TradeSide::Sell => {
            if tx.ts + max_hold < point.ts {
                tracing::debug!("allowing unfavorable buy after max hold");
                true
            } else {
                tx.price > point.price * (1.0 + ledger.fee)
            }
        }
        _ => true,
    }
}

/// Mirror of `favorable_to_buy` for sells against the last buy.
pub(crate) fn favorable_to_sell(
    point: &PricePoint,
    ledger: &LedgerView,
    max_hold: Duration,
) -> bool {
    match &ledger.last_transaction {
        Some(tx) if tx.side == TradeSide::Buy => {
            if tx.ts + max_hold < point.ts {
                tracing::debug!("allowing unfavorable sell after max hold");
                true
            } else {
                tx.price < point.price * (1.0 + ledger.fee)
            }
        }
        _ => true,
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    pub fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
    }

    pub fn sell_view(price: f64, at: DateTime<Utc>) -> LedgerView {
        LedgerView {
            fee: 0.0025,
            last_transaction: Some(Transaction {
                side: TradeSide::Sell,
                ts: at,
                code: "BTC".to_string(),
                strategy: "test".to_string(),
                quantity: 1.0,
                price,
                total: price,
            }),
        }
    }

    pub fn buy_view(price: f64, at: DateTime<Utc>) -> LedgerView {
        LedgerView {
            fee: 0.0025,
            last_transaction: Some(Transaction {
                side: TradeSide::Buy,
                ts: at,
                code: "BTC".to_string(),
                strategy: "test".to_string(),
                quantity: 1.0,
                price,
                total: price,
            }),
        }
    }
}
