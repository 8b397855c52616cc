// Backtesting module
pub mod synthetic;

pub use synthetic::{MarketScenario, SyntheticTicks};

use crate::error::Result;
use crate::ledger::{LedgerConfig, SimulationLedger};
use crate::models::PricePoint;
use crate::storage::PriceStore;
use crate::strategy::Strategy;
use crate::window::{MemoryWindow, StoredWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub ticks: usize,
    /// Ticks that failed to process; logged and skipped, never fatal.
    pub failed_ticks: usize,
    pub transactions: usize,
    pub profit: f64,
    pub good: u32,
    pub bad: u32,
    /// Funds plus open inventory at the last replayed price.
    pub value: f64,
}

/// Replay a chronologically ordered tick sequence through a simulation
/// ledger. Fully sequential and deterministic: the same input sequence
/// produces the same transaction log.
pub fn replay(ledger: &mut SimulationLedger, points: &[PricePoint]) -> BacktestReport {
    let mut failed_ticks = 0;

    for point in points {
        if let Err(error) = ledger.update(point) {
            failed_ticks += 1;
            tracing::warn!(
                ts = %point.ts,
                price = point.price,
                %error,
                "tick failed, continuing"
            );
        }
    }

    let report = ledger.calc();
    BacktestReport {
        ticks: points.len(),
        failed_ticks,
        transactions: ledger.book().transactions().len(),
        profit: report.profit,
        good: report.good,
        bad: report.bad,
        value: report.value,
    }
}

/// Backtest one strategy over a stored history range.
///
/// The range plus the strategy's lookback is bulk-loaded once; the strategy
/// hydrates its windows from that cache, and the replayed ticks are derived
/// from the same load, so storage is queried exactly once.
pub struct BacktestRunner {
    store: PriceStore,
    config: LedgerConfig,
}

impl BacktestRunner {
    pub fn new(store: PriceStore, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(
        &self,
        mut strategy: Box<dyn Strategy>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BacktestReport> {
        let code = self.config.code.clone();
        let lookback = strategy.lookback();

        let cache = StoredWindow::new(self.store.clone(), &code, start - lookback, end)
            .load()
            .await?;
        tracing::info!(
            code = %code,
            points = cache.len(),
            lookback_hours = lookback.num_hours(),
            "backtest cache loaded"
        );

        strategy.hydrate(&cache);

        let mut replayed = MemoryWindow::fixed_range(&code, start, end);
        replayed.derive_from(&cache);
        let points = replayed.points().to_vec();

        let mut ledger = SimulationLedger::new(self.config.clone(), strategy)?;
        let report = replay(&mut ledger, &points);

        tracing::info!(
            code = %code,
            ticks = report.ticks,
            transactions = report.transactions,
            profit = report.profit,
            "backtest finished"
        );
        Ok(report)
    }
}
