use super::{assemble, MemoryWindow};
use crate::error::{CoinbotError, Result};
use crate::models::Aggregate;
use crate::storage::PriceStore;
use chrono::{DateTime, Utc};

/// Window backed by the persisted price store.
///
/// The persisted path has no `push`: live samples never flow into it, which
/// is a type-level fact rather than a runtime flag. `load` hands back a fully
/// populated `MemoryWindow` so subsequent calculations use the fast in-memory
/// path.
pub struct StoredWindow {
    store: PriceStore,
    code: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl StoredWindow {
    pub fn new(store: PriceStore, code: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            store,
            code: code.to_string(),
            start,
            end,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Summarize the range SQL-side. Fails with `NoData` when the range holds
    /// no points.
    pub async fn calculate(&self) -> Result<Aggregate> {
        let summary = self
            .store
            .aggregate_range(&self.code, self.start, self.end)
            .await?;

        match (
            summary.min,
            summary.max,
            summary.average,
            summary.first,
            summary.last,
        ) {
            (Some(min), Some(max), Some(average), Some(first), Some(last))
                if summary.count > 0 =>
            {
                assemble(
                    &self.code,
                    summary.count as u64,
                    min,
                    max,
                    first,
                    last,
                    average,
                    self.start,
                    self.end,
                )
            }
            _ => Err(CoinbotError::NoData(self.code.clone())),
        }
    }

    /// Load the range into memory. The returned window is fixed to the same
    /// range and fully populated.
    pub async fn load(&self) -> Result<MemoryWindow> {
        let points = self
            .store
            .load_range(&self.code, self.start, self.end)
            .await?;

        tracing::debug!(
            code = %self.code,
            points = points.len(),
            "hydrated window from storage"
        );

        let mut window = MemoryWindow::fixed_range(&self.code, self.start, self.end);
        for point in points {
            window.push(point);
        }
        Ok(window)
    }
}
