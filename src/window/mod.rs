// Price window module
pub mod stored;

pub use stored::StoredWindow;

use crate::error::{CoinbotError, Result};
use crate::models::{Aggregate, PricePoint};
use chrono::{DateTime, Duration, Utc};

/// In-memory window over a sequence of price points.
///
/// A rolling window always covers `[end - period, end]` where `end` defaults
/// to the current wall clock until pinned with `set_end`. A fixed window uses
/// the caller-set range. Callers are expected to push points in time order;
/// ordering is not validated.
///
/// Reads that trim (`calculate`, `last`) prune out-of-range points to reclaim
/// memory, so they are not side-effect-free.
#[derive(Debug, Clone)]
pub struct MemoryWindow {
    name: String,
    code: String,
    period: Option<Duration>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    points: Vec<PricePoint>,
}

impl MemoryWindow {
    /// Create a rolling window covering `[end - period, end]`.
    pub fn rolling(code: &str, name: &str, period: Duration) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
            period: Some(period),
            start: None,
            end: None,
            points: Vec::new(),
        }
    }

    /// Create a fixed window with no range yet; callers set it per tick.
    pub fn fixed(code: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
            period: None,
            start: None,
            end: None,
            points: Vec::new(),
        }
    }

    /// Create a fixed window with an explicit range.
    pub fn fixed_range(code: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            name: format!("{}..{}", start, end),
            code: code.to_string(),
            period: None,
            start: Some(start),
            end: Some(end),
            points: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_rolling(&self) -> bool {
        self.period.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    pub fn start(&self) -> DateTime<Utc> {
        if let Some(start) = self.start {
            start
        } else if let Some(period) = self.period {
            self.end() - period
        } else {
            Utc::now()
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end.unwrap_or_else(Utc::now)
    }

    /// Pin the end of the range. Rolling windows slide their start with it.
    pub fn set_end(&mut self, end: DateTime<Utc>) {
        self.end = Some(end);
    }

    pub fn set_range(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.start = Some(start);
        self.end = Some(end);
    }

    pub fn push(&mut self, point: PricePoint) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    /// Drop points outside `[start, end]`.
    pub fn trim(&mut self) {
        let start = self.start();
        let end = self.end();
        self.points.retain(|p| p.ts >= start && p.ts <= end);
    }

    /// The most recent in-range point. Trims as a side effect.
    pub fn last(&mut self) -> Option<PricePoint> {
        self.trim();
        self.points.last().cloned()
    }

    /// Copy the point sequence from an already-loaded window and re-apply
    /// this window's trim. Used to build several sub-windows from one bulk
    /// load without re-querying storage.
    pub fn derive_from(&mut self, other: &MemoryWindow) {
        self.points = other.points.clone();
        self.trim();
    }

    /// Compute the aggregate over the in-range points. Trims as a side
    /// effect. Fails with `NoData` when no in-range points remain.
    pub fn calculate(&mut self) -> Result<Aggregate> {
        self.trim();
        let start = self.start();
        let end = self.end();

        if self.points.is_empty() {
            return Err(CoinbotError::NoData(self.code.clone()));
        }

        let mut sum = 0.0;
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for point in &self.points {
            sum += point.price;
            if point.price < min {
                min = point.price;
            }
            if point.price > max {
                max = point.price;
            }
        }

        let count = self.points.len() as u64;
        let first = self.points[0].price;
        let last = self.points[self.points.len() - 1].price;
        let average = sum / count as f64;

        assemble(&self.code, count, min, max, first, last, average, start, end)
    }
}

/// Build an `Aggregate` from its parts, guarding the divisions. A zero
/// `average` or `first` would produce NaN/Infinity ratios and is surfaced as
/// `NoData` instead.
#[allow(clippy::too_many_arguments)]
pub(crate) fn assemble(
    code: &str,
    count: u64,
    min: f64,
    max: f64,
    first: f64,
    last: f64,
    average: f64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Aggregate> {
    if count == 0 || average == 0.0 || first == 0.0 {
        return Err(CoinbotError::NoData(code.to_string()));
    }

    let flux_ratio = (max - min) / average;
    let change_ratio = (last - first) / first;

    // A single-instant window has no slope.
    let hours = (end - start).num_milliseconds() as f64 / 3_600_000.0;
    let (flux_per_hour, change_per_hour) = if hours > 0.0 {
        (flux_ratio / hours, change_ratio / hours)
    } else {
        (0.0, 0.0)
    };

    Ok(Aggregate {
        count,
        min,
        max,
        first,
        last,
        average,
        flux_ratio,
        change_ratio,
        change_per_hour,
        flux_per_hour,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap()
    }

    fn filled_window() -> MemoryWindow {
        let mut window = MemoryWindow::fixed_range("BTC", ts(0), ts(30));
        for (minute, price) in [(0, 100.0), (10, 110.0), (20, 90.0), (30, 105.0)] {
            window.push(PricePoint::new(ts(minute), price));
        }
        window
    }

    #[test]
    fn aggregate_orders_min_average_max() {
        let mut window = filled_window();
        let agg = window.calculate().unwrap();

        assert_eq!(agg.count, 4);
        assert!(agg.min <= agg.average && agg.average <= agg.max);
        assert_eq!(agg.first, 100.0);
        assert_eq!(agg.last, 105.0);
        assert_eq!(agg.min, 90.0);
        assert_eq!(agg.max, 110.0);
    }

    #[test]
    fn aggregate_ratios() {
        let mut window = filled_window();
        let agg = window.calculate().unwrap();

        let expected_avg = (100.0 + 110.0 + 90.0 + 105.0) / 4.0;
        assert!((agg.average - expected_avg).abs() < 1e-9);
        assert!((agg.flux_ratio - (110.0 - 90.0) / expected_avg).abs() < 1e-9);
        assert!((agg.change_ratio - 0.05).abs() < 1e-9);
        // 30 minute span: per-hour change is double the change ratio.
        assert!((agg.change_per_hour - 0.10).abs() < 1e-9);
    }

    #[test]
    fn empty_window_is_no_data() {
        let mut window = MemoryWindow::fixed_range("BTC", ts(0), ts(30));
        assert!(matches!(window.calculate(), Err(CoinbotError::NoData(_))));
    }

    #[test]
    fn out_of_range_points_are_no_data() {
        let mut window = MemoryWindow::fixed_range("BTC", ts(10), ts(20));
        window.push(PricePoint::new(ts(0), 100.0));
        window.push(PricePoint::new(ts(30), 100.0));
        assert!(matches!(window.calculate(), Err(CoinbotError::NoData(_))));
        // Points outside the range were pruned.
        assert!(window.is_empty());
    }

    #[test]
    fn calculate_is_idempotent() {
        let mut window = filled_window();
        let a = window.calculate().unwrap();
        let b = window.calculate().unwrap();
        assert_eq!(a.count, b.count);
        assert_eq!(a.average, b.average);
        assert_eq!(a.change_per_hour, b.change_per_hour);
    }

    #[test]
    fn derive_from_matches_direct_range() {
        let bulk = filled_window();

        let mut derived = MemoryWindow::fixed_range("BTC", ts(10), ts(20));
        derived.derive_from(&bulk);

        let mut direct = MemoryWindow::fixed_range("BTC", ts(10), ts(20));
        direct.push(PricePoint::new(ts(10), 110.0));
        direct.push(PricePoint::new(ts(20), 90.0));

        let a = derived.calculate().unwrap();
        let b = direct.calculate().unwrap();
        assert_eq!(a.count, b.count);
        assert_eq!(a.first, b.first);
        assert_eq!(a.last, b.last);
        assert_eq!(a.average, b.average);
    }

    #[test]
    fn rolling_window_prunes_on_access() {
        let mut window = MemoryWindow::rolling("BTC", "10 min", Duration::minutes(10));
        window.push(PricePoint::new(ts(0), 100.0));
        window.push(PricePoint::new(ts(25), 105.0));
        window.set_end(ts(30));

        let agg = window.calculate().unwrap();
        assert_eq!(agg.count, 1);
        assert_eq!(agg.first, 105.0);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn last_returns_most_recent_in_range() {
        let mut window = filled_window();
        let last = window.last().unwrap();
        assert_eq!(last.price, 105.0);
    }

    #[test]
    fn zero_first_price_is_no_data() {
        let mut window = MemoryWindow::fixed_range("BTC", ts(0), ts(30));
        window.push(PricePoint::new(ts(0), 0.0));
        window.push(PricePoint::new(ts(10), 10.0));
        assert!(matches!(window.calculate(), Err(CoinbotError::NoData(_))));
    }
}
