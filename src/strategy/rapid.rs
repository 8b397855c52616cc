use crate::error::{CoinbotError, Result};
use crate::models::{Intent, IntentKind, PricePoint};
use crate::strategy::{LedgerView, Strategy, StrategyCore};
use crate::window::MemoryWindow;
use chrono::Duration;

/// The direction a rapid-change window is watching for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Fall,
    Rise,
    Stable,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Fall => "fall",
            Direction::Rise => "rise",
            Direction::Stable => "stable",
        }
    }
}

/// One independently configured watch window.
#[derive(Debug, Clone)]
pub struct RapidWindowConfig {
    pub direction: Direction,
    pub period: Duration,
    /// Change-ratio trigger. Falls trigger at or below it, rises at or above
    /// it, and stable windows trigger while the change stays inside `±|it|`.
    pub threshold: f64,
}

/// Parameters for [`RapidChangeStrategy`].
#[derive(Debug, Clone)]
pub struct RapidChangeConfig {
    pub name: String,
    pub code: String,
    pub windows: Vec<RapidWindowConfig>,
    pub stoploss_ratio: f64,
}

impl RapidChangeConfig {
    pub fn new(name: &str, code: &str, windows: Vec<RapidWindowConfig>) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
            windows,
            stoploss_ratio: 0.15,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.code.is_empty() {
            return Err(CoinbotError::Configuration(
                "rapid-change strategy needs a name and an asset code".to_string(),
            ));
        }
        if self.windows.is_empty() {
            return Err(CoinbotError::Configuration(
                "rapid-change strategy needs at least one window".to_string(),
            ));
        }
        if self
            .windows
            .iter()
            .any(|w| w.period <= Duration::zero())
        {
            return Err(CoinbotError::Configuration(
                "rapid-change window periods must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

struct Watch {
    config: RapidWindowConfig,
    window: MemoryWindow,
    triggered: bool,
}

impl Watch {
    fn is_triggered(&self, change_ratio: f64) -> bool {
        match self.config.direction {
            Direction::Fall => change_ratio <= self.config.threshold,
            Direction::Rise => change_ratio >= self.config.threshold,
            Direction::Stable => change_ratio.abs() < self.config.threshold.abs(),
        }
    }
}

/// Rapid change: a set of independently tagged watch windows; a signal is
/// emitted only when every triggered window carries the same tag, so one
/// dissenting window silences the group.
pub struct RapidChangeStrategy {
    core: StrategyCore,
    watches: Vec<Watch>,
}

impl RapidChangeStrategy {
    pub fn new(config: RapidChangeConfig) -> Result<Self> {
        config.validate()?;

        let watches = config
            .windows
            .iter()
            .map(|w| Watch {
                window: MemoryWindow::fixed(
                    &config.code,
                    &format!("{}:{}h", w.direction.as_str(), w.period.num_hours()),
                ),
                config: w.clone(),
                triggered: false,
            })
            .collect();

        let core = StrategyCore::new(&config.name, &config.code, config.stoploss_ratio);
        Ok(Self { core, watches })
    }

    /// Recompute every watch window. `None` means a window failed and the
    /// tick produces no signal.
    fn observe(&mut self, point: &PricePoint) -> Option<()> {
        let mut failed = false;

        for watch in &mut self.watches {
            watch
                .window
                .set_range(point.ts - watch.config.period, point.ts);
            watch.window.push(point.clone());
            match watch.window.calculate() {
                Ok(calc) => {
                    watch.triggered = watch.is_triggered(calc.change_ratio);
                }
                Err(error) => {
                    watch.triggered = false;
                    failed = true;
                    tracing::warn!(
                        strategy = %self.core.name,
                        window = %watch.window.name(),
                        %error,
                        "window calculation failed, no signal this tick"
                    );
                }
            }
        }

        if failed {
            None
        } else {
            Some(())
        }
    }

    /// The single direction shared by all triggered windows, if any.
    fn consensus(&self) -> Option<Direction> {
        let mut triggered = self.watches.iter().filter(|w| w.triggered);
        let first = triggered.next()?.config.direction;
        if triggered.all(|w| w.config.direction == first) {
            Some(first)
        } else {
            None
        }
    }
}

impl Strategy for RapidChangeStrategy {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn code(&self) -> &str {
        &self.core.code
    }

    fn update(&mut self, point: &PricePoint, ledger: &LedgerView) -> Vec<Intent> {
        let mut intents = Vec::new();
        if let Some(stop) = self.core.stop_loss(point, ledger) {
            intents.push(stop);
        }

        let intent = match self.observe(point).and_then(|_| self.consensus()) {
            Some(Direction::Fall) => Intent {
                kind: IntentKind::Sell,
                price: None,
                reason: "all triggered windows falling".to_string(),
                ts: point.ts,
            },
            Some(Direction::Rise) => Intent {
                kind: IntentKind::Buy,
                price: None,
                reason: "all triggered windows rising".to_string(),
                ts: point.ts,
            },
            Some(Direction::Stable) | None => Intent::defer(point.ts),
        };

        self.core.note(&intent);
        intents.push(intent);
        intents
    }

    fn hydrate(&mut self, history: &MemoryWindow) {
        let end = history.points().last().map(|p| p.ts);
        for watch in &mut self.watches {
            if let Some(end) = end {
                watch.window.set_range(end - watch.config.period, end);
            }
            watch.window.derive_from(history);
        }
    }

    fn lookback(&self) -> Duration {
        self.watches
            .iter()
            .map(|w| w.config.period)
            .max()
            .unwrap_or_else(Duration::zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testutil::ts;

    fn strategy() -> RapidChangeStrategy {
        RapidChangeStrategy::new(RapidChangeConfig::new(
            "rapid.test",
            "BTC",
            vec![
                RapidWindowConfig {
                    direction: Direction::Fall,
                    period: Duration::hours(1),
                    threshold: -0.03,
                },
                RapidWindowConfig {
                    direction: Direction::Rise,
                    period: Duration::hours(1),
                    threshold: 0.03,
                },
                RapidWindowConfig {
                    direction: Direction::Stable,
                    period: Duration::hours(4),
                    threshold: 0.03,
                },
            ],
        ))
        .unwrap()
    }

    fn feed(s: &mut RapidChangeStrategy, prices: &[f64]) -> Vec<Intent> {
        let mut last = Vec::new();
        for (i, price) in prices.iter().enumerate() {
            let at = ts(0, 0) + Duration::minutes(15 * i as i64);
            last = s.update(&PricePoint::new(at, *price), &LedgerView::default());
        }
        last
    }

    #[test]
    fn unanimous_fall_sells() {
        let mut s = strategy();
        // A 10% slide in an hour trips the fall window; the stable window
        // sees the same slide and stays untriggered.
        let intents = feed(&mut s, &[100.0, 97.0, 94.0, 92.0, 90.0]);
        let intent = intents.iter().find(|i| i.kind.is_actionable()).unwrap();
        assert_eq!(intent.kind, IntentKind::Sell);
    }

    #[test]
    fn unanimous_rise_buys() {
        let mut s = strategy();
        let intents = feed(&mut s, &[100.0, 103.0, 106.0, 108.0, 110.0]);
        let intent = intents.iter().find(|i| i.kind.is_actionable()).unwrap();
        assert_eq!(intent.kind, IntentKind::Buy);
    }

    #[test]
    fn stable_market_defers() {
        let mut s = strategy();
        let intents = feed(&mut s, &[100.0, 100.2, 99.9, 100.1, 100.0]);
        assert!(intents.iter().all(|i| !i.kind.is_actionable()));
    }

    #[test]
    fn rejects_empty_window_set() {
        assert!(RapidChangeStrategy::new(RapidChangeConfig::new("r", "BTC", vec![])).is_err());
    }
}
