use crate::error::{CoinbotError, Result};
use crate::models::{Intent, IntentKind, PricePoint};
use crate::strategy::{LedgerView, Strategy, StrategyCore};
use crate::window::MemoryWindow;
use chrono::Duration;

/// Parameters for [`SlopeDetectionStrategy`].
#[derive(Debug, Clone)]
pub struct SlopeConfig {
    pub name: String,
    pub code: String,
    /// Period of the smallest window; each further window doubles it.
    pub period: Duration,
    /// Number of windows.
    pub periods: usize,
    /// Per-hour change beyond which a window counts as rising or falling.
    pub threshold: f64,
    pub stoploss_ratio: f64,
}

impl SlopeConfig {
    pub fn new(name: &str, code: &str, period: Duration, periods: usize) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
            period,
            periods,
            threshold: 0.01,
            stoploss_ratio: 0.15,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.code.is_empty() {
            return Err(CoinbotError::Configuration(
                "slope strategy needs a name and an asset code".to_string(),
            ));
        }
        if self.period <= Duration::zero() {
            return Err(CoinbotError::Configuration(
                "slope period must be positive".to_string(),
            ));
        }
        if self.periods == 0 {
            return Err(CoinbotError::Configuration(
                "slope strategy needs at least one window".to_string(),
            ));
        }
        if self.threshold <= 0.0 {
            return Err(CoinbotError::Configuration(
                "slope threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Slope detection: classify the per-hour change of each of a ladder of
/// doubling rolling windows as rising, falling, or stable; trade only on a
/// strict majority in one direction.
pub struct SlopeDetectionStrategy {
    config: SlopeConfig,
    core: StrategyCore,
    windows: Vec<MemoryWindow>,
}

impl SlopeDetectionStrategy {
    pub fn new(config: SlopeConfig) -> Result<Self> {
        config.validate()?;

        let windows = (0..config.periods)
            .map(|i| {
                let period = config.period * 2_i32.pow(i as u32);
                MemoryWindow::rolling(
                    &config.code,
                    &format!("slope {}h", period.num_hours()),
                    period,
                )
            })
            .collect();

        let core = StrategyCore::new(&config.name, &config.code, config.stoploss_ratio);
        Ok(Self {
            config,
            core,
            windows,
        })
    }

    fn classify(&mut self, point: &PricePoint) -> Option<(usize, usize, usize)> {
        let mut rising = 0;
        let mut falling = 0;
        let mut stable = 0;

        for window in &mut self.windows {
            window.set_end(point.ts);
            window.push(point.clone());
            match window.calculate() {
                Ok(calc) => {
                    if calc.change_per_hour > self.config.threshold {
                        rising += 1;
                    } else if calc.change_per_hour < -self.config.threshold {
                        falling += 1;
                    } else {
                        stable += 1;
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        strategy = %self.core.name,
                        window = %window.name(),
                        %error,
                        "window calculation failed, no signal this tick"
                    );
                    return None;
                }
            }
        }

        Some((rising, falling, stable))
    }
}

impl Strategy for SlopeDetectionStrategy {
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

        let intent = match self.classify(point) {
            Some((rising, falling, stable)) => {
                if rising > falling && rising > stable {
                    Intent {
                        kind: IntentKind::Buy,
                        price: None,
                        reason: format!("{rising}/{} windows rising", self.windows.len()),
                        ts: point.ts,
                    }
                } else if falling > rising && falling > stable {
                    Intent {
                        kind: IntentKind::Sell,
                        price: None,
                        reason: format!("{falling}/{} windows falling", self.windows.len()),
                        ts: point.ts,
                    }
                } else {
                    Intent::defer(point.ts)
                }
            }
            None => Intent::defer(point.ts),
        };

        self.core.note(&intent);
        intents.push(intent);
        intents
    }

    fn hydrate(&mut self, history: &MemoryWindow) {
        let end = history.points().last().map(|p| p.ts);
        for window in &mut self.windows {
            if let Some(end) = end {
                window.set_end(end);
            }
            window.derive_from(history);
        }
    }

    fn lookback(&self) -> Duration {
        self.config.period * 2_i32.pow((self.config.periods - 1) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testutil::ts;

    fn strategy() -> SlopeDetectionStrategy {
        SlopeDetectionStrategy::new(SlopeConfig::new(
            "slope.test",
            "BTC",
            Duration::hours(1),
            3,
        ))
        .unwrap()
    }

    fn feed(s: &mut SlopeDetectionStrategy, hours: i64, f: impl Fn(i64) -> f64) -> Vec<Intent> {
        let mut last = Vec::new();
        let start = ts(0, 0);
        for step in 0..=(hours * 4) {
            let at = start + Duration::minutes(step * 15);
            last = s.update(&PricePoint::new(at, f(step)), &LedgerView::default());
        }
        last
    }

    #[test]
    fn all_windows_falling_sells() {
        let mut s = strategy();
        // 5% drop per 15 minutes: far past -1%/hour in every window.
        let intents = feed(&mut s, 8, |step| 400.0 - step as f64 * 5.0);
        let intent = intents.iter().find(|i| i.kind.is_actionable()).unwrap();
        assert_eq!(intent.kind, IntentKind::Sell);
        assert!(intent.price.is_none());
    }

    #[test]
    fn all_windows_rising_buys() {
        let mut s = strategy();
        let intents = feed(&mut s, 8, |step| 100.0 + step as f64 * 5.0);
        let intent = intents.iter().find(|i| i.kind.is_actionable()).unwrap();
        assert_eq!(intent.kind, IntentKind::Buy);
    }

    #[test]
    fn flat_prices_defer() {
        let mut s = strategy();
        let intents = feed(&mut s, 8, |_| 100.0);
        assert!(intents.iter().all(|i| !i.kind.is_actionable()));
    }

    #[test]
    fn mixed_signals_defer() {
        let mut s = strategy();
        // Steep fall into hour six, nearly flat through hour seven, then a
        // recovery: the 4h window falls, the 2h window is stable, and the 1h
        // window rises. One of each direction is not a majority.
        let intents = feed(&mut s, 8, |step| {
            if step <= 16 {
                500.0 - step as f64 * 6.25
            } else if step <= 24 {
                400.0 - (step - 16) as f64 * 12.5
            } else if step <= 28 {
                300.0 - (step - 24) as f64 * 0.25
            } else {
                299.0 + (step - 28) as f64 * 1.5
            }
        });
        assert!(intents.iter().all(|i| !i.kind.is_actionable()));
    }

    #[test]
    fn rejects_zero_windows() {
        assert!(
            SlopeDetectionStrategy::new(SlopeConfig::new("s", "BTC", Duration::hours(1), 0))
                .is_err()
        );
    }
}
