use crate::error::{CoinbotError, Result};
use crate::models::{Intent, IntentKind, PricePoint};
use crate::strategy::{favorable_to_buy, favorable_to_sell, LedgerView, Strategy, StrategyCore};
use crate::window::MemoryWindow;
use chrono::Duration;

/// Parameters for [`TrendFollowingStrategy`].
#[derive(Debug, Clone)]
pub struct TrendConfig {
    pub name: String,
    pub code: String,
    /// Span of the single observation window, re-anchored to each tick.
    pub period: Duration,
    /// Change ratio above which the trend counts as rising.
    pub rising: f64,
    /// Change ratio below which the trend counts as falling.
    pub falling: f64,
    /// Ratio applied to the tick price when pricing an order.
    pub adjustment: f64,
    /// Grace period after which an unfavorable trade is allowed.
    pub max_hold: Duration,
    pub stoploss_ratio: f64,
}

impl TrendConfig {
    pub fn new(name: &str, code: &str, period: Duration, rising: f64, falling: f64) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
            period,
            rising,
            falling,
            adjustment: 0.00025,
            max_hold: Duration::days(7),
            stoploss_ratio: 0.15,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.code.is_empty() {
            return Err(CoinbotError::Configuration(
                "trend strategy needs a name and an asset code".to_string(),
            ));
        }
        if self.period <= Duration::zero() {
            return Err(CoinbotError::Configuration(
                "trend period must be positive".to_string(),
            ));
        }
        if self.rising <= 0.0 || self.falling >= 0.0 {
            return Err(CoinbotError::Configuration(
                "trend rising threshold must be positive and falling negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trend following: buy when the change ratio over one window exceeds the
/// rising threshold, sell when it drops below the falling threshold, subject
/// to the favorability and max-hold guards.
pub struct TrendFollowingStrategy {
    config: TrendConfig,
    core: StrategyCore,
    window: MemoryWindow,
}

impl TrendFollowingStrategy {
    pub fn new(config: TrendConfig) -> Result<Self> {
        config.validate()?;
        let window = MemoryWindow::fixed(&config.code, "trend");
        let core = StrategyCore::new(&config.name, &config.code, config.stoploss_ratio);
        Ok(Self {
            config,
            core,
            window,
        })
    }
}

impl Strategy for TrendFollowingStrategy {
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

        self.window
            .set_range(point.ts - self.config.period, point.ts);
        self.window.push(point.clone());

        let intent = match self.window.calculate() {
            Ok(calc) => {
                if calc.change_ratio > self.config.rising
                    && favorable_to_buy(point, ledger, self.config.max_hold)
                {
                    Intent {
                        kind: IntentKind::Buy,
                        price: Some(point.price * (1.0 + self.config.adjustment)),
                        reason: format!("change ratio {:.4} above rising threshold", calc.change_ratio),
                        ts: point.ts,
                    }
                } else if calc.change_ratio < self.config.falling
                    && favorable_to_sell(point, ledger, self.config.max_hold)
                {
                    Intent {
                        kind: IntentKind::Sell,
                        price: Some(point.price * (1.0 - self.config.adjustment)),
                        reason: format!("change ratio {:.4} below falling threshold", calc.change_ratio),
                        ts: point.ts,
                    }
                } else {
                    Intent::defer(point.ts)
                }
            }
            Err(error) => {
                tracing::warn!(
                    strategy = %self.core.name,
                    %error,
                    "window calculation failed, no signal this tick"
                );
                Intent::defer(point.ts)
            }
        };

        self.core.note(&intent);
        intents.push(intent);
        intents
    }

    fn hydrate(&mut self, history: &MemoryWindow) {
        if let Some(end) = history.points().last().map(|p| p.ts) {
            self.window.set_range(end - self.config.period, end);
        }
        self.window.derive_from(history);
    }

    fn lookback(&self) -> Duration {
        self.config.period
    }
}
