use crate::error::{CoinbotError, Result};
use crate::models::{Intent, IntentKind, PricePoint};
use crate::strategy::{favorable_to_buy, favorable_to_sell, LedgerView, Strategy, StrategyCore};
use crate::window::MemoryWindow;
use chrono::{DateTime, Duration, Utc};

/// Parameters for [`MidpointReversionStrategy`].
#[derive(Debug, Clone)]
pub struct MidpointConfig {
    pub name: String,
    pub code: String,
    /// Width of the band around the midpoint: buy below `midpoint - range/2`,
    /// sell above `midpoint + range/2`.
    pub range: f64,
    /// How often the midpoint is recomputed.
    pub think: Duration,
    /// Base period of the smallest averaging window.
    pub consider: Duration,
    /// Weights over the five averaging windows, smallest first.
    pub weights: [f64; 5],
    /// Geometric growth factor between averaging windows.
    pub scale: u32,
    /// Ratio applied to the tick price when pricing an order.
    pub adjustment: f64,
    /// Grace period after which an unfavorable trade is allowed.
    pub max_hold: Duration,
    pub stoploss_ratio: f64,
}

impl MidpointConfig {
    pub fn new(name: &str, code: &str, range: f64) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
            range,
            think: Duration::hours(4),
            consider: Duration::hours(4),
            weights: [5.0 / 15.0, 4.0 / 15.0, 3.0 / 15.0, 2.0 / 15.0, 1.0 / 15.0],
            scale: 4,
            adjustment: 0.00025,
            max_hold: Duration::days(7),
            stoploss_ratio: 0.15,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.code.is_empty() {
            return Err(CoinbotError::Configuration(
                "midpoint strategy needs a name and an asset code".to_string(),
            ));
        }
        if self.range <= 0.0 {
            return Err(CoinbotError::Configuration(
                "midpoint range must be positive".to_string(),
            ));
        }
        if self.think <= Duration::zero() || self.consider <= Duration::zero() {
            return Err(CoinbotError::Configuration(
                "midpoint think and consider periods must be positive".to_string(),
            ));
        }
        if self.scale < 2 {
            return Err(CoinbotError::Configuration(
                "midpoint scale must be at least 2".to_string(),
            ));
        }
        if self.weights.iter().any(|w| *w < 0.0) {
            return Err(CoinbotError::Configuration(
                "midpoint weights must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Period of the largest averaging window.
    fn horizon(&self) -> Duration {
        self.consider * self.scale.pow(4) as i32
    }
}

/// Midpoint reversion: periodically estimate a target midpoint as a weighted
/// sum of averages over geometrically growing windows, then buy below the
/// band and sell above it between think cycles.
pub struct MidpointReversionStrategy {
    config: MidpointConfig,
    core: StrategyCore,
    history: MemoryWindow,
    midpoint: Option<f64>,
    last_think: Option<DateTime<Utc>>,
}

impl MidpointReversionStrategy {
    pub fn new(config: MidpointConfig) -> Result<Self> {
        config.validate()?;
        let history = MemoryWindow::rolling(&config.code, "midpoint history", config.horizon());
        let core = StrategyCore::new(&config.name, &config.code, config.stoploss_ratio);
        Ok(Self {
            config,
            core,
            history,
            midpoint: None,
            last_think: None,
        })
    }

    pub fn midpoint(&self) -> Option<f64> {
        self.midpoint
    }

    /// Recompute the midpoint from the history window. A window that fails to
    /// calculate contributes nothing; the midpoint is only replaced when at
    /// least one weighted window produced an average.
    fn think(&mut self, point: &PricePoint) {
        // Reclaim samples older than the largest window before cloning the
        // history into the per-window ranges.
        self.history.trim();

        let mut midpoint = 0.0;
        let mut any = false;
        let mut consider = self.config.consider;

        for weight in self.config.weights {
            let mut window =
                MemoryWindow::fixed_range(&self.config.code, point.ts - consider, point.ts);
            window.derive_from(&self.history);

            match window.calculate() {
                Ok(calc) => {
                    if weight > 0.0 {
                        midpoint += calc.average * weight;
                        any = true;
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        strategy = %self.core.name,
                        period_hours = consider.num_hours(),
                        %error,
                        "think window failed, skipping"
                    );
                }
            }

            consider = consider * self.config.scale as i32;
        }

        if any {
            self.midpoint = Some(midpoint);
            tracing::debug!(
                strategy = %self.core.name,
                midpoint,
                ts = %point.ts,
                "midpoint recomputed"
            );
        }
        self.last_think = Some(point.ts);
    }

    fn decide(&mut self, point: &PricePoint, ledger: &LedgerView) -> Intent {
        let Some(midpoint) = self.midpoint else {
            return Intent::defer(point.ts);
        };

        let buy_at = midpoint - self.config.range / 2.0;
        let sell_at = midpoint + self.config.range / 2.0;

        if point.price < buy_at && favorable_to_buy(point, ledger, self.config.max_hold) {
            Intent {
                kind: IntentKind::Buy,
                price: Some(point.price * (1.0 + self.config.adjustment)),
                reason: format!("price below midpoint band floor {buy_at:.2}"),
                ts: point.ts,
            }
        } else if point.price > sell_at && favorable_to_sell(point, ledger, self.config.max_hold) {
            Intent {
                kind: IntentKind::Sell,
                price: Some(point.price * (1.0 - self.config.adjustment)),
                reason: format!("price above midpoint band ceiling {sell_at:.2}"),
                ts: point.ts,
            }
        } else {
            Intent::defer(point.ts)
        }
    }
}

impl Strategy for MidpointReversionStrategy {
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

        self.history.set_end(point.ts);

        let due = self
            .last_think
            .map_or(true, |last| last + self.config.think < point.ts);
        let intent = if due {
            self.think(point);
            Intent::defer(point.ts)
        } else {
            self.decide(point, ledger)
        };
        // The in-flight tick joins the history only after the think branch:
        // a cold start must not mint a midpoint from its own first sample.
        self.history.push(point.clone());

        self.core.note(&intent);
        intents.push(intent);
        intents
    }

    fn hydrate(&mut self, history: &MemoryWindow) {
        if let Some(end) = history.points().last().map(|p| p.ts) {
            self.history.set_end(end);
        }
        self.history.derive_from(history);
    }

    fn lookback(&self) -> Duration {
        self.config.horizon()
    }
}
