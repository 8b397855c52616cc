use crate::error::{CoinbotError, Result};
use crate::exchange::{ExchangeAdapter, OrderMethod, OrderRequest};
use crate::models::{Intent, IntentKind, PricePoint, TradeSide, Transaction};
use crate::strategy::{LedgerView, Strategy};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Parameters shared by both ledger modes.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub code: String,
    /// Starting currency balance.
    pub funds: f64,
    /// Fee ratio charged per trade.
    pub fee: f64,
    /// Buys with a notional below this floor are declined.
    pub min_trade: f64,
    /// Flat reserve subtracted before sizing a buy.
    pub fixed_cost: f64,
}

impl LedgerConfig {
    pub fn new(code: &str, funds: f64, fee: f64) -> Self {
        Self {
            code: code.to_string(),
            funds,
            fee,
            min_trade: 100.0,
            fixed_cost: 10.0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.code.is_empty() {
            return Err(CoinbotError::Configuration(
                "ledger needs an asset code".to_string(),
            ));
        }
        if self.funds <= 0.0 {
            return Err(CoinbotError::Configuration(
                "ledger needs starting funds".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.fee) {
            return Err(CoinbotError::Configuration(
                "ledger fee must be a ratio in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// A trade the ledger has decided to make but not yet committed. In live
/// mode the exchange submission sits between plan and commit.
#[derive(Debug, Clone)]
pub struct PlannedTrade {
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub ts: DateTime<Utc>,
}

/// Realized and unrealized results of a transaction log.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerReport {
    /// Realized profit over completed buy/sell round trips.
    pub profit: f64,
    /// Round trips that closed at a gain.
    pub good: u32,
    /// Round trips that closed at a loss.
    pub bad: u32,
    /// Funds plus open inventory valued at the last observed price.
    pub value: f64,
}

/// Funds, inventory, and the append-only transaction log for one asset.
///
/// Invariant: funds and inventory never go negative. A buy that would break
/// that, or whose notional is below the minimum trade size, is a declined
/// trade, not an error. A sell with zero inventory is likewise skipped.
#[derive(Debug)]
pub struct Book {
    config: LedgerConfig,
    funds: f64,
    inventory: f64,
    last: Option<PricePoint>,
    transactions: Vec<Transaction>,
}

impl Book {
    fn new(config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let funds = config.funds;
        Ok(Self {
            config,
            funds,
            inventory: 0.0,
            last: None,
            transactions: Vec::new(),
        })
    }

    pub fn code(&self) -> &str {
        &self.config.code
    }

    pub fn funds(&self) -> f64 {
        self.funds
    }

    pub fn inventory(&self) -> f64 {
        self.inventory
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn last_transaction(&self) -> Option<&Transaction> {
        self.transactions.last()
    }

    fn view(&self) -> LedgerView {
        LedgerView {
            fee: self.config.fee,
            last_transaction: self.transactions.last().cloned(),
        }
    }

    fn observe(&mut self, point: &PricePoint) -> Result<()> {
        if !point.price.is_finite() || point.price <= 0.0 {
            return Err(CoinbotError::Feed(format!(
                "malformed price {} at {}",
                point.price, point.ts
            )));
        }
        self.last = Some(point.clone());
        Ok(())
    }

    /// Turn an actionable intent into a sized trade, or decline it. Market
    /// intents are filled at the last observed price.
    fn plan(&self, intent: &Intent) -> Option<PlannedTrade> {
        let price = intent.price.or(self.last.as_ref().map(|p| p.price))?;
        if price <= 0.0 {
            return None;
        }

        match intent.kind {
            IntentKind::Buy => {
                let fee = self.funds * self.config.fee;
                let quantity = (self.funds - fee - self.config.fixed_cost) / price;
                if quantity <= 0.0 {
                    return None;
                }
                let notional = quantity * price;
                if notional < self.config.min_trade {
                    tracing::debug!(
                        code = %self.config.code,
                        notional,
                        floor = self.config.min_trade,
                        "declined buy below minimum trade size"
                    );
                    return None;
                }
                if self.funds - notional < 0.0 {
                    return None;
                }
                Some(PlannedTrade {
                    side: TradeSide::Buy,
                    quantity,
                    price,
                    ts: intent.ts,
                })
            }
            IntentKind::Sell | IntentKind::StopLossSell => {
                if self.inventory <= 0.0 {
                    return None;
                }
                Some(PlannedTrade {
                    side: TradeSide::Sell,
                    quantity: self.inventory,
                    price,
                    ts: intent.ts,
                })
            }
            IntentKind::Defer => None,
        }
    }

    /// Apply a planned trade and append it to the log.
    fn commit(&mut self, plan: PlannedTrade, strategy: &str) -> Transaction {
        let total = plan.quantity * plan.price;
        match plan.side {
            TradeSide::Buy => {
                self.funds -= total;
                self.inventory += plan.quantity;
                tracing::info!(
                    code = %self.config.code,
                    quantity = plan.quantity,
                    price = plan.price,
                    total,
                    "bought"
                );
            }
            TradeSide::Sell => {
                self.inventory = 0.0;
                self.funds += total;
                tracing::info!(
                    code = %self.config.code,
                    quantity = plan.quantity,
                    price = plan.price,
                    total,
                    "sold"
                );
            }
        }

        let transaction = Transaction {
            side: plan.side,
            ts: plan.ts,
            code: self.config.code.clone(),
            strategy: strategy.to_string(),
            quantity: plan.quantity,
            price: plan.price,
            total,
        };
        self.transactions.push(transaction.clone());
        transaction
    }

    /// Fold the transaction log into realized profit: consecutive buy totals
    /// accumulate as debt that the next sell releases. Trailing unmatched
    /// buys contribute nothing until sold.
    pub fn calc(&self) -> LedgerReport {
        let mut profit = 0.0;
        let mut good = 0;
        let mut bad = 0;
        let mut debt = 0.0;

        for transaction in &self.transactions {
            match transaction.side {
                TradeSide::Buy => {
                    debt += transaction.total;
                }
                TradeSide::Sell => {
                    let realized = transaction.total - debt;
                    profit += realized;
                    if realized > 0.0 {
                        good += 1;
                    } else if realized < 0.0 {
                        bad += 1;
                    }
                    debt = 0.0;
                }
            }
        }

        let last_price = self.last.as_ref().map(|p| p.price).unwrap_or(0.0);
        LedgerReport {
            profit,
            good,
            bad,
            value: self.inventory * last_price + self.funds,
        }
    }
}

/// Execution ledger for backtests: plan and commit happen synchronously, and
/// the same input sequence always produces the same transaction log.
pub struct SimulationLedger {
    book: Book,
    strategy: Box<dyn Strategy>,
}

impl SimulationLedger {
    pub fn new(config: LedgerConfig, strategy: Box<dyn Strategy>) -> Result<Self> {
        Ok(Self {
            book: Book::new(config)?,
            strategy,
        })
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn strategy_mut(&mut self) -> &mut dyn Strategy {
        &mut *self.strategy
    }

    /// Process one tick: record it, consult the strategy, and act on the
    /// first actionable intent.
    pub fn update(&mut self, point: &PricePoint) -> Result<Option<Transaction>> {
        self.book.observe(point)?;

        let view = self.book.view();
        let intents = self.strategy.update(point, &view);
        let Some(intent) = intents.into_iter().find(|i| i.kind.is_actionable()) else {
            return Ok(None);
        };

        let Some(plan) = self.book.plan(&intent) else {
            return Ok(None);
        };

        let name = self.strategy.name().to_string();
        Ok(Some(self.book.commit(plan, &name)))
    }

    pub fn calc(&self) -> LedgerReport {
        self.book.calc()
    }
}

/// Execution ledger for live trading: the exchange adapter's record-then-
/// submit must succeed before funds and inventory move, so a failed remote
/// submission leaves the book unchanged.
///
/// Updates for one asset must be serialized: callers drive this from a single
/// per-asset task, processing ticks in arrival order.
pub struct LiveLedger {
    book: Book,
    strategy: Box<dyn Strategy>,
    adapter: Arc<dyn ExchangeAdapter>,
}

impl LiveLedger {
    pub fn new(
        config: LedgerConfig,
        strategy: Box<dyn Strategy>,
        adapter: Arc<dyn ExchangeAdapter>,
    ) -> Result<Self> {
        Ok(Self {
            book: Book::new(config)?,
            strategy,
            adapter,
        })
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub async fn update(&mut self, point: &PricePoint) -> Result<Option<Transaction>> {
        self.book.observe(point)?;

        let view = self.book.view();
        let intents = self.strategy.update(point, &view);
        let Some(intent) = intents.into_iter().find(|i| i.kind.is_actionable()) else {
            return Ok(None);
        };

        let Some(plan) = self.book.plan(&intent) else {
            return Ok(None);
        };

        let request = OrderRequest {
            client_order_id: Uuid::new_v4(),
            code: self.book.code().to_string(),
            side: plan.side,
            quantity: plan.quantity,
            price: plan.price,
            method: if intent.price.is_some() {
                OrderMethod::Limit
            } else {
                OrderMethod::Market
            },
            ts: plan.ts,
        };

        // Not downgraded: a failed submission aborts the commit and surfaces
        // for operator visibility.
        self.adapter.submit(&request).await?;

        let name = self.strategy.name().to_string();
        Ok(Some(self.book.commit(plan, &name)))
    }

    pub fn calc(&self) -> LedgerReport {
        self.book.calc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrderError;
    use crate::exchange::OrderAck;
    use crate::models::Intent;
    use crate::strategy::LedgerView;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    /// Strategy that replays a fixed script of intents.
    struct Scripted {
        intents: Vec<Intent>,
        cursor: usize,
    }

    impl Scripted {
        fn new(intents: Vec<Intent>) -> Self {
            Self { intents, cursor: 0 }
        }
    }

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn code(&self) -> &str {
            "BTC"
        }

        fn update(&mut self, point: &PricePoint, _ledger: &LedgerView) -> Vec<Intent> {
            let intent = self
                .intents
                .get(self.cursor)
                .cloned()
                .unwrap_or_else(|| Intent::defer(point.ts));
            self.cursor += 1;
            vec![intent]
        }
    }

    fn intent(kind: IntentKind, price: f64) -> Intent {
        Intent {
            kind,
            price: Some(price),
            reason: "scripted".to_string(),
            ts: ts(0),
        }
    }

    fn ledger(script: Vec<Intent>) -> SimulationLedger {
        let mut config = LedgerConfig::new("BTC", 1000.0, 0.0);
        config.fixed_cost = 0.0;
        SimulationLedger::new(config, Box::new(Scripted::new(script))).unwrap()
    }

    #[test]
    fn round_trip_profit() {
        let mut ledger = ledger(vec![
            intent(IntentKind::Buy, 100.0),
            intent(IntentKind::Sell, 120.0),
        ]);

        // Zero fee and fixed cost: all 1000 buys 10 units at 100.
        let buy = ledger.update(&PricePoint::new(ts(1), 100.0)).unwrap().unwrap();
        assert_eq!(buy.side, TradeSide::Buy);
        assert!((buy.quantity - 10.0).abs() < 1e-9);
        assert!((buy.total - 1000.0).abs() < 1e-9);

        let sell = ledger.update(&PricePoint::new(ts(2), 120.0)).unwrap().unwrap();
        assert_eq!(sell.side, TradeSide::Sell);
        assert!((sell.total - 1200.0).abs() < 1e-9);

        let report = ledger.calc();
        assert!((report.profit - 200.0).abs() < 1e-9);
        assert_eq!(report.good, 1);
        assert_eq!(report.bad, 0);
        assert!((report.value - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn losing_round_trip_counts_bad() {
        let mut ledger = ledger(vec![
            intent(IntentKind::Buy, 100.0),
            intent(IntentKind::Sell, 80.0),
        ]);

        ledger.update(&PricePoint::new(ts(1), 100.0)).unwrap();
        ledger.update(&PricePoint::new(ts(2), 80.0)).unwrap();

        let report = ledger.calc();
        assert!((report.profit + 200.0).abs() < 1e-9);
        assert_eq!(report.good, 0);
        assert_eq!(report.bad, 1);
    }

    #[test]
    fn sell_with_zero_inventory_is_skipped() {
        let mut ledger = ledger(vec![intent(IntentKind::Sell, 120.0)]);
        let result = ledger.update(&PricePoint::new(ts(1), 120.0)).unwrap();
        assert!(result.is_none());
        assert!(ledger.book().transactions().is_empty());
        assert_eq!(ledger.book().funds(), 1000.0);
    }

    #[test]
    fn funds_and_inventory_never_negative() {
        let mut ledger = ledger(vec![
            intent(IntentKind::Buy, 100.0),
            intent(IntentKind::Buy, 100.0),
            intent(IntentKind::Sell, 50.0),
            intent(IntentKind::Sell, 50.0),
        ]);

        for hour in 1..=4 {
            ledger.update(&PricePoint::new(ts(hour), 100.0)).unwrap();
        }

        assert!(ledger.book().funds() >= 0.0);
        assert!(ledger.book().inventory() >= 0.0);
    }

    #[test]
    fn buy_below_minimum_trade_is_declined() {
        let mut config = LedgerConfig::new("BTC", 50.0, 0.0);
        config.fixed_cost = 0.0;
        let mut ledger = SimulationLedger::new(
            config,
            Box::new(Scripted::new(vec![intent(IntentKind::Buy, 100.0)])),
        )
        .unwrap();

        let result = ledger.update(&PricePoint::new(ts(1), 100.0)).unwrap();
        assert!(result.is_none());
        assert!(ledger.book().transactions().is_empty());
    }

    #[test]
    fn stop_loss_sell_liquidates_inventory() {
        let mut ledger = ledger(vec![
            intent(IntentKind::Buy, 100.0),
            intent(IntentKind::StopLossSell, 84.0),
        ]);

        ledger.update(&PricePoint::new(ts(1), 100.0)).unwrap();
        let sell = ledger.update(&PricePoint::new(ts(2), 84.0)).unwrap().unwrap();
        assert_eq!(sell.side, TradeSide::Sell);
        assert_eq!(ledger.book().inventory(), 0.0);
    }

    #[test]
    fn market_intent_fills_at_last_price() {
        let script = vec![Intent {
            kind: IntentKind::Buy,
            price: None,
            reason: "market".to_string(),
            ts: ts(0),
        }];
        let mut ledger = ledger(script);

        let buy = ledger.update(&PricePoint::new(ts(1), 250.0)).unwrap().unwrap();
        assert!((buy.price - 250.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_tick_is_an_error() {
        let mut ledger = ledger(vec![]);
        assert!(ledger.update(&PricePoint::new(ts(1), f64::NAN)).is_err());
        assert!(ledger.update(&PricePoint::new(ts(1), -5.0)).is_err());
    }

    #[test]
    fn config_validation() {
        assert!(Book::new(LedgerConfig::new("", 1000.0, 0.0025)).is_err());
        assert!(Book::new(LedgerConfig::new("BTC", 0.0, 0.0025)).is_err());
        assert!(Book::new(LedgerConfig::new("BTC", 1000.0, 1.5)).is_err());
    }

    /// Adapter that always fails, for checking the live commit contract.
    struct FailingAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExchangeAdapter for FailingAdapter {
        async fn submit(
            &self,
            _request: &OrderRequest,
        ) -> std::result::Result<OrderAck, OrderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(OrderError::Timeout)
        }

        async fn cancel_all(&self) -> std::result::Result<(), OrderError> {
            Ok(())
        }
    }

    struct AckingAdapter;

    #[async_trait]
    impl ExchangeAdapter for AckingAdapter {
        async fn submit(
            &self,
            request: &OrderRequest,
        ) -> std::result::Result<OrderAck, OrderError> {
            Ok(OrderAck {
                client_order_id: request.client_order_id,
                order_id: Some("1".to_string()),
            })
        }

        async fn cancel_all(&self) -> std::result::Result<(), OrderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_submission_leaves_book_unchanged() {
        let adapter = Arc::new(FailingAdapter {
            calls: AtomicUsize::new(0),
        });
        let mut config = LedgerConfig::new("BTC", 1000.0, 0.0);
        config.fixed_cost = 0.0;
        let mut ledger = LiveLedger::new(
            config,
            Box::new(Scripted::new(vec![intent(IntentKind::Buy, 100.0)])),
            adapter.clone(),
        )
        .unwrap();

        let result = ledger.update(&PricePoint::new(ts(1), 100.0)).await;
        assert!(result.is_err());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.book().funds(), 1000.0);
        assert_eq!(ledger.book().inventory(), 0.0);
        assert!(ledger.book().transactions().is_empty());
    }

    #[tokio::test]
    async fn acknowledged_submission_commits() {
        let mut config = LedgerConfig::new("BTC", 1000.0, 0.0);
        config.fixed_cost = 0.0;
        let mut ledger = LiveLedger::new(
            config,
            Box::new(Scripted::new(vec![intent(IntentKind::Buy, 100.0)])),
            Arc::new(AckingAdapter),
        )
        .unwrap();

        let transaction = ledger
            .update(&PricePoint::new(ts(1), 100.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(transaction.side, TradeSide::Buy);
        assert!(ledger.book().inventory() > 0.0);
    }
}
