use chrono::{DateTime, Duration, TimeZone, Utc};
use coinbot::backtest::{replay, MarketScenario, SyntheticTicks};
use coinbot::ledger::{LedgerConfig, SimulationLedger};
use coinbot::models::{PricePoint, TradeSide};
use coinbot::strategy::{
    Direction, MidpointConfig, MidpointReversionStrategy, RapidChangeConfig, RapidChangeStrategy,
    RapidWindowConfig, SlopeConfig, SlopeDetectionStrategy, Strategy,
};
use coinbot::window::MemoryWindow;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

fn config() -> LedgerConfig {
    LedgerConfig::new("BTC", 1000.0, 0.0025)
}

fn rapid_strategy() -> RapidChangeStrategy {
    RapidChangeStrategy::new(RapidChangeConfig::new(
        "rapid.sim",
        "BTC",
        vec![
            RapidWindowConfig {
                direction: Direction::Fall,
                period: Duration::hours(1),
                threshold: -0.05,
            },
            RapidWindowConfig {
                direction: Direction::Rise,
                period: Duration::hours(1),
                threshold: 0.05,
            },
        ],
    ))
    .unwrap()
}

#[test]
fn synthetic_replay_is_deterministic() {
    let run = || {
        let mut ticks = SyntheticTicks::new(7);
        let points = ticks.generate(
            MarketScenario::Volatile,
            start(),
            2000,
            Duration::minutes(5),
        );
        let mut ledger = SimulationLedger::new(config(), Box::new(rapid_strategy())).unwrap();
        let report = replay(&mut ledger, &points);
        (report, ledger.book().funds(), ledger.book().inventory())
    };

    let (report_a, funds_a, inventory_a) = run();
    let (report_b, funds_b, inventory_b) = run();

    assert_eq!(report_a.ticks, 2000);
    assert_eq!(report_a.failed_ticks, 0);
    assert_eq!(report_a.transactions, report_b.transactions);
    assert_eq!(report_a.profit, report_b.profit);
    assert_eq!(report_a.value, report_b.value);
    assert_eq!(funds_a, funds_b);
    assert_eq!(inventory_a, inventory_b);
}

#[test]
fn book_invariants_hold_across_market_shapes() {
    for (seed, scenario) in [
        (11, MarketScenario::Uptrend),
        (12, MarketScenario::Downtrend),
        (13, MarketScenario::Sideways),
        (14, MarketScenario::Volatile),
    ] {
        let mut ticks = SyntheticTicks::new(seed);
        let points = ticks.generate(scenario, start(), 1500, Duration::minutes(15));

        let strategy = SlopeDetectionStrategy::new(SlopeConfig::new(
            "slope.sim",
            "BTC",
            Duration::hours(1),
            3,
        ))
        .unwrap();
        let mut ledger = SimulationLedger::new(config(), Box::new(strategy)).unwrap();
        let report = replay(&mut ledger, &points);

        assert_eq!(report.failed_ticks, 0);
        assert!(ledger.book().funds() >= 0.0);
        assert!(ledger.book().inventory() >= 0.0);
        assert!(report.value >= 0.0);
        assert!(report.value.is_finite());
    }
}

/// Full round trip through the midpoint strategy: warm it on flat history,
/// break below the band to buy, break above it to sell at a gain.
#[test]
fn midpoint_round_trip_realizes_profit() {
    let mut strategy =
        MidpointReversionStrategy::new(MidpointConfig::new("midpoint.sim", "BTC", 10.0)).unwrap();

    let mut history = MemoryWindow::fixed_range("BTC", start() - Duration::days(60), start());
    let mut cursor = start() - Duration::days(60);
    while cursor <= start() {
        history.push(PricePoint::new(cursor, 100.0));
        cursor += Duration::hours(1);
    }
    strategy.hydrate(&history);

    let mut ledger = SimulationLedger::new(config(), Box::new(strategy)).unwrap();
    let points = vec![
        // First tick is a think cycle and anchors the midpoint at 100.
        PricePoint::new(start(), 100.0),
        PricePoint::new(start() + Duration::hours(1), 90.0),
        PricePoint::new(start() + Duration::hours(2), 110.0),
    ];
    let report = replay(&mut ledger, &points);

    let transactions = ledger.book().transactions();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0].side, TradeSide::Buy);
    assert_eq!(transactions[1].side, TradeSide::Sell);
    assert!(report.profit > 0.0);
    assert_eq!(report.good, 1);
    assert_eq!(report.bad, 0);
    assert_eq!(ledger.book().inventory(), 0.0);
}
