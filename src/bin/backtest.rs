use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, ValueEnum};
use coinbot::backtest::BacktestRunner;
use coinbot::ledger::LedgerConfig;
use coinbot::storage::PriceStore;
use coinbot::strategy::{
    Direction, MidpointConfig, MidpointReversionStrategy, RapidChangeConfig, RapidChangeStrategy,
    RapidWindowConfig, SlopeConfig, SlopeDetectionStrategy, Strategy, TrendConfig,
    TrendFollowingStrategy,
};

/// Replay stored price history through a strategy and print the results.
#[derive(Parser)]
#[command(name = "backtest")]
struct Args {
    /// Asset code, e.g. BTC
    #[arg(long, default_value = "BTC")]
    code: String,

    /// Start of the replay range, RFC 3339
    #[arg(long)]
    start: DateTime<Utc>,

    /// End of the replay range, RFC 3339; defaults to now
    #[arg(long)]
    end: Option<DateTime<Utc>>,

    #[arg(long, value_enum, default_value = "midpoint")]
    strategy: Variant,

    /// Starting funds in quote currency
    #[arg(long, default_value_t = 1000.0)]
    funds: f64,

    /// Fee ratio per trade
    #[arg(long, default_value_t = 0.0025)]
    fee: f64,

    /// Midpoint band width in quote currency
    #[arg(long, default_value_t = 10.0)]
    range: f64,

    /// Base window period in minutes for the slope, trend, and rapid variants
    #[arg(long, default_value_t = 60)]
    period_minutes: i64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Variant {
    Midpoint,
    Slope,
    Trend,
    Rapid,
}

fn build_strategy(args: &Args) -> Result<Box<dyn Strategy>> {
    let code = &args.code;
    let period = Duration::minutes(args.period_minutes);

    let strategy: Box<dyn Strategy> = match args.strategy {
        Variant::Midpoint => Box::new(MidpointReversionStrategy::new(MidpointConfig::new(
            "midpoint.backtest",
            code,
            args.range,
        ))?),
        Variant::Slope => Box::new(SlopeDetectionStrategy::new(SlopeConfig::new(
            "slope.backtest",
            code,
            period,
            3,
        ))?),
        Variant::Trend => Box::new(TrendFollowingStrategy::new(TrendConfig::new(
            "trend.backtest",
            code,
            period,
            0.01,
            -0.01,
        ))?),
        Variant::Rapid => Box::new(RapidChangeStrategy::new(RapidChangeConfig::new(
            "rapid.backtest",
            code,
            vec![
                RapidWindowConfig {
                    direction: Direction::Fall,
                    period,
                    threshold: -0.05,
                },
                RapidWindowConfig {
                    direction: Direction::Rise,
                    period,
                    threshold: 0.05,
                },
                RapidWindowConfig {
                    direction: Direction::Stable,
                    period: period * 4,
                    threshold: 0.03,
                },
            ],
        ))?),
    };
    Ok(strategy)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coinbot=info".into()),
        )
        .init();

    let args = Args::parse();
    let end = args.end.unwrap_or_else(Utc::now);

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;
    let store = PriceStore::connect(&database_url).await?;

    let strategy = build_strategy(&args)?;
    let config = LedgerConfig::new(&args.code, args.funds, args.fee);
    let runner = BacktestRunner::new(store, config);
    let report = runner.run(strategy, args.start, end).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
