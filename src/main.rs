use coinbot::config::Settings;
use coinbot::error::{CoinbotError, Result};
use coinbot::exchange::{spawn_order_events, ExchangeAdapter, GeminiAdapter};
use coinbot::feed::{default_windows, FeedHandle, MarketFeed, spawn_snapshot_recorder};
use coinbot::ledger::{LedgerConfig, LiveLedger};
use coinbot::storage::PriceStore;
use coinbot::strategy::{MidpointConfig, MidpointReversionStrategy, Strategy};
use coinbot::window::StoredWindow;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);
const TICK_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let settings = Settings::from_env()?;
    tracing::info!(
        codes = ?settings.codes,
        funds = settings.funds,
        fee = settings.fee,
        "coinbot starting"
    );

    let store = PriceStore::connect(&settings.database_url).await?;
    store.create_schema().await?;

    let credentials = settings.credentials.clone().ok_or_else(|| {
        CoinbotError::Configuration(
            "live trading needs GEMINI_FEED_KEY/SECRET and GEMINI_ORDERS_KEY/SECRET".to_string(),
        )
    })?;
    let adapter = Arc::new(GeminiAdapter::new(credentials, store.pool().clone())?);
    let _order_events = spawn_order_events(adapter.clone(), settings.silence);

    let mut handles = Vec::new();
    for code in &settings.codes {
        let handle = start_asset(code, &settings, &store, adapter.clone()).await?;
        handles.push(handle);
    }
    let _status = spawn_status_reporter(handles);

    tracing::info!("all feeds running, press Ctrl+C to stop");
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }

    tracing::info!("shutting down, cancelling open session orders");
    if let Err(error) = adapter.cancel_all().await {
        tracing::error!(%error, "session order cancellation failed");
    }

    tracing::info!("coinbot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coinbot=info".into()),
        )
        .init();
}

/// Wire up one asset: its market feed writing the in-memory window ladder,
/// the snapshot recorder, and a single consumer task driving the live ledger
/// so updates stay serialized in arrival order.
async fn start_asset(
    code: &str,
    settings: &Settings,
    store: &PriceStore,
    adapter: Arc<GeminiAdapter>,
) -> Result<FeedHandle> {
    let windows = Arc::new(Mutex::new(default_windows(code)));
    let (ticks, mut points) = tokio::sync::mpsc::channel(TICK_CHANNEL_CAPACITY);

    let feed = MarketFeed::new(code, &settings.gemini_host, windows.clone())
        .with_ticks(ticks)
        .with_silence(settings.silence);
    let handle = feed.handle();
    let _feed = feed.spawn();

    let _recorder = spawn_snapshot_recorder(
        code.to_string(),
        windows,
        store.clone(),
        settings.snapshot_interval,
    );

    let strategy = warmed_strategy(code, settings, store).await?;
    let config = LedgerConfig::new(code, settings.funds, settings.fee);
    let mut ledger = LiveLedger::new(config, strategy, adapter)?;

    let code = code.to_string();
    let _ledger_task = tokio::spawn(async move {
        while let Some(point) = points.recv().await {
            // Trades are logged on commit; only failures need attention here.
            if let Err(error) = ledger.update(&point).await {
                tracing::error!(code = %code, ts = %point.ts, %error, "tick processing failed");
            }
        }
        tracing::warn!(code = %code, "tick channel closed, ledger task exiting");
    });

    Ok(handle)
}

/// Build the per-asset strategy and seed it from persisted history so it can
/// act before the rolling windows have filled up on their own.
async fn warmed_strategy(
    code: &str,
    settings: &Settings,
    store: &PriceStore,
) -> Result<Box<dyn Strategy>> {
    let name = format!("midpoint.{}", code.to_lowercase());
    let mut strategy =
        MidpointReversionStrategy::new(MidpointConfig::new(&name, code, settings.range))?;

    let now = Utc::now();
    match StoredWindow::new(store.clone(), code, now - strategy.lookback(), now)
        .load()
        .await
    {
        Ok(history) => {
            tracing::info!(code = %code, points = history.len(), "strategy warmed from history");
            strategy.hydrate(&history);
        }
        Err(error) => {
            tracing::warn!(code = %code, %error, "no stored history, starting cold");
        }
    }

    Ok(Box::new(strategy))
}

fn spawn_status_reporter(handles: Vec<FeedHandle>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATUS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for handle in &handles {
                tracing::info!(
                    code = %handle.code(),
                    status = handle.status().as_str(),
                    "feed status"
                );
            }
        }
    })
}
