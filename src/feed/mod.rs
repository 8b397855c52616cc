use crate::error::{CoinbotError, Result};
use crate::models::PricePoint;
use crate::storage::PriceStore;
use crate::window::MemoryWindow;
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;

pub const DEFAULT_SILENCE: Duration = Duration::from_secs(120);
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(300);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Connection state of one market feed, readable by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Open,
    Closed,
}

impl FeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::Connecting => "connecting",
            FeedStatus::Open => "open",
            FeedStatus::Closed => "closed",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            FeedStatus::Connecting => 0,
            FeedStatus::Open => 1,
            FeedStatus::Closed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => FeedStatus::Open,
            2 => FeedStatus::Closed,
            _ => FeedStatus::Connecting,
        }
    }
}

/// Shared read surface for a running feed: connection status and the debug
/// flag the control plane can toggle.
#[derive(Clone)]
pub struct FeedHandle {
    code: String,
    status: Arc<AtomicU8>,
    debug: Arc<AtomicBool>,
}

impl FeedHandle {
    fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            status: Arc::new(AtomicU8::new(FeedStatus::Connecting.as_u8())),
            debug: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }

    pub fn set_debug(&self, on: bool) {
        self.debug.store(on, Ordering::SeqCst);
    }

    fn set_status(&self, status: FeedStatus) {
        self.status.store(status.as_u8(), Ordering::SeqCst);
    }
}

/// The rolling in-memory windows continuously fed for one asset in live
/// mode. Longer horizons are answered from the persisted store instead.
pub fn default_windows(code: &str) -> Vec<MemoryWindow> {
    vec![
        MemoryWindow::rolling(code, "1 min", ChronoDuration::minutes(1)),
        MemoryWindow::rolling(code, "5 min", ChronoDuration::minutes(5)),
        MemoryWindow::rolling(code, "15 min", ChronoDuration::minutes(15)),
    ]
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum MarketMessage {
    Heartbeat {},
    Update {
        #[serde(default)]
        events: Vec<MarketEvent>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MarketEvent {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    price: Option<String>,
}

/// Messages arrive either as a single object or a batched array.
fn parse_market_messages(text: &str) -> Vec<MarketMessage> {
    if let Ok(messages) = serde_json::from_str::<Vec<MarketMessage>>(text) {
        messages
    } else if let Ok(message) = serde_json::from_str::<MarketMessage>(text) {
        vec![message]
    } else {
        tracing::debug!(message = %text, "unparsed market message");
        Vec::new()
    }
}

/// Trade prices carried by one message, in arrival order.
fn trade_prices(messages: Vec<MarketMessage>) -> Vec<f64> {
    let mut prices = Vec::new();
    for message in messages {
        if let MarketMessage::Update { events } = message {
            for event in events {
                if event.reason.as_deref() == Some("trade") {
                    if let Some(price) = event.price.as_deref().and_then(|p| p.parse().ok()) {
                        prices.push(price);
                    }
                }
            }
        }
    }
    prices
}

/// Live market feed for one asset.
///
/// One task owns all writes into the asset's window set (single-writer per
/// asset); a silent connection is detected by the read timeout and torn down,
/// so windows simply receive no pushes until the reconnect succeeds. Gaps are
/// absent samples; nothing is backfilled.
pub struct MarketFeed {
    code: String,
    host: String,
    windows: Arc<Mutex<Vec<MemoryWindow>>>,
    ticks: Option<tokio::sync::mpsc::Sender<PricePoint>>,
    silence: Duration,
    handle: FeedHandle,
}

impl MarketFeed {
    pub fn new(code: &str, host: &str, windows: Arc<Mutex<Vec<MemoryWindow>>>) -> Self {
        Self {
            code: code.to_string(),
            host: host.to_string(),
            windows,
            ticks: None,
            silence: DEFAULT_SILENCE,
            handle: FeedHandle::new(code),
        }
    }

    /// Forward each trade tick to a per-asset consumer (the live ledger
    /// task), preserving arrival order.
    pub fn with_ticks(mut self, ticks: tokio::sync::mpsc::Sender<PricePoint>) -> Self {
        self.ticks = Some(ticks);
        self
    }

    pub fn with_silence(mut self, silence: Duration) -> Self {
        self.silence = silence;
        self
    }

    pub fn handle(&self) -> FeedHandle {
        self.handle.clone()
    }

    /// Run the feed until cancelled, reconnecting on errors and on silence.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                self.handle.set_status(FeedStatus::Connecting);
                if let Err(error) = self.run_once().await {
                    tracing::warn!(code = %self.code, %error, "market feed stopped, reconnecting");
                }
                self.handle.set_status(FeedStatus::Closed);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        })
    }

    async fn run_once(&self) -> Result<()> {
        let url = format!(
            "wss://{}/v1/marketdata/{}USD",
            self.host,
            self.code.to_uppercase()
        );
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|e| CoinbotError::Feed(e.to_string()))?;

        self.handle.set_status(FeedStatus::Open);
        tracing::info!(code = %self.code, "market feed listening");

        self.pump(stream).await
    }

    /// Drain one connection until it errors, closes, or goes silent for
    /// longer than the silence threshold. Every exit is an error so the
    /// reconnect loop tears the connection down and tries again.
    async fn pump<S>(&self, mut stream: S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        loop {
            match timeout(self.silence, stream.next()).await {
                Err(_) => {
                    return Err(CoinbotError::Feed(format!(
                        "no message for {}s",
                        self.silence.as_secs()
                    )));
                }
                Ok(None) => {
                    return Err(CoinbotError::Feed("market stream closed".to_string()));
                }
                Ok(Some(Err(error))) => {
                    return Err(CoinbotError::Feed(error.to_string()));
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    self.ingest(&text).await;
                }
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    async fn ingest(&self, text: &str) {
        let prices = trade_prices(parse_market_messages(text));
        for price in prices {
            let point = PricePoint::new(Utc::now(), price);
            if self.handle.debug() {
                tracing::debug!(code = %self.code, price, "trade");
            }

            {
                let mut windows = self.windows.lock().unwrap();
                for window in windows.iter_mut() {
                    window.push(point.clone());
                }
            }

            if let Some(ticks) = &self.ticks {
                // A full channel stalls the read loop rather than dropping
                // or reordering same-asset ticks.
                if ticks.send(point).await.is_err() {
                    tracing::warn!(code = %self.code, "tick consumer gone");
                }
            }
        }
    }
}

/// Most recent in-range point across the ladder, pruning every rung as a
/// side effect so no window outlives its own period.
fn latest_point(windows: &mut [MemoryWindow]) -> Option<PricePoint> {
    let mut latest = None;
    for window in windows.iter_mut() {
        if let Some(point) = window.last() {
            latest = Some(point);
        }
    }
    latest
}

/// Periodically record the latest observed price into the store.
///
/// A missing point (feed outage) is logged and skipped; a storage failure is
/// retried at the next interval rather than in a tight loop.
pub fn spawn_snapshot_recorder(
    code: String,
    windows: Arc<Mutex<Vec<MemoryWindow>>>,
    store: PriceStore,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            let last = {
                let mut windows = windows.lock().unwrap();
                latest_point(&mut windows)
            };

            match last {
                Some(point) => {
                    if let Err(error) = store.insert_price(&code, &point).await {
                        tracing::error!(code = %code, %error, "price snapshot failed");
                    } else {
                        tracing::debug!(code = %code, price = point.price, "price snapshot");
                    }
                }
                None => {
                    tracing::warn!(code = %code, "no price to snapshot");
                }
            }
        }
    })
}
