use super::{ExchangeAdapter, OrderAck, OrderMethod, OrderRequest};
use crate::error::{CoinbotError, OrderError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha384;
use sqlx::PgPool;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

type HmacSha384 = Hmac<Sha384>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// API credentials, one key pair per purpose: the read-only event feed and
/// order placement use separate secrets.
#[derive(Debug, Clone)]
pub struct GeminiCredentials {
    pub host: String,
    pub feed_key: String,
    pub feed_secret: String,
    pub orders_key: String,
    pub orders_secret: String,
}

/// Sign a request body the Gemini way: base64 the JSON, HMAC-SHA384 the
/// base64 with the per-purpose secret, hex the digest.
fn sign(secret: &str, body: &str) -> Result<(String, String)> {
    let payload = BASE64.encode(body);
    let mut mac = HmacSha384::new_from_slice(secret.as_bytes())
        .map_err(|e| CoinbotError::Configuration(format!("invalid signing secret: {e}")))?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    Ok((payload, signature))
}

/// Exchange adapter for Gemini.
///
/// `submit` implements record-then-submit: the order attempt is inserted
/// inside a storage transaction, the signed request is transmitted, and the
/// transaction commits only on transmission success.
pub struct GeminiAdapter {
    credentials: GeminiCredentials,
    http: reqwest::Client,
    pool: PgPool,
    nonce: AtomicI64,
}

impl GeminiAdapter {
    pub fn new(credentials: GeminiCredentials, pool: PgPool) -> Result<Self> {
        if credentials.host.is_empty() {
            return Err(CoinbotError::Configuration(
                "exchange host must not be empty".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CoinbotError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            credentials,
            http,
            pool,
            nonce: AtomicI64::new(0),
        })
    }

    /// Monotonically increasing nonce, even when two calls land on the same
    /// millisecond.
    fn next_nonce(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let prev = self
            .nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(prev.max(now - 1) + 1)
            })
            .unwrap_or(now - 1);
        prev.max(now - 1) + 1
    }

    async fn post_signed(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<serde_json::Value, OrderError> {
        let (payload, signature) = sign(&self.credentials.orders_secret, &body.to_string())
            .map_err(|e| OrderError::Rejected(e.to_string()))?;

        let response = self
            .http
            .post(format!("https://{}{}", self.credentials.host, path))
            .header("Content-Type", "text/plain")
            .header("X-GEMINI-APIKEY", &self.credentials.orders_key)
            .header("X-GEMINI-PAYLOAD", payload)
            .header("X-GEMINI-SIGNATURE", signature)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OrderError::Timeout
                } else {
                    OrderError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OrderError::Rejected(format!("{status}: {text}")));
        }

        response
            .json()
            .await
            .map_err(|e| OrderError::Transport(e.to_string()))
    }

    fn order_body(&self, request: &OrderRequest) -> serde_json::Value {
        let options = match request.method {
            OrderMethod::Market => vec!["immediate-or-cancel"],
            OrderMethod::Limit => vec![],
        };

        serde_json::json!({
            "request": "/v1/order/new",
            "nonce": self.next_nonce(),
            "client_order_id": request.client_order_id.to_string(),
            "symbol": format!("{}USD", request.code.to_uppercase()),
            "amount": request.quantity.to_string(),
            "price": request.price.to_string(),
            "side": request.side.as_str(),
            "type": "exchange limit",
            "options": options,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for GeminiAdapter {
    async fn submit(&self, request: &OrderRequest) -> std::result::Result<OrderAck, OrderError> {
        // (a) persist the attempt inside a transaction.
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO orders (exchange, client_order_id, code, side, quantity, price, ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind("gemini")
        .bind(request.client_order_id)
        .bind(&request.code)
        .bind(request.side.as_str())
        .bind(request.quantity)
        .bind(request.price)
        .bind(request.ts)
        .execute(&mut *tx)
        .await?;

        // (b) sign and transmit.
        let body = self.order_body(request);
        match self.post_signed("/v1/order/new", &body).await {
            // (c) commit on success.
            Ok(response) => {
                tx.commit().await?;
                let order_id = response
                    .get("order_id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                tracing::info!(
                    code = %request.code,
                    side = %request.side.as_str(),
                    quantity = request.quantity,
                    price = request.price,
                    client_order_id = %request.client_order_id,
                    "order posted"
                );
                Ok(OrderAck {
                    client_order_id: request.client_order_id,
                    order_id,
                })
            }
            // (c) roll back on failure; no committed record, no phantom order.
            Err(error) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(%rollback, "order attempt rollback failed");
                }
                tracing::warn!(
                    code = %request.code,
                    client_order_id = %request.client_order_id,
                    %error,
                    "order submission failed"
                );
                Err(error)
            }
        }
    }

    async fn cancel_all(&self) -> std::result::Result<(), OrderError> {
        let body = serde_json::json!({
            "request": "/v1/order/cancel/session",
            "nonce": self.next_nonce(),
        });
        self.post_signed("/v1/order/cancel/session", &body).await?;
        tracing::info!("cancelled all session orders");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OrderEvent {
    Heartbeat {},
    #[serde(other)]
    Other,
}

/// Subscribe to the signed order-events stream and keep it alive.
///
/// Any message, heartbeat included, counts as liveness; a stream silent for
/// longer than `silence` is torn down and reconnected.
pub fn spawn_order_events(adapter: Arc<GeminiAdapter>, silence: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(error) = run_order_events(&adapter, silence).await {
                tracing::warn!(%error, "order event feed stopped, reconnecting");
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    })
}

async fn run_order_events(adapter: &GeminiAdapter, silence: Duration) -> Result<()> {
    let body = serde_json::json!({
        "request": "/v1/order/events",
        "nonce": adapter.next_nonce(),
    });
    let (payload, signature) = sign(&adapter.credentials.feed_secret, &body.to_string())?;

    let url = format!("wss://{}/v1/order/events", adapter.credentials.host);
    let mut request = url
        .into_client_request()
        .map_err(|e| CoinbotError::Feed(e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert(
        "X-GEMINI-APIKEY",
        HeaderValue::from_str(&adapter.credentials.feed_key)
            .map_err(|e| CoinbotError::Feed(e.to_string()))?,
    );
    headers.insert(
        "X-GEMINI-PAYLOAD",
        HeaderValue::from_str(&payload).map_err(|e| CoinbotError::Feed(e.to_string()))?,
    );
    headers.insert(
        "X-GEMINI-SIGNATURE",
        HeaderValue::from_str(&signature).map_err(|e| CoinbotError::Feed(e.to_string()))?,
    );

    let (mut stream, _) = connect_async(request)
        .await
        .map_err(|e| CoinbotError::Feed(e.to_string()))?;
    tracing::info!("order event feed listening");

    loop {
        match timeout(silence, stream.next()).await {
            Err(_) => {
                return Err(CoinbotError::Feed(format!(
                    "no order event for {}s, reconnecting",
                    silence.as_secs()
                )));
            }
            Ok(None) => {
                return Err(CoinbotError::Feed("order event stream closed".to_string()));
            }
            Ok(Some(Err(error))) => {
                return Err(CoinbotError::Feed(error.to_string()));
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                for event in parse_order_events(&text) {
                    match event {
                        OrderEvent::Heartbeat {} => {
                            tracing::debug!("order event heartbeat");
                        }
                        OrderEvent::Other => {
                            tracing::info!(message = %text, "order event");
                        }
                    }
                }
            }
            Ok(Some(Ok(_))) => {}
        }
    }
}

/// Messages arrive either as a single event or a batched array.
fn parse_order_events(text: &str) -> Vec<OrderEvent> {
    if let Ok(events) = serde_json::from_str::<Vec<OrderEvent>>(text) {
        events
    } else if let Ok(event) = serde_json::from_str::<OrderEvent>(text) {
        vec![event]
    } else {
        tracing::debug!(message = %text, "unparsed order event");
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_shape() {
        let (payload, signature) = sign("secret", r#"{"request":"/v1/order/new"}"#).unwrap();
        // SHA-384 digest is 48 bytes, hex doubles it.
        assert_eq!(signature.len(), 96);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
        // The payload must decode back to the body it covers.
        let decoded = BASE64.decode(&payload).unwrap();
        assert_eq!(decoded, br#"{"request":"/v1/order/new"}"#);
    }

    #[test]
    fn signing_is_deterministic_per_secret() {
        let body = r#"{"nonce":1}"#;
        let (_, a) = sign("secret", body).unwrap();
        let (_, b) = sign("secret", body).unwrap();
        let (_, c) = sign("other", body).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn parses_batched_and_single_events() {
        let batch = r#"[{"type":"heartbeat"},{"type":"fill"}]"#;
        assert_eq!(parse_order_events(batch).len(), 2);

        let single = r#"{"type":"heartbeat"}"#;
        assert_eq!(parse_order_events(single).len(), 1);

        assert!(parse_order_events("not json").is_empty());
    }
}
