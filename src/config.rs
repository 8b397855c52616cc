use crate::error::{CoinbotError, Result};
use crate::exchange::GeminiCredentials;
use std::time::Duration;

/// Runtime settings, loaded from the environment (a `.env` file is honored
/// via dotenvy in the binaries). Missing or unparsable required values are
/// `Configuration` errors and fatal before any tick is processed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub gemini_host: String,
    /// Asset codes to track, e.g. BTC, ETH.
    pub codes: Vec<String>,
    pub funds: f64,
    pub fee: f64,
    /// Width of the midpoint strategy's price band, in quote currency.
    pub range: f64,
    /// Feed silence threshold before a forced reconnect.
    pub silence: Duration,
    /// Interval between persisted price snapshots.
    pub snapshot_interval: Duration,
    /// Present only when all four exchange keys are configured.
    pub credentials: Option<GeminiCredentials>,
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| CoinbotError::Configuration(format!("{name} is not set")))
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| CoinbotError::Configuration(format!("{name} is not a valid value"))),
        Err(_) => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let gemini_host =
            std::env::var("GEMINI_HOST").unwrap_or_else(|_| "api.gemini.com".to_string());

        let codes: Vec<String> = std::env::var("COINBOT_CODES")
            .unwrap_or_else(|_| "BTC,ETH".to_string())
            .split(',')
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        if codes.is_empty() {
            return Err(CoinbotError::Configuration(
                "COINBOT_CODES names no assets".to_string(),
            ));
        }

        let credentials = match (
            std::env::var("GEMINI_FEED_KEY"),
            std::env::var("GEMINI_FEED_SECRET"),
            std::env::var("GEMINI_ORDERS_KEY"),
            std::env::var("GEMINI_ORDERS_SECRET"),
        ) {
            (Ok(feed_key), Ok(feed_secret), Ok(orders_key), Ok(orders_secret)) => {
                Some(GeminiCredentials {
                    host: gemini_host.clone(),
                    feed_key,
                    feed_secret,
                    orders_key,
                    orders_secret,
                })
            }
            _ => None,
        };

        Ok(Self {
            database_url,
            gemini_host,
            codes,
            funds: parsed("COINBOT_FUNDS", 1000.0)?,
            fee: parsed("COINBOT_FEE", 0.0025)?,
            range: parsed("COINBOT_RANGE", 10.0)?,
            silence: Duration::from_secs(parsed("COINBOT_SILENCE_SECS", 120u64)?),
            snapshot_interval: Duration::from_secs(parsed("COINBOT_SNAPSHOT_SECS", 300u64)?),
            credentials,
        })
    }
}
