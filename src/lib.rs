// Core modules
pub mod backtest;
pub mod config;
pub mod error;
pub mod exchange;
pub mod feed;
pub mod ledger;
pub mod models;
pub mod storage;
pub mod strategy;
pub mod window;

// Re-export commonly used types
pub use error::{CoinbotError, OrderError, Result};
pub use models::*;
pub use strategy::Strategy;
