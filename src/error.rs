use thiserror::Error;

/// Failure returned by exchange order submission.
///
/// A timed-out submission is ambiguous on the exchange side; callers that
/// retry must reuse the same client order id so the exchange can deduplicate.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("exchange rejected order: {0}")]
    Rejected(String),

    #[error("order submission timed out")]
    Timeout,

    #[error("order transport failure: {0}")]
    Transport(String),

    #[error("order record failure: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Crate-wide error taxonomy.
#[derive(Debug, Error)]
pub enum CoinbotError {
    /// An aggregate was requested over zero in-range points. Never coerced
    /// to NaN or sentinel values.
    #[error("no data points in range for window on {0}")]
    NoData(String),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("feed failure: {0}")]
    Feed(String),

    #[error("order failure: {0}")]
    Order(#[from] OrderError),

    /// Missing or invalid parameter at construction. Fatal, raised before
    /// any tick is processed.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, CoinbotError>;
