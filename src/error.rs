//! Engine error taxonomy

use thiserror::Error;

/// Errors surfaced by order submission and the matching engine.
///
/// These are returned to the calling strategy hook, which decides whether to
/// retry or skip; the order controller never retries automatically.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("insufficient funds for {pair}: needed {needed:.8}, available {available:.8}")]
    InsufficientFunds {
        pair: String,
        needed: f64,
        available: f64,
    },

    /// No candle has been observed yet for the pair, so there is no price to
    /// fill a market order against.
    #[error("no price data for pair {0}")]
    NoPriceData(String),

    #[error("invalid order quantity: {0}")]
    InvalidQuantity(f64),

    #[error("invalid pair: {0}")]
    InvalidPair(String),

    #[error("exchange rejected order: {0}")]
    Exchange(String),

    /// A persistence failure. When this happens after a successful fill it is
    /// a data-consistency risk: a real position the system could forget.
    #[error("order persistence failed: {0}")]
    Storage(String),
}

/// Fatal engine errors: the run refuses to start or must abort.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid pair format: {0}")]
    InvalidPair(String),

    #[error("no trading pairs configured")]
    NoPairs,

    #[error("warmup preload failed for {pair}: {source}")]
    Preload {
        pair: String,
        #[source]
        source: anyhow::Error,
    },
}
