//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::exchange::split_asset_quote;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Trading pairs, e.g. `["BTCUSDT", "ETHUSDT"]`
    pub pairs: Vec<String>,
}

impl Settings {
    /// Create settings for the given pairs
    pub fn new(pairs: Vec<String>) -> Self {
        Self { pairs }
    }

    /// Validate the configuration.
    ///
    /// Configuration errors are fatal at startup: the engine refuses to run
    /// with an empty pair list or a pair that cannot be split into asset and
    /// quote currencies.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.pairs.is_empty() {
            return Err(EngineError::NoPairs);
        }

        for pair in &self.pairs {
            if split_asset_quote(pair).is_none() {
                return Err(EngineError::InvalidPair(pair.clone()));
            }
        }

        Ok(())
    }
}
