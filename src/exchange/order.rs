//! Order value types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Market order sized in base asset units
    Market,
    /// Market order sized in quote currency
    MarketQuote,
}

/// Order status. The path is strictly forward-moving:
/// pending -> {filled | canceled | error}, never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Canceled,
    Error,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// An order, owned by the order controller from creation until terminal
/// status and persisted on every status transition.
///
/// Ids are sequential so a replayed backtest produces an identical order
/// sequence; they are assigned by the controller, not by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub pair: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    /// Base asset quantity. For a `MarketQuote` order this is the quantity
    /// derived from the quote amount at fill time.
    pub quantity: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub filled_price: Option<f64>,
}

impl Order {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {} {:.8}",
            self.status, self.side, self.pair, self.quantity
        )?;
        if let Some(price) = self.filled_price {
            write!(f, " @ {price:.8}")?;
        }
        Ok(())
    }
}
