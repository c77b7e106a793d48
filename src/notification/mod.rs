//! Order lifecycle notifications
//!
//! Notifiers observe order events and emit human-readable messages. Notifier
//! failures are logged and never fatal; a slow or broken notifier must not
//! stall candle processing, so implementations doing network I/O should hand
//! the message off to their own task instead of blocking the caller.

use tracing::{error, info};

use crate::error::OrderError;
use crate::exchange::Order;

/// Receives order lifecycle events.
pub trait Notifier: Send + Sync {
    fn on_order(&self, order: &Order);
    fn on_error(&self, error: &OrderError);
}

/// Notifier that writes through the tracing stack. The default when no
/// external channel (chat bot, webhook) is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for LogNotifier {
    fn on_order(&self, order: &Order) {
        info!(pair = %order.pair, id = order.id, "order update: {order}");
    }

    fn on_error(&self, error: &OrderError) {
        error!("order error: {error}");
    }
}
