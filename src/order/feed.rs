//! Order event feed

use crate::exchange::Order;
use crate::feed::{EventFeed, Handler};

/// Pub/sub feed for order lifecycle events, keyed by pair.
///
/// Multiple independent subscribers per pair are supported, for example a
/// notifier and a reporting sink both receiving the same events. Events
/// published before [`start`](Self::start) are buffered.
#[derive(Default)]
pub struct OrderFeed {
    feed: EventFeed<Order>,
}

impl OrderFeed {
    pub fn new() -> Self {
        Self {
            feed: EventFeed::new(),
        }
    }

    pub fn subscribe(&self, pair: &str, handler: Handler<Order>, consume_once: bool) {
        self.feed.subscribe(pair, handler, consume_once);
    }

    pub fn publish(&self, order: Order) {
        let pair = order.pair.clone();
        self.feed.publish(&pair, order);
    }

    pub fn start(&self) {
        self.feed.start();
    }

    pub fn close(&self) {
        self.feed.close();
    }

    pub async fn join(&self) {
        self.feed.join().await;
    }
}
