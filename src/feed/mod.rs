//! Typed pub/sub event bus
//!
//! Both the candle feed and the order feed are instances of [`EventFeed`]:
//! handlers subscribe per topic key and are invoked in subscription order for
//! every event published under that key. Events published before
//! [`start`](EventFeed::start) are buffered, so warmup-period data is never
//! lost. Delivery order within one topic follows publish order; there is no
//! ordering guarantee across topics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

/// Event handler. Errors are logged and never reach the publisher; a failing
/// handler does not prevent other handlers from receiving the same event.
pub type Handler<T> = Box<dyn Fn(T) -> anyhow::Result<()> + Send + Sync>;

struct Subscription<T> {
    handler: Handler<T>,
    consume_once: bool,
}

struct Topic<T> {
    tx: Option<mpsc::UnboundedSender<T>>,
    rx: Option<mpsc::UnboundedReceiver<T>>,
    subscriptions: Arc<Mutex<Vec<Subscription<T>>>>,
}

impl<T> Topic<T> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Pub/sub bus with per-topic buffering and one dispatcher task per topic.
pub struct EventFeed<T> {
    topics: Mutex<HashMap<String, Topic<T>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<T: Clone + Send + 'static> EventFeed<T> {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Register a handler for a topic. Handlers registered for one topic are
    /// invoked in subscription order; a `consume_once` handler is dropped
    /// after its first delivery.
    pub fn subscribe(&self, key: &str, handler: Handler<T>, consume_once: bool) {
        let mut topics = lock(&self.topics);
        let topic = topics.entry(key.to_string()).or_insert_with(Topic::new);
        lock(&topic.subscriptions).push(Subscription {
            handler,
            consume_once,
        });
    }

    /// Publish an event under a topic key. Before `start` the event is
    /// buffered; after `close` it is dropped.
    pub fn publish(&self, key: &str, event: T) {
        let mut topics = lock(&self.topics);
        let topic = topics.entry(key.to_string()).or_insert_with(Topic::new);
        if let Some(tx) = &topic.tx {
            // Receiver lives in the topic until a dispatcher takes it, so the
            // send can only fail after close().
            let _ = tx.send(event);
        }
        // A topic first seen after start still needs its dispatcher.
        if self.started.load(Ordering::SeqCst) && topic.rx.is_some() {
            let task = Self::spawn_dispatcher(topic);
            drop(topics);
            lock(&self.tasks).push(task);
        }
    }

    /// Clone the topic's buffered sender, for producer tasks that outlive a
    /// borrow of the feed. After [`close`](Self::close) the returned sender
    /// goes nowhere.
    pub fn sender(&self, key: &str) -> mpsc::UnboundedSender<T> {
        let mut topics = lock(&self.topics);
        let topic = topics.entry(key.to_string()).or_insert_with(Topic::new);
        match &topic.tx {
            Some(tx) => tx.clone(),
            None => mpsc::unbounded_channel().0,
        }
    }

    /// Deliver an event synchronously to the topic's current handlers,
    /// bypassing the buffer. Used for warmup preload, where subscribers
    /// registered so far must see historical candles immediately.
    pub fn dispatch_now(&self, key: &str, event: T) {
        let subscriptions = {
            let topics = lock(&self.topics);
            topics.get(key).map(|t| t.subscriptions.clone())
        };
        if let Some(subscriptions) = subscriptions {
            deliver(&subscriptions, event);
        }
    }

    /// Activate delivery: spawn one dispatcher task per known topic. Buffered
    /// events are delivered first, in publish order.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut topics = lock(&self.topics);
        let mut tasks = lock(&self.tasks);
        for topic in topics.values_mut() {
            if topic.rx.is_some() {
                tasks.push(Self::spawn_dispatcher(topic));
            }
        }
    }

    /// Stop accepting events. Dispatchers finish draining what was already
    /// published, then exit; await them with [`join`](Self::join).
    pub fn close(&self) {
        let mut topics = lock(&self.topics);
        for topic in topics.values_mut() {
            topic.tx = None;
        }
    }

    /// Wait for all dispatcher tasks to finish. Only meaningful after
    /// [`close`](Self::close).
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            let _ = task.await;
        }
    }

    fn spawn_dispatcher(topic: &mut Topic<T>) -> JoinHandle<()> {
        let mut rx = match topic.rx.take() {
            Some(rx) => rx,
            None => return tokio::spawn(async {}),
        };
        let subscriptions = topic.subscriptions.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(&subscriptions, event);
            }
        })
    }
}

impl<T: Clone + Send + 'static> Default for EventFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver<T: Clone>(subscriptions: &Mutex<Vec<Subscription<T>>>, event: T) {
    lock(subscriptions).retain(|subscription| {
        if let Err(err) = (subscription.handler)(event.clone()) {
            error!("event handler failed: {err:#}");
        }
        !subscription.consume_once
    });
}

fn lock<G>(mutex: &Mutex<G>) -> std::sync::MutexGuard<'_, G> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
