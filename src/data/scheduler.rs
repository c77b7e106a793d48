//! Chronological candle scheduler
//!
//! Candle events for different pairs arrive from independently-timed
//! producers (network streams, file readers). The scheduler totally orders
//! them by (timestamp, pair) so the single consumer that drives the strategy
//! controllers never observes out-of-order candles, whatever the arrival
//! interleaving was. The pair tie-break is lexicographic, which keeps replay
//! order deterministic for equal timestamps.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

use crate::data::Candle;

#[derive(Debug, Clone)]
struct Entry(Candle);

impl Entry {
    fn key(&self) -> (i64, &str) {
        (self.0.timestamp.timestamp_millis(), self.0.pair.as_str())
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Thread-safe priority queue yielding candles in chronological order.
///
/// Multiple producers may push concurrently; exactly one consumer must drain
/// it (via [`pop`](Self::pop) in backtests, [`pop_wait`](Self::pop_wait) in
/// live mode), otherwise the global ordering guarantee is meaningless.
#[derive(Debug, Default)]
pub struct CandleScheduler {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    notify: Notify,
}

impl CandleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a candle. O(log n), callable from any producer task.
    pub fn push(&self, candle: Candle) {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Reverse(Entry(candle)));
        self.notify.notify_one();
    }

    /// Remove and return the chronologically smallest entry, or `None` when
    /// the queue is empty. Used by the deterministic backtest drain loop.
    pub fn pop(&self) -> Option<Candle> {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .map(|Reverse(entry)| entry.0)
    }

    /// Remove and return the chronologically smallest entry, suspending while
    /// the queue is empty and resuming as soon as a producer pushes. Never
    /// ends on its own; only process shutdown ends the live loop. Single
    /// consumer only.
    pub async fn pop_wait(&self) -> Candle {
        loop {
            if let Some(candle) = self.pop() {
                return candle;
            }
            self.notify.notified().await;
        }
    }

    /// Current queue length, for progress reporting.
    pub fn len(&self) -> usize {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
