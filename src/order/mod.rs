//! Order lifecycle: controller, event feed, and results ledger

mod controller;
mod feed;
mod result;

pub use controller::{Controller, PositionReport};
pub use feed::OrderFeed;
pub use result::PairResult;
