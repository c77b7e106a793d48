//! Bundled strategies.

mod cross_ma;

pub use cross_ma::CrossMA;
