//! fading_bloom: time-decaying approximate membership sets
//!
//! A family of Bloom-style filters in which every insertion carries an
//! implicit expiration: `contains` answers true only for keys added within
//! the last `decay_time` seconds, at a controlled false-positive rate.
//!
//! - [`CountingBloomFilter`]: saturating counters with explicit removal.
//! - [`TimingBloomFilter`]: buckets hold modular tick stamps; a periodic
//!   decay sweep reclaims expired cells.
//! - [`ScalingTimingBloomFilter`]: an ordered stack of timing filters with
//!   geometrically tightening error that grows under load and shrinks back
//!   as the window empties.
//!
//! Filters persist to directories of `meta.json` + raw bucket buffers with
//! atomic replace-on-save, and a pluggable [`Ticker`] drives decay.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cells;
pub mod common;
pub mod counting;
mod persist;
pub mod scaling;
pub mod ticker;
pub mod timing;

// Re-export core types for convenience
pub use cells::{CellBuffer, CellLayout};
pub use common::{FilterError, Result};
pub use counting::CountingBloomFilter;
pub use scaling::{ScalingConfig, ScalingTimingBloomFilter};
pub use ticker::{NoOpTicker, ThreadTicker, Ticker, TickerCallback};
pub use timing::{DecaySweep, TimingBloomFilter};

/// Error types and result aliases for filter operations
pub mod error {
    pub use crate::common::{FilterError, Result};
}
