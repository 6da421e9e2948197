//! Shared infrastructure: errors, hashing, validation

pub mod error;
pub mod hash;
pub mod validation;

pub use error::{FilterError, Result};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as fractional seconds since the Unix epoch
pub(crate) fn current_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}

/// Derives `(num_buckets, num_hashes)` for a target capacity and error rate
///
/// `m = ⌊-n · ln ε / (ln 2)²⌋ + 1` and `k = ⌊(m / n) · ln 2⌋ + 1`. The `+ 1`
/// terms are part of the persistence format: a filter reloaded from disk must
/// re-derive the same dimensions from its stored parameters.
pub(crate) fn bloom_dimensions(capacity: u64, error: f64) -> (usize, usize) {
    let ln2 = std::f64::consts::LN_2;
    let num_buckets = (-(capacity as f64) * error.ln() / (ln2 * ln2)) as usize + 1;
    let num_hashes = (num_buckets as f64 / capacity as f64 * ln2) as usize + 1;
    (num_buckets, num_hashes)
}
