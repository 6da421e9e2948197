//! Timing Bloom Filter: membership with implicit expiration
//!
//! Every bucket stores a *tick* - the low bits of a monotonically advancing
//! interval counter - instead of a count. A key is considered present only
//! while the ticks in its buckets fall inside the decay window, so each
//! insertion silently expires `decay_time` seconds later.
//!
//! # Tick semantics
//!
//! Storing a real timestamp per bucket would cost 4-8 bytes; a cell stores
//! only `tick = ⌊timestamp / Δt⌋ mod ring + 1` where `ring = 2^w - 1` for a
//! cell width of `w` bits and zero is reserved for "empty". The decay window
//! covers the most recent `ring / 2` ticks, leaving the other half of the
//! ring as slack so a stale stamp can never alias into the window as long as
//! the decay sweep runs at least once per tick interval.
//!
//! # Algorithm Overview
//!
//! - Add: write the current tick into the k hashed buckets
//! - Query: check that all k buckets hold a tick inside the window
//! - Decay: zero every cell whose tick has left the window
//!
//! The sweep is the hot path; [`TimingBloomFilter::decay_chunk`] exposes it
//! in resumable slices for cooperative schedulers. A slice never re-samples
//! the window captured by [`TimingBloomFilter::begin_decay`].
//!
//! # Examples
//!
//! ```
//! use fading_bloom::TimingBloomFilter;
//!
//! let mut filter = TimingBloomFilter::new(1000, 30.0, 0.005).unwrap();
//! filter.add(b"fresh");
//! assert!(filter.contains(b"fresh"));
//! filter.decay();
//! assert!(filter.contains(b"fresh"));
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cells::{CellBuffer, CellLayout};
use crate::common::hash::bucket_indexes;
use crate::common::validation::{validate_capacity, validate_duration, validate_probability};
use crate::common::{bloom_dimensions, current_time, FilterError, Result};
use crate::counting::fill_estimate;
use crate::persist::{self, BLOOM_FILENAME, META_FILENAME};

/// Persisted parameters of a timing filter
#[derive(Debug, Serialize, Deserialize)]
struct TimingMeta {
    capacity: u64,
    error: f64,
    id: Option<u64>,
    decay_time: f64,
    disable_optimizations: bool,
}

/// Resumable decay sweep over a timing filter
///
/// Captures the decay window once; feeding the sweep back into
/// [`TimingBloomFilter::decay_chunk`] processes the buffer in slices without
/// ever re-sampling the window mid-sweep.
#[derive(Clone, Copy, Debug)]
pub struct DecaySweep {
    tick_min: u8,
    tick_max: u8,
    cursor: usize,
    num_cells: usize,
}

impl DecaySweep {
    /// The `(tick_min, tick_max]` window this sweep enforces
    pub fn tick_range(&self) -> (u8, u8) {
        (self.tick_min, self.tick_max)
    }

    /// True once every cell has been visited
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.num_cells
    }
}

/// Bloom filter whose entries expire `decay_time` seconds after insertion
///
/// By default two 4-bit cells share each byte; `disable_optimizations`
/// selects the plain one-byte-per-cell layout instead, which doubles the
/// ring at twice the memory. The layout is part of the persistence format.
///
/// # Examples
///
/// ```
/// use fading_bloom::TimingBloomFilter;
///
/// let mut filter = TimingBloomFilter::new(500, 60.0, 0.005).unwrap();
/// filter.add(b"hello");
/// assert!(filter.contains(b"hello"));
/// ```
#[derive(Clone, Debug)]
pub struct TimingBloomFilter {
    capacity: u64,
    error: f64,
    id: Option<u64>,
    data_path: Option<PathBuf>,
    decay_time: f64,
    num_buckets: usize,
    num_hashes: usize,
    cells: CellBuffer,
    num_non_zero: usize,
    ring_size: u8,
    window_ticks: u8,
    seconds_per_tick: f64,
}

impl TimingBloomFilter {
    /// Creates a timing filter holding keys for `decay_time` seconds
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidConfig`] if `capacity` is zero,
    /// `error` is not in (0, 1) or `decay_time` is not positive.
    ///
    /// # Examples
    ///
    /// ```
    /// use fading_bloom::TimingBloomFilter;
    ///
    /// let filter = TimingBloomFilter::new(1000, 86400.0, 0.005).unwrap();
    /// assert_eq!(filter.ring_size(), 15);
    /// ```
    pub fn new(capacity: u64, decay_time: f64, error: f64) -> Result<Self> {
        Self::with_options(capacity, decay_time, error, false, None, None)
    }

    /// Creates a timing filter with full control over layout, id and path
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidConfig`] on out-of-range parameters.
    pub fn with_options(
        capacity: u64,
        decay_time: f64,
        error: f64,
        disable_optimizations: bool,
        id: Option<u64>,
        data_path: Option<PathBuf>,
    ) -> Result<Self> {
        validate_capacity(capacity)?;
        validate_probability(error, "error")?;
        validate_duration(decay_time, "decay_time")?;

        let layout = if disable_optimizations {
            CellLayout::Wide8
        } else {
            CellLayout::Packed4
        };
        let ring_size = layout.max_value();
        let window_ticks = ring_size / 2;
        let (num_buckets, num_hashes) = bloom_dimensions(capacity, error);

        Ok(TimingBloomFilter {
            capacity,
            error,
            id,
            data_path,
            decay_time,
            num_buckets,
            num_hashes,
            cells: CellBuffer::new(layout, num_buckets),
            num_non_zero: 0,
            ring_size,
            window_ticks,
            seconds_per_tick: decay_time / f64::from(window_ticks),
        })
    }

    /// Target capacity this filter was sized for
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Target false-positive rate
    pub fn error(&self) -> f64 {
        self.error
    }

    /// Identifier carried in the filter metadata, if any
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Directory used for persistence, if configured
    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    /// Seconds a key stays visible after insertion
    pub fn decay_time(&self) -> f64 {
        self.decay_time
    }

    /// Number of buckets (`m`)
    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Number of hash functions (`k`)
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Number of cells currently holding a tick
    pub fn num_non_zero(&self) -> usize {
        self.num_non_zero
    }

    /// Number of distinct non-zero tick values (`2^w - 1`)
    pub fn ring_size(&self) -> u8 {
        self.ring_size
    }

    /// Number of ticks covered by the decay window
    pub fn window_ticks(&self) -> u8 {
        self.window_ticks
    }

    /// Wall-clock seconds per tick (`decay_time / window_ticks`)
    pub fn seconds_per_tick(&self) -> f64 {
        self.seconds_per_tick
    }

    /// True when the filter uses the one-byte-per-cell layout
    pub fn optimizations_disabled(&self) -> bool {
        self.cells.layout() == CellLayout::Wide8
    }

    /// Estimates the number of live keys from the fill level
    pub fn size(&self) -> f64 {
        fill_estimate(self.num_non_zero, self.num_buckets, self.num_hashes)
    }

    /// Tick value for a timestamp; never zero
    pub fn tick(&self, timestamp: f64) -> u8 {
        let interval_index = (timestamp / self.seconds_per_tick).floor() as u64;
        (interval_index % u64::from(self.ring_size)) as u8 + 1
    }

    /// The decay window `(tick_min, tick_max]` as of now
    pub fn tick_range(&self) -> (u8, u8) {
        self.tick_range_at(current_time())
    }

    /// The decay window `(tick_min, tick_max]` as of `now`
    pub fn tick_range_at(&self, now: f64) -> (u8, u8) {
        let tick_max = self.tick(now);
        let ring = i64::from(self.ring_size);
        let tick_min = (i64::from(tick_max) - i64::from(self.window_ticks) - 1).rem_euclid(ring)
            as u8
            + 1;
        (tick_min, tick_max)
    }

    /// Window membership test on the modular ring
    #[inline]
    fn in_window(value: u8, tick_min: u8, tick_max: u8) -> bool {
        if value == 0 {
            return false;
        }
        if tick_min < tick_max {
            tick_min < value && value <= tick_max
        } else {
            value <= tick_max || value > tick_min
        }
    }

    /// Stamps the current tick into the buckets of `key`
    pub fn add(&mut self, key: &[u8]) {
        let now = current_time();
        self.add_with_now(key, None, now);
    }

    /// Stamps the tick of `timestamp` into the buckets of `key`
    ///
    /// A timestamp older than `decay_time` seconds before the current wall
    /// clock is already expired and the insert is silently dropped.
    pub fn add_at(&mut self, key: &[u8], timestamp: f64) {
        let now = current_time();
        self.add_with_now(key, Some(timestamp), now);
    }

    pub(crate) fn add_with_now(&mut self, key: &[u8], timestamp: Option<f64>, now: f64) {
        if let Some(ts) = timestamp {
            if ts < now - self.decay_time {
                return;
            }
        }
        let tick = self.tick(timestamp.unwrap_or(now));
        for index in bucket_indexes(key, self.num_buckets, self.num_hashes) {
            if self.cells.get(index) == 0 {
                self.num_non_zero += 1;
            }
            self.cells.set(index, tick);
        }
    }

    /// Checks whether `key` was added within the decay window
    pub fn contains(&self, key: &[u8]) -> bool {
        self.contains_at(key, current_time())
    }

    /// Checks membership against the window as of `now`
    pub fn contains_at(&self, key: &[u8], now: f64) -> bool {
        let (tick_min, tick_max) = self.tick_range_at(now);
        bucket_indexes(key, self.num_buckets, self.num_hashes)
            .all(|index| Self::in_window(self.cells.get(index), tick_min, tick_max))
    }

    /// Zeroes every cell whose tick has left the window
    pub fn decay(&mut self) {
        self.decay_at(current_time());
    }

    /// Runs a full decay sweep against the window as of `now`
    pub fn decay_at(&mut self, now: f64) {
        let mut sweep = self.begin_decay_at(now);
        debug!(
            tick_min = sweep.tick_min,
            tick_max = sweep.tick_max,
            "starting decay sweep"
        );
        self.decay_chunk(&mut sweep, usize::MAX);
        debug!(num_non_zero = self.num_non_zero, "decay sweep finished");
    }

    /// Starts a resumable decay sweep with the current window
    pub fn begin_decay(&self) -> DecaySweep {
        self.begin_decay_at(current_time())
    }

    /// Starts a resumable decay sweep with the window as of `now`
    pub fn begin_decay_at(&self, now: f64) -> DecaySweep {
        let (tick_min, tick_max) = self.tick_range_at(now);
        DecaySweep {
            tick_min,
            tick_max,
            cursor: 0,
            num_cells: self.num_buckets,
        }
    }

    /// Advances a decay sweep by up to `max_cells` cells
    ///
    /// Returns true once the sweep is complete. `num_non_zero` is exact at
    /// every chunk boundary, so a cooperative scheduler may interleave other
    /// filter operations between chunks.
    pub fn decay_chunk(&mut self, sweep: &mut DecaySweep, max_cells: usize) -> bool {
        debug_assert_eq!(sweep.num_cells, self.num_buckets);
        let end = sweep.cursor.saturating_add(max_cells).min(self.num_buckets);
        for index in sweep.cursor..end {
            let value = self.cells.get(index);
            if value != 0 && !Self::in_window(value, sweep.tick_min, sweep.tick_max) {
                self.cells.set(index, 0);
                self.num_non_zero -= 1;
            }
        }
        sweep.cursor = end;
        sweep.is_complete()
    }

    /// Single-key removal cannot be expressed with tick stamps
    ///
    /// # Errors
    ///
    /// Always returns [`FilterError::Unsupported`].
    pub fn remove(&mut self, _key: &[u8]) -> Result<()> {
        Err(FilterError::Unsupported {
            operation: "remove",
        })
    }

    /// Whole-filter decrement cannot be expressed with tick stamps
    ///
    /// # Errors
    ///
    /// Always returns [`FilterError::Unsupported`].
    pub fn remove_all(&mut self) -> Result<()> {
        Err(FilterError::Unsupported {
            operation: "remove_all",
        })
    }

    /// Saves the filter into its configured data path
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::PersistenceDisabled`] when no data path is
    /// configured; I/O errors propagate.
    pub fn save(&self) -> Result<()> {
        let path = self
            .data_path
            .clone()
            .ok_or(FilterError::PersistenceDisabled)?;
        self.save_to(&path)
    }

    /// Saves the filter into `path`, atomically replacing any previous state
    ///
    /// # Errors
    ///
    /// I/O errors propagate; on failure the previously committed state is
    /// left untouched.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let tmp = persist::tmp_sibling(path);
        persist::remove_recursive(&tmp)?;
        self.write_into(&tmp)?;
        persist::commit_dir(&tmp, path)?;
        info!(path = %path.display(), "saved timing bloom");
        Ok(())
    }

    /// Rewrites only the cell buffer in the configured data path
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::PersistenceDisabled`] when no data path is
    /// configured; I/O errors propagate.
    pub fn flush(&self) -> Result<()> {
        let path = self
            .data_path
            .as_deref()
            .ok_or(FilterError::PersistenceDisabled)?;
        let bloom_path = path.join(BLOOM_FILENAME);
        let tmp_path = path.join(format!("{BLOOM_FILENAME}.tmp"));
        persist::write_file_sync(&tmp_path, self.cells.as_bytes())?;
        fs::rename(&tmp_path, &bloom_path)?;
        persist::fsync_dir(path);
        Ok(())
    }

    /// Writes `meta.json` and `bloom.npy` into `dir` without staging
    pub(crate) fn write_into(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        persist::write_json(
            &dir.join(META_FILENAME),
            &TimingMeta {
                capacity: self.capacity,
                error: self.error,
                id: self.id,
                decay_time: self.decay_time,
                disable_optimizations: self.optimizations_disabled(),
            },
        )?;
        persist::write_file_sync(&dir.join(BLOOM_FILENAME), self.cells.as_bytes())?;
        Ok(())
    }

    /// Loads a timing filter from a directory written by [`save`](Self::save)
    ///
    /// The cell layout is implied by the persisted `disable_optimizations`
    /// flag; `num_non_zero` is recounted from the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Corrupted`] when the buffer length does not
    /// match the metadata; I/O and JSON errors propagate.
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading timing bloom");
        let meta: TimingMeta = persist::read_json(&path.join(META_FILENAME))?;
        let mut filter = Self::with_options(
            meta.capacity,
            meta.decay_time,
            meta.error,
            meta.disable_optimizations,
            meta.id,
            Some(path.to_owned()),
        )?;

        let bytes = fs::read(path.join(BLOOM_FILENAME))?;
        filter.cells = CellBuffer::from_bytes(filter.cells.layout(), filter.num_buckets, bytes)?;
        filter.num_non_zero = filter.cells.count_non_zero();
        Ok(filter)
    }
}
