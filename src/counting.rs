//! Counting Bloom Filter: Bloom filter with deletion support
//!
//! A Counting Bloom Filter stores an 8-bit saturating counter per bucket
//! instead of a single bit, so previously added keys can be removed again.
//!
//! # Algorithm Overview
//!
//! - Add: increment the counters at k hash positions (saturating at 255)
//! - Remove: decrement the counters at k hash positions (flooring at 0)
//! - Query: check that all k counters are non-zero
//!
//! The filter tracks its number of non-zero buckets, which yields a
//! fill-based estimate of how many distinct keys it currently holds.
//!
//! # References
//!
//! - Fan et al. "Summary Cache: A Scalable Wide-Area Web Cache Sharing
//!   Protocol" (2000)
//!
//! # Examples
//!
//! ```
//! use fading_bloom::CountingBloomFilter;
//!
//! let mut filter = CountingBloomFilter::new(1000, 0.005).unwrap();
//!
//! filter.add(b"key1");
//! filter.add(b"key2");
//! assert!(filter.contains(b"key1"));
//!
//! filter.remove(b"key1");
//! assert!(!filter.contains(b"key1"));
//! assert!(filter.contains(b"key2"));
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cells::{CellBuffer, CellLayout};
use crate::common::hash::bucket_indexes;
use crate::common::validation::{validate_capacity, validate_probability};
use crate::common::{bloom_dimensions, FilterError, Result};
use crate::persist::{self, BLOOM_FILENAME, META_FILENAME};

/// Persisted parameters of a counting filter
#[derive(Debug, Serialize, Deserialize)]
struct CountingMeta {
    capacity: u64,
    error: f64,
    id: Option<u64>,
}

/// Counting Bloom Filter with saturating 8-bit buckets
///
/// Supports additions, removals and membership queries, and persists to a
/// directory holding `meta.json` and the raw bucket buffer `bloom.npy`.
///
/// # Examples
///
/// ```
/// use fading_bloom::CountingBloomFilter;
///
/// let mut filter = CountingBloomFilter::new(100, 0.01).unwrap();
/// filter.add(b"hello");
/// assert!(filter.contains(b"hello"));
/// ```
#[derive(Clone, Debug)]
pub struct CountingBloomFilter {
    capacity: u64,
    error: f64,
    id: Option<u64>,
    data_path: Option<PathBuf>,
    num_buckets: usize,
    num_hashes: usize,
    buckets: CellBuffer,
    num_non_zero: usize,
}

impl CountingBloomFilter {
    /// Creates a new counting filter sized for `capacity` keys at the target
    /// false-positive rate `error`
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidConfig`] if `capacity` is zero or
    /// `error` is not in (0, 1).
    ///
    /// # Examples
    ///
    /// ```
    /// use fading_bloom::CountingBloomFilter;
    ///
    /// let filter = CountingBloomFilter::new(1000, 0.005).unwrap();
    /// assert_eq!(filter.num_non_zero(), 0);
    /// ```
    pub fn new(capacity: u64, error: f64) -> Result<Self> {
        Self::with_options(capacity, error, None, None)
    }

    /// Creates a counting filter with an explicit id and data path
    ///
    /// The id is carried in `meta.json`; the data path is the directory used
    /// by [`save`](Self::save) and [`flush`](Self::flush).
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidConfig`] on out-of-range parameters.
    pub fn with_options(
        capacity: u64,
        error: f64,
        id: Option<u64>,
        data_path: Option<PathBuf>,
    ) -> Result<Self> {
        validate_capacity(capacity)?;
        validate_probability(error, "error")?;

        let (num_buckets, num_hashes) = bloom_dimensions(capacity, error);
        Ok(CountingBloomFilter {
            capacity,
            error,
            id,
            data_path,
            num_buckets,
            num_hashes,
            buckets: CellBuffer::new(CellLayout::Wide8, num_buckets),
            num_non_zero: 0,
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

    /// Number of buckets (`m`)
    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Number of hash functions (`k`)
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Number of buckets currently holding a non-zero count
    pub fn num_non_zero(&self) -> usize {
        self.num_non_zero
    }

    /// Adds one count for `key`
    pub fn add(&mut self, key: &[u8]) {
        self.add_n(key, 1);
    }

    /// Adds `n` counts for `key`, saturating each bucket at 255
    pub fn add_n(&mut self, key: &[u8], n: u8) {
        if n == 0 {
            return;
        }
        for index in bucket_indexes(key, self.num_buckets, self.num_hashes) {
            if self.buckets.get(index) == 0 {
                self.num_non_zero += 1;
            }
            self.buckets.saturating_add(index, n);
        }
    }

    /// Removes one count for `key`
    ///
    /// Buckets never go below zero; removing a key that was never added is a
    /// silent no-op per bucket.
    pub fn remove(&mut self, key: &[u8]) {
        self.remove_n(key, 1);
    }

    /// Removes `n` counts for `key`, flooring each bucket at zero
    pub fn remove_n(&mut self, key: &[u8], n: u8) {
        // Indexes may repeat for one key; each occurrence decrements once
        let indexes: Vec<usize> = bucket_indexes(key, self.num_buckets, self.num_hashes).collect();
        for index in indexes {
            self.decrement_bucket(index, n);
        }
    }

    /// Removes `n` counts from every bucket
    ///
    /// Useful for coarse whole-filter expiration.
    pub fn remove_all_n(&mut self, n: u8) {
        for index in 0..self.num_buckets {
            self.decrement_bucket(index, n);
        }
    }

    /// Removes one count from every bucket
    pub fn remove_all(&mut self) {
        self.remove_all_n(1);
    }

    #[inline]
    fn decrement_bucket(&mut self, index: usize, n: u8) {
        let old = self.buckets.get(index);
        if old == 0 {
            return;
        }
        if self.buckets.saturating_sub(index, n) == 0 {
            self.num_non_zero -= 1;
        }
    }

    /// Checks whether `key` might be in the filter
    ///
    /// Returns `false` only when the key is definitely absent.
    pub fn contains(&self, key: &[u8]) -> bool {
        bucket_indexes(key, self.num_buckets, self.num_hashes)
            .all(|index| self.buckets.get(index) != 0)
    }

    /// Estimates the number of distinct keys currently held
    ///
    /// Computed from the fill level as `-m · ln(1 - z/m) / k` where `z` is
    /// the non-zero bucket count.
    pub fn size(&self) -> f64 {
        fill_estimate(self.num_non_zero, self.num_buckets, self.num_hashes)
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
        info!(path = %path.display(), "saved counting bloom");
        Ok(())
    }

    /// Rewrites only the bucket buffer in the configured data path
    ///
    /// The buffer file is replaced atomically; `meta.json` is left untouched.
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
        persist::write_file_sync(&tmp_path, self.buckets.as_bytes())?;
        fs::rename(&tmp_path, &bloom_path)?;
        persist::fsync_dir(path);
        Ok(())
    }

    /// Writes `meta.json` and `bloom.npy` into `dir` without staging
    pub(crate) fn write_into(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        persist::write_json(
            &dir.join(META_FILENAME),
            &CountingMeta {
                capacity: self.capacity,
                error: self.error,
                id: self.id,
            },
        )?;
        persist::write_file_sync(&dir.join(BLOOM_FILENAME), self.buckets.as_bytes())?;
        Ok(())
    }

    /// Loads a counting filter from a directory written by [`save`](Self::save)
    ///
    /// The loaded filter keeps `path` as its data path. `num_non_zero` is
    /// recounted from the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Corrupted`] when the buffer length does not
    /// match the metadata; I/O and JSON errors propagate.
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading counting bloom");
        let meta: CountingMeta = persist::read_json(&path.join(META_FILENAME))?;
        let mut filter =
            Self::with_options(meta.capacity, meta.error, meta.id, Some(path.to_owned()))?;

        let bytes = fs::read(path.join(BLOOM_FILENAME))?;
        filter.buckets = CellBuffer::from_bytes(CellLayout::Wide8, filter.num_buckets, bytes)?;
        filter.num_non_zero = filter.buckets.count_non_zero();
        Ok(filter)
    }
}

/// Fill-based estimate of the number of keys held by a bloom
pub(crate) fn fill_estimate(num_non_zero: usize, num_buckets: usize, num_hashes: usize) -> f64 {
    if num_non_zero == 0 {
        return 0.0;
    }
    let m = num_buckets as f64;
    let z = num_non_zero as f64;
    -m * (1.0 - z / m).ln() / num_hashes as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_derivation() {
        let filter = CountingBloomFilter::new(1000, 0.002).unwrap();
        assert_eq!(filter.num_buckets(), 12935);
        assert_eq!(filter.num_hashes(), 9);

        let filter = CountingBloomFilter::new(1000, 0.0002).unwrap();
        assert_eq!(filter.num_buckets(), 17728);
        assert_eq!(filter.num_hashes(), 13);
    }

    #[test]
    fn test_invalid_params() {
        assert!(CountingBloomFilter::new(0, 0.005).is_err());
        assert!(CountingBloomFilter::new(1000, 0.0).is_err());
        assert!(CountingBloomFilter::new(1000, 1.0).is_err());
    }

    #[test]
    fn test_add_contains() {
        let mut filter = CountingBloomFilter::new(100, 0.01).unwrap();
        filter.add(b"hello");
        assert!(filter.contains(b"hello"));
        assert!(!filter.contains(b"world"));
    }

    #[test]
    fn test_remove_restores_absence() {
        let mut filter = CountingBloomFilter::new(100, 0.01).unwrap();
        filter.add(b"key1");
        filter.add(b"key2");

        filter.remove(b"key1");
        assert!(!filter.contains(b"key1"));
        assert!(filter.contains(b"key2"));
    }

    #[test]
    fn test_double_add_single_remove_remains() {
        // Scenario: two counts survive one removal
        let mut filter = CountingBloomFilter::new(1000, 0.005).unwrap();
        filter.add(b"target");
        filter.add(b"target");
        filter.remove(b"target");

        assert!(filter.contains(b"target"));
        assert_eq!(filter.num_non_zero(), filter.num_hashes());
    }

    #[test]
    fn test_remove_on_empty_filter_is_noop() {
        let mut filter = CountingBloomFilter::new(100, 0.01).unwrap();
        filter.remove(b"absent");
        filter.remove_all();
        assert_eq!(filter.num_non_zero(), 0);
        assert_eq!(filter.size(), 0.0);
    }

    #[test]
    fn test_remove_all_expires_everything() {
        let mut filter = CountingBloomFilter::new(100, 0.01).unwrap();
        filter.add(b"a");
        filter.add(b"b");
        filter.remove_all();
        assert!(!filter.contains(b"a"));
        assert!(!filter.contains(b"b"));
        assert_eq!(filter.num_non_zero(), 0);
    }

    #[test]
    fn test_saturation_never_wraps() {
        let mut filter = CountingBloomFilter::new(10, 0.01).unwrap();
        for _ in 0..300 {
            filter.add(b"hot");
        }
        assert!(filter.contains(b"hot"));
        // One remove must not clear a saturated bucket back past zero
        filter.remove(b"hot");
        assert!(filter.contains(b"hot"));
    }

    #[test]
    fn test_size_estimate() {
        let mut filter = CountingBloomFilter::new(1000, 0.005).unwrap();
        assert_eq!(filter.size(), 0.0);

        for i in 0..100u32 {
            filter.add(format!("key_{i}").as_bytes());
        }
        let size = filter.size();
        assert!(
            (size - 100.0).abs() < 10.0,
            "estimate {size} too far from 100"
        );
    }

    #[test]
    fn test_num_non_zero_tracks_buffer() {
        let mut filter = CountingBloomFilter::new(500, 0.01).unwrap();
        for i in 0..50u32 {
            filter.add(format!("key_{i}").as_bytes());
        }
        for i in 0..25u32 {
            filter.remove(format!("key_{i}").as_bytes());
        }
        assert_eq!(filter.num_non_zero(), filter_buffer_non_zero(&filter));
    }

    fn filter_buffer_non_zero(filter: &CountingBloomFilter) -> usize {
        filter.buckets.count_non_zero()
    }

    #[test]
    fn test_save_without_path_fails() {
        let filter = CountingBloomFilter::new(100, 0.01).unwrap();
        assert!(matches!(
            filter.save(),
            Err(FilterError::PersistenceDisabled)
        ));
        assert!(matches!(
            filter.flush(),
            Err(FilterError::PersistenceDisabled)
        ));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counting");

        let mut filter = CountingBloomFilter::new(500, 0.005).unwrap();
        filter.add(b"alpha");
        filter.add(b"beta");
        filter.save_to(&path).unwrap();

        let restored = CountingBloomFilter::load(&path).unwrap();
        assert!(restored.contains(b"alpha"));
        assert!(restored.contains(b"beta"));
        assert!(!restored.contains(b"gamma"));
        assert_eq!(restored.num_non_zero(), filter.num_non_zero());
        assert_eq!(restored.capacity(), 500);
    }

    #[test]
    fn test_flush_rewrites_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counting");

        let mut filter =
            CountingBloomFilter::with_options(500, 0.005, None, Some(path.clone())).unwrap();
        filter.add(b"early");
        filter.save().unwrap();

        filter.add(b"late");
        filter.flush().unwrap();

        let restored = CountingBloomFilter::load(&path).unwrap();
        assert!(restored.contains(b"early"));
        assert!(restored.contains(b"late"));
    }
}
