//! Scaling Timing Bloom Filter: decaying membership with elastic capacity
//!
//! Composes an ordered sequence of [`TimingBloomFilter`] sub-filters after
//! the scalable-bloom construction of Almeida et al., adapted for time
//! decay. Sub-filter `i` carries capacity `⌊ln 2 · n · g^i⌋` and error
//! `ε · (1 - r) · r^i`, so the expected combined error
//! `1 - ∏(1 - err_i)` stays below `ε` no matter how far the filter grows.
//!
//! # Lifecycle
//!
//! - Writes route to the *active* sub-filter: the first one under
//!   `max_fill_factor` of its capacity, scanned newest-first when
//!   `insert_tail` is set ("convergence") or oldest-first otherwise
//!   ("compactness"). When every sub-filter is full a new one is allocated
//!   with the next id.
//! - `decay` sweeps every sub-filter, reaps the ones that emptied (deleting
//!   their backing directories), and - when a single under-full sub-filter
//!   with a non-zero id remains - allocates a smaller companion with
//!   `id - 1` so the filter can also grow back down.
//! - A [`Ticker`] adopted at construction drives `decay` once per tick
//!   interval.
//!
//! # References
//!
//! - Almeida et al. "Scalable Bloom Filters" (2007)
//!
//! # Examples
//!
//! ```
//! use fading_bloom::{ScalingConfig, ScalingTimingBloomFilter};
//!
//! let config = ScalingConfig::new(1000, 3600.0);
//! let mut filter = ScalingTimingBloomFilter::new(config).unwrap();
//!
//! filter.add(b"key").unwrap();
//! assert!(filter.contains(b"key"));
//! assert!(filter.expected_error() < 0.005);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::common::validation::{
    validate_capacity, validate_duration, validate_fill_factors, validate_growth_factor,
    validate_probability,
};
use crate::common::{current_time, FilterError, Result};
use crate::persist::{self, BLOOMS_DIRNAME, META_FILENAME};
use crate::ticker::{NoOpTicker, Ticker, TickerCallback};
use crate::timing::TimingBloomFilter;

/// Configuration of a [`ScalingTimingBloomFilter`]
///
/// [`ScalingConfig::new`] fills in the conventional defaults; override
/// fields directly before constructing the filter.
#[derive(Clone, Debug)]
pub struct ScalingConfig {
    /// Target capacity of the first sub-filter's generation
    pub capacity: u64,
    /// Seconds a key stays visible after insertion
    pub decay_time: f64,
    /// Total false-positive budget across all sub-filters
    pub error: f64,
    /// Geometric ratio tightening each generation's error share
    pub error_tightening_ratio: f64,
    /// Capacity growth per generation; `None` keeps every generation at
    /// `capacity`
    pub growth_factor: Option<f64>,
    /// Fill level below which a lone sub-filter spawns a smaller companion;
    /// `None` disables shrinking
    pub min_fill_factor: Option<f64>,
    /// Fill level at which a sub-filter stops accepting writes
    pub max_fill_factor: f64,
    /// Route inserts newest-first (true) or oldest-first (false)
    pub insert_tail: bool,
    /// Use the one-byte-per-cell layout in the sub-filters
    pub disable_optimizations: bool,
    /// Directory for [`ScalingTimingBloomFilter::save`]
    pub data_path: Option<PathBuf>,
}

impl ScalingConfig {
    /// Creates a configuration with the conventional defaults
    ///
    /// Error 0.005 tightened by 0.5 per generation, growth factor 2,
    /// fill-factor band (0.2, 0.8], newest-first inserts, packed cells.
    pub fn new(capacity: u64, decay_time: f64) -> Self {
        ScalingConfig {
            capacity,
            decay_time,
            error: 0.005,
            error_tightening_ratio: 0.5,
            growth_factor: Some(2.0),
            min_fill_factor: Some(0.2),
            max_fill_factor: 0.8,
            insert_tail: true,
            disable_optimizations: false,
            data_path: None,
        }
    }

    /// Checks every parameter range before any allocation happens
    fn validate(&self) -> Result<()> {
        validate_capacity(self.capacity)?;
        validate_duration(self.decay_time, "decay_time")?;
        validate_probability(self.error, "error")?;
        validate_probability(self.error_tightening_ratio, "error_tightening_ratio")?;
        validate_fill_factors(self.min_fill_factor, self.max_fill_factor)?;
        validate_growth_factor(self.growth_factor)?;
        Ok(())
    }
}

/// Persisted parameters of a scaling filter
#[derive(Debug, Serialize, Deserialize)]
struct ScalingMeta {
    capacity: u64,
    decay_time: f64,
    error: f64,
    error_tightening_ratio: f64,
    growth_factor: Option<f64>,
    min_fill_factor: Option<f64>,
    max_fill_factor: f64,
    insert_tail: bool,
    disable_optimizations: bool,
}

/// Mutable state shared with the ticker callback
struct ScalingCore {
    config: ScalingConfig,
    error_initial: f64,
    blooms: Vec<TimingBloomFilter>,
}

impl ScalingCore {
    /// Next auto-assigned sub-filter id: one past the largest in use
    fn next_id(&self) -> u64 {
        self.blooms
            .iter()
            .filter_map(TimingBloomFilter::id)
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Capacity of the sub-filter generation `id`
    fn capacity_for_id(&self, id: u64) -> u64 {
        match self.config.growth_factor {
            Some(growth) => {
                let capacity = std::f64::consts::LN_2
                    * self.config.capacity as f64
                    * growth.powi(id as i32);
                (capacity as u64).max(1)
            }
            None => self.config.capacity,
        }
    }

    /// Error share of the sub-filter generation `id`
    fn error_for_id(&self, id: u64) -> f64 {
        self.error_initial * self.config.error_tightening_ratio.powi(id as i32)
    }

    fn bloom_path_for_id(&self, id: u64) -> Option<PathBuf> {
        self.config
            .data_path
            .as_ref()
            .map(|path| path.join(BLOOMS_DIRNAME).join(id.to_string()))
    }

    /// Allocates a sub-filter; `None` auto-assigns the next id while
    /// `Some(0)` is honored as a genuine id-0 request
    fn spawn_bloom(&mut self, id: Option<u64>) -> Result<usize> {
        let id = id.unwrap_or_else(|| self.next_id());
        let bloom = TimingBloomFilter::with_options(
            self.capacity_for_id(id),
            self.config.decay_time,
            self.error_for_id(id),
            self.config.disable_optimizations,
            Some(id),
            self.bloom_path_for_id(id),
        )?;
        debug!(
            id,
            capacity = bloom.capacity(),
            error = bloom.error(),
            "allocated sub-filter"
        );
        self.blooms.push(bloom);
        Ok(self.blooms.len() - 1)
    }

    /// Picks the sub-filter that receives the next write, allocating a new
    /// generation when every existing one is at its fill limit
    fn active_bloom(&mut self) -> Result<usize> {
        let count = self.blooms.len();
        let order: Vec<usize> = if self.config.insert_tail {
            (0..count).rev().collect()
        } else {
            (0..count).collect()
        };
        for index in order {
            let bloom = &self.blooms[index];
            if bloom.size() < self.config.max_fill_factor * bloom.capacity() as f64 {
                return Ok(index);
            }
        }
        self.spawn_bloom(None)
    }

    fn add(&mut self, key: &[u8], timestamp: Option<f64>, now: f64) -> Result<()> {
        let index = self.active_bloom()?;
        self.blooms[index].add_with_now(key, timestamp, now);
        Ok(())
    }

    fn contains(&self, key: &[u8], now: f64) -> bool {
        self.blooms.iter().any(|bloom| bloom.contains_at(key, now))
    }

    fn decay(&mut self, now: f64) -> Result<()> {
        for bloom in &mut self.blooms {
            bloom.decay_at(now);
        }
        self.reap_empty()?;
        self.try_shrink()?;
        Ok(())
    }

    /// Removes emptied sub-filters and their backing directories
    ///
    /// Two phases: mark the empty ones, then sweep the vector. The newest
    /// sub-filter always survives so the filter keeps a write target.
    fn reap_empty(&mut self) -> Result<()> {
        let mut dead: Vec<usize> = self
            .blooms
            .iter()
            .enumerate()
            .filter(|(_, bloom)| bloom.num_non_zero() == 0)
            .map(|(index, _)| index)
            .collect();
        if dead.len() == self.blooms.len() {
            dead.pop();
        }
        for index in dead.iter().rev() {
            let bloom = self.blooms.remove(*index);
            if let Some(path) = bloom.data_path() {
                persist::remove_recursive(path)?;
            }
            debug!(id = ?bloom.id(), "reaped empty sub-filter");
        }
        Ok(())
    }

    /// Grows the filter back down once a lone sub-filter is under-full
    fn try_shrink(&mut self) -> Result<bool> {
        if self.blooms.len() != 1 {
            return Ok(false);
        }
        let Some(min_fill) = self.config.min_fill_factor else {
            return Ok(false);
        };
        let bloom = &self.blooms[0];
        let Some(id) = bloom.id() else {
            return Ok(false);
        };
        if id == 0 {
            return Ok(false);
        }
        let size = bloom.size();
        if size > 0.0 && size < min_fill * bloom.capacity() as f64 {
            debug!(from_id = id, to_id = id - 1, "shrinking into smaller companion");
            self.spawn_bloom(Some(id - 1))?;
            return Ok(true);
        }
        Ok(false)
    }

    fn size(&self) -> f64 {
        self.blooms.iter().map(TimingBloomFilter::size).sum()
    }

    fn expected_error(&self) -> f64 {
        if self.blooms.is_empty() {
            return 0.0;
        }
        1.0 - self
            .blooms
            .iter()
            .map(|bloom| 1.0 - bloom.error())
            .product::<f64>()
    }

    fn meta(&self) -> ScalingMeta {
        ScalingMeta {
            capacity: self.config.capacity,
            decay_time: self.config.decay_time,
            error: self.config.error,
            error_tightening_ratio: self.config.error_tightening_ratio,
            growth_factor: self.config.growth_factor,
            min_fill_factor: self.config.min_fill_factor,
            max_fill_factor: self.config.max_fill_factor,
            insert_tail: self.config.insert_tail,
            disable_optimizations: self.config.disable_optimizations,
        }
    }
}

/// Self-maintaining, self-sizing decaying membership set
///
/// All mutable state lives behind a mutex shared with the adopted ticker,
/// which drives [`decay`](Self::decay) once per tick interval from wherever
/// the ticker implementation schedules its callback.
///
/// # Examples
///
/// ```
/// use fading_bloom::{ScalingConfig, ScalingTimingBloomFilter};
///
/// let mut filter =
///     ScalingTimingBloomFilter::new(ScalingConfig::new(100, 60.0)).unwrap();
/// for i in 0..500u32 {
///     filter.add(format!("key_{i}").as_bytes()).unwrap();
/// }
/// // The filter grew, but the combined error stays under budget
/// assert!(filter.sub_filter_count() > 1);
/// assert!(filter.expected_error() < 0.005);
/// ```
pub struct ScalingTimingBloomFilter {
    core: Arc<Mutex<ScalingCore>>,
    ticker: Box<dyn Ticker>,
    seconds_per_tick: f64,
}

impl ScalingTimingBloomFilter {
    /// Creates a scaling filter with an inert [`NoOpTicker`]
    ///
    /// Decay must be driven explicitly via [`decay`](Self::decay).
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidConfig`] when a parameter is out of
    /// range; nothing is allocated in that case.
    pub fn new(config: ScalingConfig) -> Result<Self> {
        Self::with_ticker(config, Box::new(NoOpTicker::new()))
    }

    /// Creates a scaling filter and adopts `ticker` to drive decay
    ///
    /// The ticker is set up with this filter's decay callback at the first
    /// sub-filter's tick interval and started immediately.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidConfig`] on out-of-range parameters and
    /// [`FilterError::TickerState`] if the ticker was already set up.
    pub fn with_ticker(config: ScalingConfig, ticker: Box<dyn Ticker>) -> Result<Self> {
        Self::assemble(config, Vec::new(), ticker)
    }

    fn assemble(
        config: ScalingConfig,
        blooms: Vec<TimingBloomFilter>,
        mut ticker: Box<dyn Ticker>,
    ) -> Result<Self> {
        config.validate()?;
        let error_initial = config.error * (1.0 - config.error_tightening_ratio);
        let mut core = ScalingCore {
            config,
            error_initial,
            blooms,
        };
        if core.blooms.is_empty() {
            core.spawn_bloom(None)?;
        }
        let seconds_per_tick = core.blooms[0].seconds_per_tick();
        let core = Arc::new(Mutex::new(core));

        let decay_core = Arc::clone(&core);
        let callback: TickerCallback = Box::new(move || {
            if let Err(err) = decay_core.lock().decay(current_time()) {
                error!(%err, "scheduled decay failed");
            }
        });
        ticker.setup(callback, Duration::from_secs_f64(seconds_per_tick))?;
        ticker.start()?;

        Ok(ScalingTimingBloomFilter {
            core,
            ticker,
            seconds_per_tick,
        })
    }

    /// Base capacity from the configuration
    pub fn capacity(&self) -> u64 {
        self.core.lock().config.capacity
    }

    /// Total false-positive budget
    pub fn error(&self) -> f64 {
        self.core.lock().config.error
    }

    /// Seconds a key stays visible after insertion
    pub fn decay_time(&self) -> f64 {
        self.core.lock().config.decay_time
    }

    /// Tick interval the decay schedule runs at
    pub fn seconds_per_tick(&self) -> f64 {
        self.seconds_per_tick
    }

    /// Number of live sub-filters
    pub fn sub_filter_count(&self) -> usize {
        self.core.lock().blooms.len()
    }

    /// Ids of the live sub-filters in creation order
    pub fn sub_filter_ids(&self) -> Vec<u64> {
        self.core
            .lock()
            .blooms
            .iter()
            .filter_map(TimingBloomFilter::id)
            .collect()
    }

    /// Adds `key` with the current timestamp
    ///
    /// # Errors
    ///
    /// Fails only when a required new sub-filter cannot be allocated.
    pub fn add(&mut self, key: &[u8]) -> Result<()> {
        let now = current_time();
        self.core.lock().add(key, None, now)
    }

    /// Adds `key` as of `timestamp`
    ///
    /// Timestamps older than the decay window are silently dropped, exactly
    /// as on [`TimingBloomFilter::add_at`].
    ///
    /// # Errors
    ///
    /// Fails only when a required new sub-filter cannot be allocated.
    pub fn add_at(&mut self, key: &[u8], timestamp: f64) -> Result<()> {
        let now = current_time();
        self.core.lock().add(key, Some(timestamp), now)
    }

    /// Checks whether any sub-filter holds `key` within the decay window
    pub fn contains(&self, key: &[u8]) -> bool {
        self.contains_at(key, current_time())
    }

    /// Checks membership against the window as of `now`
    pub fn contains_at(&self, key: &[u8], now: f64) -> bool {
        self.core.lock().contains(key, now)
    }

    /// Sweeps every sub-filter, reaps empties and applies the shrink rule
    ///
    /// # Errors
    ///
    /// I/O errors from deleting a reaped sub-filter's directory propagate.
    pub fn decay(&mut self) -> Result<()> {
        self.decay_at(current_time())
    }

    /// Runs the decay pipeline against the window as of `now`
    ///
    /// # Errors
    ///
    /// I/O errors from deleting a reaped sub-filter's directory propagate.
    pub fn decay_at(&mut self, now: f64) -> Result<()> {
        self.core.lock().decay(now)
    }

    /// Estimated number of live keys across all sub-filters
    pub fn size(&self) -> f64 {
        self.core.lock().size()
    }

    /// Expected combined false-positive rate of the live sub-filters
    ///
    /// Strictly below the configured `error` by construction.
    pub fn expected_error(&self) -> f64 {
        self.core.lock().expected_error()
    }

    /// Resumes the decay schedule
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::TickerState`] if the ticker is already
    /// running.
    pub fn start(&mut self) -> Result<()> {
        self.ticker.start()
    }

    /// Halts the decay schedule; an in-flight decay runs to completion
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::TickerState`] if the ticker is not running.
    pub fn stop(&mut self) -> Result<()> {
        self.ticker.stop()
    }

    /// Saves the filter tree into its configured data path
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::PersistenceDisabled`] when no data path is
    /// configured; I/O errors propagate.
    pub fn save(&self) -> Result<()> {
        let path = self
            .core
            .lock()
            .config
            .data_path
            .clone()
            .ok_or(FilterError::PersistenceDisabled)?;
        self.save_to(&path)
    }

    /// Saves the filter tree into `path`, atomically replacing any previous
    /// state
    ///
    /// The layout is `meta.json` plus one timing-filter directory per
    /// sub-filter under `blooms/<id>/`.
    ///
    /// # Errors
    ///
    /// I/O errors propagate; on failure the previously committed state is
    /// left untouched.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let core = self.core.lock();
        let tmp = persist::tmp_sibling(path);
        persist::remove_recursive(&tmp)?;
        fs::create_dir_all(&tmp)?;
        persist::write_json(&tmp.join(META_FILENAME), &core.meta())?;

        let blooms_dir = tmp.join(BLOOMS_DIRNAME);
        fs::create_dir_all(&blooms_dir)?;
        for bloom in &core.blooms {
            let id = bloom.id().ok_or_else(|| {
                FilterError::Corrupted("sub-filter has no id to persist under".to_string())
            })?;
            bloom.write_into(&blooms_dir.join(id.to_string()))?;
        }

        persist::commit_dir(&tmp, path)?;
        info!(
            path = %path.display(),
            sub_filters = core.blooms.len(),
            "saved scaling bloom"
        );
        Ok(())
    }

    /// Loads a scaling filter with an inert [`NoOpTicker`]
    ///
    /// # Errors
    ///
    /// I/O and metadata errors propagate; a malformed sub-filter directory
    /// surfaces as [`FilterError::Corrupted`].
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_ticker(path, Box::new(NoOpTicker::new()))
    }

    /// Loads a scaling filter and adopts `ticker` to drive decay
    ///
    /// Sub-filters are discovered under `blooms/` and ordered by id; each
    /// re-derives consistent capacity and error from its stored id.
    ///
    /// # Errors
    ///
    /// I/O and metadata errors propagate.
    pub fn load_with_ticker(path: &Path, ticker: Box<dyn Ticker>) -> Result<Self> {
        info!(path = %path.display(), "loading scaling bloom");
        let meta: ScalingMeta = persist::read_json(&path.join(META_FILENAME))?;

        let mut blooms = Vec::new();
        for dir in discover_blooms(&path.join(BLOOMS_DIRNAME))? {
            blooms.push(TimingBloomFilter::load(&dir)?);
        }
        blooms.sort_by_key(TimingBloomFilter::id);

        let config = ScalingConfig {
            capacity: meta.capacity,
            decay_time: meta.decay_time,
            error: meta.error,
            error_tightening_ratio: meta.error_tightening_ratio,
            growth_factor: meta.growth_factor,
            min_fill_factor: meta.min_fill_factor,
            max_fill_factor: meta.max_fill_factor,
            insert_tail: meta.insert_tail,
            disable_optimizations: meta.disable_optimizations,
            data_path: Some(path.to_owned()),
        };
        Self::assemble(config, blooms, ticker)
    }
}

impl std::fmt::Debug for ScalingTimingBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.lock();
        f.debug_struct("ScalingTimingBloomFilter")
            .field("config", &core.config)
            .field("sub_filters", &core.blooms.len())
            .field("ticker_running", &self.ticker.is_running())
            .finish()
    }
}

impl Drop for ScalingTimingBloomFilter {
    fn drop(&mut self) {
        if self.ticker.is_running() {
            let _ = self.ticker.stop();
        }
    }
}

/// Sub-filter directories beneath a scaling filter's `blooms/` directory
fn discover_blooms(blooms_dir: &Path) -> Result<Vec<PathBuf>> {
    if !blooms_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(blooms_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
