//! Periodic-callback tickers driving the decay sweep
//!
//! A scaling filter adopts a [`Ticker`] at construction and wires its decay
//! into it. The trait is a minimal capability interface - `setup` once,
//! then `start`/`stop` - so the cadence source is pluggable:
//!
//! - [`NoOpTicker`] never fires; tests drive decay explicitly.
//! - [`ThreadTicker`] fires from a dedicated timer thread.
//!
//! Precondition violations (double setup, starting an already-running
//! timer, stopping a stopped one) surface as
//! [`FilterError::TickerState`](crate::FilterError::TickerState).

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::common::{FilterError, Result};

/// Callback invoked on every tick
pub type TickerCallback = Box<dyn FnMut() + Send + 'static>;

/// Capability interface for periodic callbacks
pub trait Ticker: Send {
    /// Registers the callback and its interval; allowed at most once
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::TickerState`] if the ticker was already set up.
    fn setup(&mut self, callback: TickerCallback, interval: Duration) -> Result<()>;

    /// Starts firing the callback every interval
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::TickerState`] without a prior [`setup`](Self::setup)
    /// or when the timer is already running.
    fn start(&mut self) -> Result<()>;

    /// Stops firing; an in-flight callback runs to completion
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::TickerState`] without a prior [`setup`](Self::setup)
    /// or when the timer is not running.
    fn stop(&mut self) -> Result<()>;

    /// True while the timer is running
    fn is_running(&self) -> bool;
}

/// Ticker that never fires its callback
///
/// Keeps the full setup/start/stop state machine so code under test observes
/// the same preconditions as with a real ticker, but decay only happens when
/// the test calls it explicitly.
#[derive(Default)]
pub struct NoOpTicker {
    configured: bool,
    running: bool,
}

impl NoOpTicker {
    /// Creates an inert ticker
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for NoOpTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoOpTicker")
            .field("configured", &self.configured)
            .field("running", &self.running)
            .finish()
    }
}

impl Ticker for NoOpTicker {
    fn setup(&mut self, _callback: TickerCallback, _interval: Duration) -> Result<()> {
        if self.configured {
            return Err(FilterError::TickerState("ticker is already set up"));
        }
        self.configured = true;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if !self.configured {
            return Err(FilterError::TickerState("setup must be called before start"));
        }
        if self.running {
            return Err(FilterError::TickerState("timer is already running"));
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.configured {
            return Err(FilterError::TickerState("setup must be called before stop"));
        }
        if !self.running {
            return Err(FilterError::TickerState("timer is not running"));
        }
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Shared state between a [`ThreadTicker`] and its timer thread
struct TimerShared {
    interval: Duration,
    callback: Mutex<TickerCallback>,
    stop_requested: Mutex<bool>,
    wakeup: Condvar,
}

/// Ticker backed by a dedicated timer thread
///
/// `start` spawns a thread that sleeps on a condvar and invokes the callback
/// each time the interval elapses; `stop` wakes the thread and joins it, so
/// an in-flight callback always runs to completion before `stop` returns.
#[derive(Default)]
pub struct ThreadTicker {
    timer: Option<Arc<TimerShared>>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadTicker {
    /// Creates a thread ticker; the thread is spawned by `start`
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for ThreadTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadTicker")
            .field("configured", &self.timer.is_some())
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl Ticker for ThreadTicker {
    fn setup(&mut self, callback: TickerCallback, interval: Duration) -> Result<()> {
        if self.timer.is_some() {
            return Err(FilterError::TickerState("ticker is already set up"));
        }
        self.timer = Some(Arc::new(TimerShared {
            interval,
            callback: Mutex::new(callback),
            stop_requested: Mutex::new(false),
            wakeup: Condvar::new(),
        }));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let timer = self
            .timer
            .as_ref()
            .ok_or(FilterError::TickerState("setup must be called before start"))?;
        if self.handle.is_some() {
            return Err(FilterError::TickerState("timer is already running"));
        }

        *timer.stop_requested.lock() = false;
        let shared = Arc::clone(timer);
        self.handle = Some(std::thread::spawn(move || {
            debug!(interval = ?shared.interval, "ticker thread started");
            loop {
                let mut stop = shared.stop_requested.lock();
                if *stop {
                    break;
                }
                let timed_out = shared
                    .wakeup
                    .wait_for(&mut stop, shared.interval)
                    .timed_out();
                let stopping = *stop;
                drop(stop);
                if stopping {
                    break;
                }
                if timed_out {
                    (shared.callback.lock())();
                }
            }
            debug!("ticker thread stopped");
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let timer = self
            .timer
            .as_ref()
            .ok_or(FilterError::TickerState("setup must be called before stop"))?;
        let handle = self
            .handle
            .take()
            .ok_or(FilterError::TickerState("timer is not running"))?;

        *timer.stop_requested.lock() = true;
        timer.wakeup.notify_all();
        if handle.join().is_err() {
            return Err(FilterError::TickerState("ticker callback panicked"));
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ThreadTicker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.stop();
        }
    }
}
