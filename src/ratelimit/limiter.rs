//! Core rate limiter implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::window::WindowCounter;
use crate::clock::{Clock, Timestamp};
use crate::error::{NoteguardError, Result};

/// Default window length (15 minutes).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Default number of requests admitted per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 200;
/// Default period between sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Quota settings for a `RateLimiter`.
///
/// Validated on construction and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    window: Duration,
    max_requests: u64,
    sweep_interval: Duration,
}

impl RateLimiterConfig {
    /// Create a config with the default sweep interval.
    pub fn new(window: Duration, max_requests: u64) -> Result<Self> {
        Self::with_sweep_interval(window, max_requests, DEFAULT_SWEEP_INTERVAL)
    }

    /// Create a config with an explicit sweep interval.
    pub fn with_sweep_interval(
        window: Duration,
        max_requests: u64,
        sweep_interval: Duration,
    ) -> Result<Self> {
        if window.is_zero() {
            return Err(NoteguardError::Config(
                "rate limit window must be greater than zero".to_string(),
            ));
        }
        if max_requests == 0 {
            return Err(NoteguardError::Config(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if sweep_interval.is_zero() {
            return Err(NoteguardError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            window,
            max_requests,
            sweep_interval,
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_requests: DEFAULT_MAX_REQUESTS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Snapshot of a key's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Requests still admissible in the current window
    pub remaining: u64,
    /// When the current window expires (ms since epoch)
    pub reset_at: Timestamp,
}

impl RateLimitInfo {
    /// The reset time as a UTC datetime.
    pub fn reset_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.reset_at as i64)
    }
}

/// State shared between the limiter and its sweep task.
struct Shared {
    counters: Mutex<HashMap<String, WindowCounter>>,
    clock: Arc<dyn Clock>,
    disposed: AtomicBool,
}

impl Shared {
    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|_, counter| !counter.is_expired(now));
        before - counters.len()
    }
}

/// Per-key fixed-window rate limiter.
///
/// All counter reads and writes, including the periodic sweep, go through
/// one mutex, so "check expiry, reset or increment" is a single step for
/// any number of concurrent callers. The limiter is meant to be built once
/// by the application and shared behind an `Arc`.
pub struct RateLimiter {
    config: RateLimiterConfig,
    shared: Arc<Shared>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a limiter and start its sweep on the current tokio runtime.
    ///
    /// Fails with `NoteguardError::Runtime` when called outside a runtime.
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            NoteguardError::Runtime(format!("rate limiter sweep requires a tokio runtime: {}", e))
        })?;

        let shared = Arc::new(Shared {
            counters: Mutex::new(HashMap::new()),
            clock,
            disposed: AtomicBool::new(false),
        });

        let sweeper = runtime.spawn(run_sweeper(shared.clone(), config.sweep_interval));

        debug!(
            window_ms = config.window.as_millis() as u64,
            max_requests = config.max_requests,
            sweep_interval_ms = config.sweep_interval.as_millis() as u64,
            "Rate limiter started"
        );

        Ok(Self {
            config,
            shared,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Check whether a request for `key` is allowed, recording it if so.
    pub fn check(&self, key: &str) -> bool {
        let now = self.shared.clock.now();
        let mut counters = self.shared.counters.lock();

        if let Some(counter) = counters.get_mut(key) {
            if !counter.is_expired(now) {
                let allowed = counter.try_admit(self.config.max_requests);
                if allowed {
                    trace!(key = %key, count = counter.count, "Request admitted");
                } else {
                    debug!(key = %key, reset_at = counter.reset_at, "Rate limit exceeded");
                }
                return allowed;
            }
        }

        trace!(key = %key, "Opening new rate limit window");
        counters.insert(key.to_string(), WindowCounter::fresh(now, self.config.window));
        true
    }

    /// Like `check`, but a denial becomes `NoteguardError::RateLimitExceeded`.
    pub fn enforce(&self, key: &str) -> Result<()> {
        if self.check(key) {
            Ok(())
        } else {
            Err(NoteguardError::RateLimitExceeded {
                key: key.to_string(),
            })
        }
    }

    /// Current quota for `key`, or `None` if the key has no entry.
    ///
    /// An expired entry that has not been swept yet still reports its
    /// old window.
    pub fn info(&self, key: &str) -> Option<RateLimitInfo> {
        let counters = self.shared.counters.lock();
        counters.get(key).map(|counter| RateLimitInfo {
            remaining: counter.remaining(self.config.max_requests),
            reset_at: counter.reset_at,
        })
    }

    /// Run one sweep cycle now, returning how many entries were evicted.
    pub fn sweep_expired(&self) -> usize {
        self.shared.sweep()
    }

    /// Number of keys currently holding an entry.
    pub fn tracked_keys(&self) -> usize {
        self.shared.counters.lock().len()
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Stop the background sweep. Safe to call more than once.
    ///
    /// A sweep already running finishes; no new one starts after this
    /// returns.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        debug!("Rate limiter sweep stopped");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

async fn run_sweeper(shared: Arc<Shared>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if shared.disposed.load(Ordering::SeqCst) {
            break;
        }
        let evicted = shared.sweep();
        if evicted > 0 {
            debug!(evicted = evicted, "Swept expired rate limit entries");
        }
    }
}
