//! Timestamp sources
//!
//! [`CoarseClock`] serves a cached reading that a background ticker keeps
//! fresh, so a burst of events costs one atomic load each instead of a
//! clock query. The ticker parks itself when no one asks for the time.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

/// Ticks without demand before the ticker goes idle
const IDLE_TICKS: u32 = 2_000;

/// Monotonic time for events that arrive without a hardware timestamp
pub trait TimestampSource {
    fn now(&self) -> Instant;

    /// How far behind real time a reading may be. Must stay strictly
    /// below the smallest debounce threshold.
    fn max_staleness(&self) -> Duration {
        Duration::ZERO
    }
}

/// Plain `Instant::now()` on every call
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimestampSource for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CoarseShared {
    epoch: Instant,
    /// Nanoseconds since `epoch` at the last refresh
    offset_ns: AtomicU64,
    window: Duration,
    /// The ticker is running and keeping `offset_ns` fresh
    fresh: AtomicBool,
    /// `now()` was called since the ticker last looked
    demand: AtomicBool,
    stop: AtomicBool,
    ticker: OnceLock<Thread>,
}

impl CoarseShared {
    fn refresh(&self) -> Instant {
        let now = Instant::now();
        let ns = now.saturating_duration_since(self.epoch).as_nanos() as u64;
        // Concurrent refreshers may race; keep the newest reading
        let prev = self.offset_ns.fetch_max(ns, Ordering::AcqRel);
        self.epoch + Duration::from_nanos(prev.max(ns))
    }

    fn cached(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }
}

/// Clock serving a cached reading while its ticker runs, and a fresh
/// reading otherwise.
///
/// The ticker refreshes once per window, so a cached reading is nominally
/// at most one window old. The bound is only as good as the scheduler: if
/// the ticker thread is starved, readings fall further behind until it runs
/// again. Collaborators with hardware timestamps should pass those instead.
///
/// The window must stay strictly below the smallest debounce threshold;
/// [`DechatterEngine`](crate::engine::DechatterEngine) rejects
/// configurations that break this.
#[derive(Clone)]
pub struct CoarseClock {
    shared: Arc<CoarseShared>,
}

impl CoarseClock {
    pub fn new(window: Duration) -> Self {
        let epoch = Instant::now();
        Self {
            shared: Arc::new(CoarseShared {
                epoch,
                offset_ns: AtomicU64::new(0),
                window,
                fresh: AtomicBool::new(false),
                demand: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                ticker: OnceLock::new(),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.shared.window
    }

    /// Whether readings are currently served from the cache
    pub fn is_cached(&self) -> bool {
        self.shared.fresh.load(Ordering::Acquire)
    }

    /// Force a fresh reading into the cache
    pub fn invalidate(&self) -> Instant {
        self.shared.refresh()
    }

    /// Start the background ticker. Dropping the returned handle stops it.
    pub fn start_ticker(&self) -> io::Result<ClockTicker> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("dechatter-clock".to_string())
            .spawn(move || run_ticker(shared))?;
        let _ = self.shared.ticker.set(handle.thread().clone());
        Ok(ClockTicker {
            shared: Arc::clone(&self.shared),
            handle: Some(handle),
        })
    }
}

impl TimestampSource for CoarseClock {
    fn max_staleness(&self) -> Duration {
        self.shared.window
    }

    fn now(&self) -> Instant {
        let shared = &self.shared;
        shared.demand.store(true, Ordering::Relaxed);
        if shared.fresh.load(Ordering::Acquire) {
            return shared.cached();
        }
        let now = shared.refresh();
        if let Some(ticker) = shared.ticker.get() {
            ticker.unpark();
        }
        now
    }
}

fn run_ticker(shared: Arc<CoarseShared>) {
    let mut idle_ticks = 0u32;
    while !shared.stop.load(Ordering::Acquire) {
        shared.refresh();
        shared.fresh.store(true, Ordering::Release);
        thread::sleep(shared.window);

        if shared.demand.swap(false, Ordering::AcqRel) {
            idle_ticks = 0;
            continue;
        }
        idle_ticks += 1;
        if idle_ticks >= IDLE_TICKS {
            shared.fresh.store(false, Ordering::Release);
            while !shared.demand.load(Ordering::Acquire) && !shared.stop.load(Ordering::Acquire) {
                thread::park_timeout(Duration::from_millis(500));
            }
            idle_ticks = 0;
        }
    }
    shared.fresh.store(false, Ordering::Release);
}

/// Handle to the running clock ticker
pub struct ClockTicker {
    shared: Arc<CoarseShared>,
    handle: Option<JoinHandle<()>>,
}

impl ClockTicker {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for ClockTicker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Hand-driven clock for replaying recorded streams and for tests
#[derive(Debug, Clone)]
pub struct ManualClock {
    epoch: Instant,
    offset_ns: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The instant this clock reads at offset zero
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ns.fetch_add(by.as_nanos() as u64, Ordering::AcqRel);
    }

    /// Jump to an absolute offset, backwards included
    pub fn set(&self, offset: Duration) {
        self.offset_ns.store(offset.as_nanos() as u64, Ordering::Release);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampSource for ManualClock {
    fn now(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }
}
