//! Coarse system load monitoring
//!
//! A background sampler reads CPU usage at low frequency and publishes a
//! "reduce processing" flag through atomics. The event path only ever does
//! atomic loads here.

use crate::config::LoadConfig;
use log::info;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Source of CPU utilisation samples, in percent (0-100)
pub trait CpuSampler: Send {
    /// `None` when no reading is available yet (or at all)
    fn sample(&mut self) -> Option<f32>;
}

/// Reads aggregate CPU time from `/proc/stat`
#[derive(Debug, Clone)]
pub struct ProcStatSampler {
    path: PathBuf,
    prev: Option<CpuTimes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl Default for ProcStatSampler {
    fn default() -> Self {
        Self::with_path("/proc/stat")
    }
}

impl ProcStatSampler {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            prev: None,
        }
    }
}

/// Parse the aggregate `cpu` line of `/proc/stat`
pub fn parse_proc_stat(contents: &str) -> Option<CpuTimes> {
    let line = contents.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    // user nice system idle iowait irq softirq steal
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total = fields.iter().sum();
    Some(CpuTimes { idle, total })
}

impl CpuSampler for ProcStatSampler {
    fn sample(&mut self) -> Option<f32> {
        let contents = fs::read_to_string(&self.path).ok()?;
        let times = parse_proc_stat(&contents)?;
        let prev = self.prev.replace(times)?;

        let total = times.total.saturating_sub(prev.total);
        if total == 0 {
            return None;
        }
        let idle = times.idle.saturating_sub(prev.idle).min(total);
        Some(100.0 * (1.0 - idle as f32 / total as f32))
    }
}

struct LoadShared {
    epoch: Instant,
    /// CPU usage in hundredths of a percent
    cpu_centi: AtomicU32,
    /// Milliseconds since `epoch` of the last sample, plus one; zero = never
    sampled_at_ms: AtomicU64,
    reducing: AtomicBool,
    stop: AtomicBool,
    settings: LoadSettings,
}

/// [`LoadConfig`] values, swappable while the sampler runs
struct LoadSettings {
    interval_ms: AtomicU64,
    validity_ms: AtomicU64,
    /// Watermarks in hundredths of a percent
    high_centi: AtomicU32,
    low_centi: AtomicU32,
}

fn centi(percent: f32) -> u32 {
    (percent.clamp(0.0, 100.0) * 100.0) as u32
}

impl LoadSettings {
    fn new(config: &LoadConfig) -> Self {
        Self {
            interval_ms: AtomicU64::new(config.sample_interval_ms),
            validity_ms: AtomicU64::new(config.validity_ms),
            high_centi: AtomicU32::new(centi(config.high_cpu_percent)),
            low_centi: AtomicU32::new(centi(config.low_cpu_percent)),
        }
    }

    fn store(&self, config: &LoadConfig) {
        self.interval_ms.store(config.sample_interval_ms, Ordering::Release);
        self.validity_ms.store(config.validity_ms, Ordering::Release);
        self.high_centi.store(centi(config.high_cpu_percent), Ordering::Release);
        self.low_centi.store(centi(config.low_cpu_percent), Ordering::Release);
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    fn validity(&self) -> Duration {
        Duration::from_millis(self.validity_ms.load(Ordering::Acquire))
    }
}

/// Publishes whether the filter should shed auxiliary bookkeeping.
///
/// Cloning is cheap and every clone observes the same samples and
/// settings.
#[derive(Clone)]
pub struct LoadMonitor {
    shared: Arc<LoadShared>,
}

impl LoadMonitor {
    pub fn new(config: &LoadConfig) -> Self {
        Self {
            shared: Arc::new(LoadShared {
                epoch: Instant::now(),
                cpu_centi: AtomicU32::new(0),
                sampled_at_ms: AtomicU64::new(0),
                reducing: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                settings: LoadSettings::new(config),
            }),
        }
    }

    /// Apply new settings. Takes effect from the next sample (watermarks)
    /// or the next query (validity window).
    pub fn reconfigure(&self, config: &LoadConfig) {
        self.shared.settings.store(config);
    }

    /// Publish a CPU sample taken at `at`, applying hysteresis between the
    /// low and high watermarks.
    pub fn record_sample(&self, cpu_percent: f32, at: Instant) {
        let cpu = cpu_percent.clamp(0.0, 100.0);
        let cpu_centi = centi(cpu);
        let shared = &self.shared;
        shared.cpu_centi.store(cpu_centi, Ordering::Release);
        let at_ms = at.saturating_duration_since(shared.epoch).as_millis() as u64;
        shared.sampled_at_ms.store(at_ms + 1, Ordering::Release);

        let was_reducing = shared.reducing.load(Ordering::Acquire);
        let watermark = if was_reducing {
            &shared.settings.low_centi
        } else {
            &shared.settings.high_centi
        };
        let reducing = cpu_centi >= watermark.load(Ordering::Acquire);
        if reducing != was_reducing {
            shared.reducing.store(reducing, Ordering::Release);
            if reducing {
                info!("CPU at {:.0}%, shedding filter bookkeeping", cpu);
            } else {
                info!("CPU back to {:.0}%, full bookkeeping restored", cpu);
            }
        }
    }

    /// Whether to shed bookkeeping right now
    pub fn should_reduce_processing(&self) -> bool {
        self.should_reduce_processing_at(Instant::now())
    }

    /// Same as [`should_reduce_processing`](Self::should_reduce_processing)
    /// using the caller's notion of now. A stale sample never reduces.
    pub fn should_reduce_processing_at(&self, now: Instant) -> bool {
        let shared = &self.shared;
        if !shared.reducing.load(Ordering::Acquire) {
            return false;
        }
        let stamp = shared.sampled_at_ms.load(Ordering::Acquire);
        if stamp == 0 {
            return false;
        }
        let sampled_at = shared.epoch + Duration::from_millis(stamp - 1);
        now.saturating_duration_since(sampled_at) <= shared.settings.validity()
    }

    /// Last sampled CPU usage in percent
    pub fn current_cpu_usage(&self) -> Option<f32> {
        if self.shared.sampled_at_ms.load(Ordering::Acquire) == 0 {
            return None;
        }
        Some(self.shared.cpu_centi.load(Ordering::Acquire) as f32 / 100.0)
    }

    /// Run `sampler` on a background thread every sample interval.
    /// Dropping the returned handle stops the thread.
    pub fn spawn_sampler(&self, mut sampler: impl CpuSampler + 'static) -> io::Result<SamplerHandle> {
        let monitor = self.clone();
        let handle = thread::Builder::new()
            .name("dechatter-load".to_string())
            .spawn(move || {
                while !monitor.shared.stop.load(Ordering::Acquire) {
                    if let Some(cpu) = sampler.sample() {
                        monitor.record_sample(cpu, Instant::now());
                    }
                    thread::park_timeout(monitor.shared.settings.interval());
                }
            })?;
        Ok(SamplerHandle {
            shared: Arc::clone(&self.shared),
            handle: Some(handle),
        })
    }
}

/// Handle to the background load sampler
pub struct SamplerHandle {
    shared: Arc<LoadShared>,
    handle: Option<JoinHandle<()>>,
}

impl SamplerHandle {
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

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
