//! Timing and load infrastructure for the event path

mod clock;
mod load;

pub use clock::{ClockTicker, CoarseClock, ManualClock, SystemClock, TimestampSource};
pub use load::{parse_proc_stat, CpuSampler, CpuTimes, LoadMonitor, ProcStatSampler, SamplerHandle};
