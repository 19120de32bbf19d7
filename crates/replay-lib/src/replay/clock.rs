//! Scaled replay clock
//!
//! Maps trace time onto wall time: an event recorded at `t` plays at
//! `origin + (t - trace_t0) / speed_factor`. Deadlines are absolute instants
//! on the monotonic clock, so scheduling error never accumulates across
//! events the way chained relative sleeps would. Scaled time is used only
//! for scheduling; it is never written back into any timestamp.

use std::time::Duration;

use tokio::time::Instant;

pub struct ReplayClock {
    origin: Instant,
    trace_t0: i64,
    speed_factor: f64,
}

impl ReplayClock {
    /// Start the clock now; `trace_t0` plays immediately.
    pub fn new(trace_t0: i64, speed_factor: f64) -> ReplayClock {
        ReplayClock {
            origin: Instant::now(),
            trace_t0,
            speed_factor,
        }
    }

    /// Wall-clock offset from the origin at which `trace_ts` is due.
    pub fn offset_for(&self, trace_ts: i64) -> Duration {
        let elapsed_trace_secs = (trace_ts - self.trace_t0).max(0) as f64;
        Duration::from_secs_f64(elapsed_trace_secs / self.speed_factor)
    }

    /// Absolute deadline for `trace_ts`.
    pub fn deadline_for(&self, trace_ts: i64) -> Instant {
        self.origin + self.offset_for(trace_ts)
    }
}
