// src/monitor/mod.rs
//! Operation metrics and slow-operation log.
mod metrics;
mod slowlog;

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant, SystemTime};

pub use metrics::{Metrics, OpStat};
pub use slowlog::SlowLog;

use crate::config::Options;

/// Shared by a `Store` and anything that wants to read its statistics.
#[derive(Clone)]
pub struct Monitor {
    pub slow_log: Arc<SlowLog>,
    pub metrics: Arc<Metrics>,
}

impl Monitor {
    pub fn new(options: &Options) -> Self {
        Monitor {
            slow_log: Arc::new(SlowLog::new(
                options.slowlog_capacity,
                Duration::from_millis(options.slowlog_threshold_ms),
            )),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Starts timing one public operation; recorded when the guard drops.
    pub fn op<'a>(&'a self, name: &'static str, key: &'a [u8]) -> OpTimer<'a> {
        OpTimer {
            monitor: self,
            name,
            key,
            start: Instant::now(),
        }
    }
}

/// Slow log entry
#[derive(Debug, Clone)]
pub struct SlowLogEntry {
    pub id: u64,
    pub timestamp: SystemTime,
    pub duration: Duration,
    pub operation: &'static str,
    pub key: String,
}

pub struct OpTimer<'a> {
    monitor: &'a Monitor,
    name: &'static str,
    key: &'a [u8],
    start: Instant,
}

impl Drop for OpTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        self.monitor.metrics.record_op(self.name, elapsed);
        self.monitor.slow_log.add_entry(self.name, self.key, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_records_on_drop() {
        let options = Options {
            slowlog_threshold_ms: 0,
            ..Options::default()
        };
        let monitor = Monitor::new(&options);
        {
            let _op = monitor.op("hset", b"user:1");
        }
        let stat = monitor.metrics.op_stat("hset").unwrap();
        assert_eq!(stat.calls, 1);
        assert_eq!(monitor.metrics.op_count.load(Ordering::Relaxed), 1);
        // zero threshold logs everything
        let entries = monitor.slow_log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "hset");
        assert_eq!(entries[0].key, "user:1");
    }
}
