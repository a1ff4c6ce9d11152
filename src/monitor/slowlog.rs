// src/monitor/slowlog.rs

use super::*;
use parking_lot::Mutex;

/// Newest-first log of operations slower than a threshold.
pub struct SlowLog {
    logs: Mutex<VecDeque<SlowLogEntry>>,
    next_id: AtomicU64,
    max_entries: usize,
    slow_threshold: Duration,
}

impl SlowLog {
    pub fn new(max_entries: usize, slow_threshold: Duration) -> Self {
        SlowLog {
            logs: Mutex::new(VecDeque::with_capacity(max_entries)),
            next_id: AtomicU64::new(0),
            max_entries,
            slow_threshold,
        }
    }

    pub fn add_entry(&self, operation: &'static str, key: &[u8], duration: Duration) {
        if duration < self.slow_threshold || self.max_entries == 0 {
            return;
        }
        let entry = SlowLogEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp: SystemTime::now(),
            duration,
            operation,
            key: String::from_utf8_lossy(key).into_owned(),
        };
        let mut logs = self.logs.lock();
        if logs.len() >= self.max_entries {
            logs.pop_back();
        }
        logs.push_front(entry);
    }

    pub fn entries(&self) -> Vec<SlowLogEntry> {
        self.logs.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.logs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.logs.lock().clear();
    }

    pub fn get_logs(&self) -> String {
        let logs = self.logs.lock();
        let mut response = String::new();

        for (i, entry) in logs.iter().enumerate() {
            response.push_str(&format!(
                "{}. id: {}, duration: {}us, op: {}, key: {}\n",
                i + 1,
                entry.id,
                entry.duration.as_micros(),
                entry.operation,
                entry.key
            ));
        }

        response
    }
}
