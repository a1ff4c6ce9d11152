// src/monitor/metrics.rs

use super::*;

/// Calls and cumulative latency of one operation name.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpStat {
    pub calls: u64,
    pub total_micros: u64,
}

#[derive(Default)]
pub struct Metrics {
    pub op_count: AtomicU64,
    pub commit_count: AtomicU64,
    /// Individual writes (puts, deletes, index marks) over all commits
    pub staged_writes: AtomicU64,
    /// Expired records retired, lazily or by the sweeper
    pub reclaimed: AtomicU64,
    pub op_stats: DashMap<&'static str, OpStat>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub fn record_op(&self, name: &'static str, elapsed: Duration) {
        self.op_count.fetch_add(1, Ordering::Relaxed);
        let micros = elapsed.as_micros() as u64;
        self.op_stats
            .entry(name)
            .and_modify(|s| {
                s.calls += 1;
                s.total_micros += micros;
            })
            .or_insert(OpStat { calls: 1, total_micros: micros });
    }

    pub fn record_commit(&self, staged: usize) {
        self.commit_count.fetch_add(1, Ordering::Relaxed);
        self.staged_writes.fetch_add(staged as u64, Ordering::Relaxed);
    }

    pub fn record_reclaim(&self, count: u64) {
        self.reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn op_stat(&self, name: &str) -> Option<OpStat> {
        self.op_stats.get(name).map(|s| *s)
    }

    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP crab_strata_op_count Total operations processed\n");
        output.push_str("# TYPE crab_strata_op_count counter\n");
        output.push_str(&format!(
            "crab_strata_op_count {}\n",
            self.op_count.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP crab_strata_commit_count Batches committed\n");
        output.push_str("# TYPE crab_strata_commit_count counter\n");
        output.push_str(&format!(
            "crab_strata_commit_count {}\n",
            self.commit_count.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP crab_strata_staged_writes Writes applied through batches\n");
        output.push_str("# TYPE crab_strata_staged_writes counter\n");
        output.push_str(&format!(
            "crab_strata_staged_writes {}\n",
            self.staged_writes.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP crab_strata_reclaimed Expired records retired\n");
        output.push_str("# TYPE crab_strata_reclaimed counter\n");
        output.push_str(&format!(
            "crab_strata_reclaimed {}\n",
            self.reclaimed.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP crab_strata_op_calls Calls per operation\n");
        output.push_str("# TYPE crab_strata_op_calls counter\n");
        let mut stats: Vec<(&'static str, OpStat)> =
            self.op_stats.iter().map(|e| (*e.key(), *e.value())).collect();
        stats.sort_by_key(|(name, _)| *name);
        for (name, stat) in &stats {
            output.push_str(&format!(
                "crab_strata_op_calls{{op=\"{}\"}} {}\n",
                name, stat.calls
            ));
        }
        for (name, stat) in &stats {
            output.push_str(&format!(
                "crab_strata_op_micros_total{{op=\"{}\"}} {}\n",
                name, stat.total_micros
            ));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_output_lists_operations() {
        let metrics = Metrics::new();
        metrics.record_op("sadd", Duration::from_micros(5));
        metrics.record_op("sadd", Duration::from_micros(7));
        metrics.record_op("hget", Duration::from_micros(1));
        metrics.record_commit(3);

        assert_eq!(metrics.op_stat("sadd"), Some(OpStat { calls: 2, total_micros: 12 }));
        let text = metrics.to_prometheus();
        assert!(text.contains("crab_strata_op_count 3\n"));
        assert!(text.contains("crab_strata_commit_count 1\n"));
        assert!(text.contains("crab_strata_staged_writes 3\n"));
        assert!(text.contains("crab_strata_op_calls{op=\"sadd\"} 2\n"));
    }
}
