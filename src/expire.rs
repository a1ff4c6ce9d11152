// src/expire.rs

//! Clock and background reclamation of expired keys.
//!
//! Expired records are already invisible to every read; the sweeper only
//! frees their index entries so `scan` and `exists` stop tripping over them.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::store::Store;

/// Current UNIX time in milliseconds. A clock set before 1970 reads as 0.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Background sweeper task: every `every`, retires up to the configured
/// batch of expired records. Runs until the task is aborted.
pub async fn run_sweeper(store: Arc<Store>, every: Duration) {
    let mut iv = interval(every);
    iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let batch = store.options().sweep_batch;
    loop {
        iv.tick().await;
        let worker = store.clone();
        match tokio::task::spawn_blocking(move || worker.sweep_expired(batch)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => debug!(retired = n, "expiry sweep"),
            Ok(Err(e)) => warn!(error = %e, "expiry sweep failed"),
            Err(e) => warn!(error = %e, "expiry sweep task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;

    #[test]
    fn clock_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }

    #[tokio::test]
    async fn sweeper_retires_expired_keys() -> anyhow::Result<()> {
        let store = Arc::new(Store::temporary(Options::default())?);
        store.sadd(b"s", [b"a".as_slice()])?;
        store.pexpire_at(b"s", now_ms() + 20)?;

        let handle = tokio::spawn(run_sweeper(store.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert!(!store.exists(b"s")?);
        let (keys, _) = store.scan("0", "*", 100)?;
        assert!(keys.is_empty());
        Ok(())
    }
}
