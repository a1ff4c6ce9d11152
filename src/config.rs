// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::info;

/// Tunables of one opened store, read from a JSON file.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Options {
    /// sled page cache size in bytes
    pub cache_capacity_bytes: u64,
    /// Background flush period of sled; `None` flushes only on demand.
    pub flush_every_ms: Option<u64>,
    /// Number of stripes in the key lock table
    pub lock_stripes: usize,
    /// One live type per key; writes of another type fail with WRONGTYPE.
    pub strict_types: bool,
    /// Default COUNT of SCAN / HSCAN / SSCAN
    pub scan_count: usize,
    /// Period of the expiry sweeper (seconds)
    pub sweep_interval_secs: u64,
    /// Expired records retired per sweeper pass
    pub sweep_batch: usize,
    pub slowlog_threshold_ms: u64,
    pub slowlog_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            cache_capacity_bytes: 256 * 1024 * 1024,
            flush_every_ms: Some(500),
            lock_stripes: 1024,
            strict_types: false,
            scan_count: 10,
            sweep_interval_secs: 1,
            sweep_batch: 1000,
            slowlog_threshold_ms: 10,
            slowlog_capacity: 128,
        }
    }
}

/// Reads options from `path`; a missing file is created with the defaults.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Options> {
    let path_ref = path.as_ref();

    if !path_ref.exists() {
        let default_cfg = Options::default();
        let default_json = serde_json::to_string_pretty(&default_cfg)?;
        fs::write(path_ref, default_json)
            .with_context(|| format!("Failed to write default config {:?}", path_ref))?;
        info!(path = ?path_ref, "default config created");
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path_ref)
        .with_context(|| format!("Failed to read config file {:?}", path_ref))?;
    let cfg: Options = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse {:?}", path_ref))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_created_with_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("strata.json");
        let cfg = load(&path)?;
        assert_eq!(cfg, Options::default());
        assert!(path.exists());
        // second load parses what the first one wrote
        assert_eq!(load(&path)?, cfg);
        Ok(())
    }

    #[test]
    fn partial_file_falls_back_to_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("strata.json");
        fs::write(&path, r#"{ "strict_types": true, "lock_stripes": 8 }"#)?;
        let cfg = load(&path)?;
        assert!(cfg.strict_types);
        assert_eq!(cfg.lock_stripes, 8);
        assert_eq!(cfg.scan_count, Options::default().scan_count);
        Ok(())
    }

    #[test]
    fn garbage_is_reported() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("strata.json");
        fs::write(&path, "not json")?;
        assert!(load(&path).is_err());
        Ok(())
    }
}
