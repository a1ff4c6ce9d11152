// tests/integration_persistence.rs

//! Reopening a store: versions, counts, deadlines and the key-space index
//! all come back from disk.

use std::time::Duration;

use anyhow::Result;
use tempfile::tempdir;

use crab_strata::{config, DataType, Options, Store, Ttl};

#[test]
fn data_survives_close_and_reopen() -> Result<()> {
    let tmp = tempdir()?;
    let path = tmp.path().join("db");

    {
        let store = Store::open(&path, Options::default())?;
        store.set(b"greeting", b"hello")?;
        store.hmset(b"h", [("a", "1"), ("b", "2")])?;
        store.rpush(b"l", ["x", "y"])?;
        store.zadd(b"z", [(2.0, "two"), (1.0, "one")])?;
        // old incarnation of "s" must stay invisible after the restart
        store.sadd(b"s", ["old"])?;
        store.del(["s"])?;
        store.sadd(b"s", ["new"])?;
        store.expire(b"h", Duration::from_secs(3600))?;
        store.close()?;
    }

    let store = Store::open(&path, Options::default())?;
    assert_eq!(store.get(b"greeting")?, b"hello".to_vec());
    assert_eq!(store.hlen(b"h")?, 2);
    assert_eq!(store.hget(b"h", b"b")?, b"2".to_vec());
    assert_eq!(store.lrange(b"l", 0, -1)?, vec![b"x".to_vec(), b"y".to_vec()]);
    assert_eq!(store.zrange(b"z", 0, 0)?[0].member, b"one".to_vec());
    assert_eq!(store.smembers(b"s")?, vec![b"new".to_vec()]);
    assert!(matches!(store.ttl(b"h")?, Ttl::Remaining(_)));
    assert_eq!(store.ttl(b"greeting")?, Ttl::Persistent);

    let mut keys = store.keys("*")?;
    keys.sort();
    assert_eq!(
        keys,
        vec![b"greeting".to_vec(), b"h".to_vec(), b"l".to_vec(), b"s".to_vec(), b"z".to_vec()]
    );
    assert_eq!(store.types(b"l")?, vec![DataType::List]);
    Ok(())
}

#[test]
fn versions_keep_increasing_across_restarts() -> Result<()> {
    let tmp = tempdir()?;
    let path = tmp.path().join("db");

    for round in 0..3 {
        let store = Store::open(&path, Options::default())?;
        // each round sees only its own field
        store.del(["h"])?;
        let field = format!("f{round}");
        store.hset(b"h", field.as_bytes(), b"v")?;
        assert_eq!(store.hkeys(b"h")?, vec![field.into_bytes()]);
        store.close()?;
    }
    Ok(())
}

#[test]
fn options_file_drives_the_store() -> Result<()> {
    let tmp = tempdir()?;
    let cfg_path = tmp.path().join("strata.json");
    std::fs::write(&cfg_path, r#"{ "strict_types": true, "lock_stripes": 8 }"#)?;

    let options = config::load(&cfg_path)?;
    assert!(options.strict_types);
    assert_eq!(options.lock_stripes, 8);
    // unspecified fields fall back to their defaults
    assert_eq!(options.scan_count, Options::default().scan_count);

    let store = Store::open(tmp.path().join("db"), options)?;
    store.set(b"k", b"v")?;
    assert!(store.hset(b"k", b"f", b"v").is_err());
    Ok(())
}
