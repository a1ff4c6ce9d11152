// src/types/hash.rs

//! # Hash Type Support
//!
//! One metadata record per hash in `hash.meta`, fields in `hash.data` under
//! `(key, version)`. HMSET and HDEL of any width are one batch and one
//! commit.

use std::collections::BTreeMap;

use crate::element::HASH_FIELDS;
use crate::engine::WriteBatch;
use crate::error::{Error, Result};
use crate::meta::{self, DataType};
use crate::store::{or_default, Store};
use crate::types::{dedupe_ids, dedupe_pairs, FieldValue};

impl Store {
    /// HSET key field value
    ///
    /// # Returns
    ///
    /// * `true` if `field` is new in the hash.
    /// * `false` if an existing value was overwritten.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        let _op = self.monitor().op("hset", key);
        let added = self.hash_upsert(key, dedupe_pairs([(field, value)])?)?;
        Ok(added == 1)
    }

    /// HMSET key field value [field value ...]
    ///
    /// Creates the hash if needed. A field given twice keeps its last value.
    pub fn hmset<I, F, V>(&self, key: &[u8], pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (F, V)>,
        F: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let _op = self.monitor().op("hmset", key);
        self.hash_upsert(key, dedupe_pairs(pairs)?)?;
        Ok(())
    }

    fn hash_upsert(&self, key: &[u8], fields: BTreeMap<Vec<u8>, Vec<u8>>) -> Result<u64> {
        let (_guard, mut inc) = self.open_for_write(key, DataType::Hash)?;
        let mut batch = WriteBatch::new();
        let added = HASH_FIELDS.stage_upserts(
            self.engine(),
            &mut batch,
            key,
            inc.meta.version,
            fields,
            inc.created,
        )?;
        inc.meta.size += added as i64;
        self.stage_incarnation(&mut batch, key, &inc);
        self.commit(batch)?;
        Ok(added)
    }

    /// HGET key field. `NotFound` for a missing key or field.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> Result<Vec<u8>> {
        let _op = self.monitor().op("hget", key);
        self.read_collection(key, DataType::Hash, |snap, meta| {
            HASH_FIELDS
                .get(snap, key, meta.version, field)?
                .map(|v| v.to_vec())
                .ok_or(Error::NotFound)
        })
    }

    /// HMGET key field [field ...]; one slot per requested field, `None` when
    /// absent. A missing key yields all `None`.
    pub fn hmget<I, F>(&self, key: &[u8], fields: I) -> Result<Vec<Option<Vec<u8>>>>
    where
        I: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        let _op = self.monitor().op("hmget", key);
        let fields: Vec<F> = fields.into_iter().collect();
        let found = self.read_collection(key, DataType::Hash, |snap, meta| {
            fields
                .iter()
                .map(|f| {
                    Ok(HASH_FIELDS
                        .get(snap, key, meta.version, f.as_ref())?
                        .map(|v| v.to_vec()))
                })
                .collect::<Result<Vec<_>>>()
        });
        or_default(found, vec![None; fields.len()])
    }

    /// HDEL key field [field ...]; returns the number of fields removed.
    /// The hash stays, possibly empty.
    pub fn hdel<I, F>(&self, key: &[u8], fields: I) -> Result<u64>
    where
        I: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        let _op = self.monitor().op("hdel", key);
        let fields = dedupe_ids(fields)?;
        let Some((_guard, mut meta)) = self.open_existing(key, DataType::Hash)? else {
            return Ok(0);
        };
        let mut batch = WriteBatch::new();
        let removed =
            HASH_FIELDS.stage_deletes(self.engine(), &mut batch, key, meta.version, fields)?;
        if removed == 0 {
            return Ok(0);
        }
        meta.size -= removed as i64;
        meta::write_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(removed)
    }

    /// HGETALL key, in field order.
    pub fn hgetall(&self, key: &[u8]) -> Result<Vec<FieldValue>> {
        let _op = self.monitor().op("hgetall", key);
        self.read_collection(key, DataType::Hash, |snap, meta| {
            HASH_FIELDS
                .range_scan(snap, key, meta.version, None, None)
                .map(|e| {
                    e.map(|(field, value)| FieldValue {
                        field,
                        value: value.to_vec(),
                    })
                })
                .collect()
        })
    }

    /// HKEYS key
    pub fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let _op = self.monitor().op("hkeys", key);
        self.read_collection(key, DataType::Hash, |snap, meta| {
            HASH_FIELDS
                .range_scan(snap, key, meta.version, None, None)
                .map(|e| e.map(|(field, _)| field))
                .collect()
        })
    }

    /// HVALS key
    pub fn hvals(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let _op = self.monitor().op("hvals", key);
        self.read_collection(key, DataType::Hash, |snap, meta| {
            HASH_FIELDS
                .range_scan(snap, key, meta.version, None, None)
                .map(|e| e.map(|(_, value)| value.to_vec()))
                .collect()
        })
    }

    /// HLEN key; 0 for a missing key.
    pub fn hlen(&self, key: &[u8]) -> Result<u64> {
        let _op = self.monitor().op("hlen", key);
        or_default(self.read_collection(key, DataType::Hash, |_, meta| Ok(meta.len())), 0)
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        let _op = self.monitor().op("hexists", key);
        let found = self.read_collection(key, DataType::Hash, |snap, meta| {
            HASH_FIELDS.contains(snap, key, meta.version, field)
        });
        or_default(found, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use anyhow::Result;

    fn make_store() -> Store {
        Store::temporary(Options::default()).expect("failed to open temporary store")
    }

    #[test]
    fn test_hash_basic() -> Result<()> {
        let store = make_store();

        // HSET new field
        assert!(store.hset(b"myhash", b"f1", b"v1")?);
        // HSET overwrite
        assert!(!store.hset(b"myhash", b"f1", b"v1a")?);
        assert_eq!(store.hget(b"myhash", b"f1")?, b"v1a".to_vec());
        // HGET missing field
        assert!(store.hget(b"myhash", b"f2").unwrap_err().is_not_found());

        store.hset(b"myhash", b"f2", b"v2")?;
        assert_eq!(store.hkeys(b"myhash")?, vec![b"f1".to_vec(), b"f2".to_vec()]);
        assert_eq!(store.hvals(b"myhash")?, vec![b"v1a".to_vec(), b"v2".to_vec()]);
        assert_eq!(store.hlen(b"myhash")?, 2);
        assert!(store.hexists(b"myhash", b"f2")?);

        // HDEL existing / missing
        assert_eq!(store.hdel(b"myhash", [&b"f1"[..]])?, 1);
        assert!(store.hget(b"myhash", b"f1").unwrap_err().is_not_found());
        assert_eq!(store.hdel(b"myhash", [&b"no"[..]])?, 0);
        Ok(())
    }

    #[test]
    fn hmset_counts_duplicates_once() -> Result<()> {
        let store = make_store();
        store.hmset(b"h", [("a", "1"), ("b", "2"), ("a", "3")])?;
        assert_eq!(store.hlen(b"h")?, 2);
        assert_eq!(store.hget(b"h", b"a")?, b"3".to_vec());
        // re-adding the same fields leaves the count alone
        store.hmset(b"h", [("a", "x"), ("b", "y")])?;
        assert_eq!(store.hlen(b"h")?, 2);
        assert!(matches!(
            store.hmset(b"h", Vec::<(&str, &str)>::new()),
            Err(Error::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn hmget_keeps_request_order() -> Result<()> {
        let store = make_store();
        store.hmset(b"h", [("a", "1"), ("c", "3")])?;
        let got = store.hmget(b"h", ["c", "b", "a"])?;
        assert_eq!(got, vec![Some(b"3".to_vec()), None, Some(b"1".to_vec())]);
        assert_eq!(store.hmget(b"missing", ["a"])?, vec![None]);
        Ok(())
    }

    #[test]
    fn emptied_hash_is_not_the_same_as_missing() -> Result<()> {
        let store = make_store();
        store.hmset(b"h", [("a", "1")])?;
        assert_eq!(store.hdel(b"h", ["a"])?, 1);
        assert!(store.hgetall(b"h")?.is_empty());
        assert_eq!(store.hlen(b"h")?, 0);
        assert!(store.hgetall(b"never").unwrap_err().is_not_found());
        assert_eq!(store.hlen(b"never")?, 0);
        Ok(())
    }
}
