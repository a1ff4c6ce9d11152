// src/types/list.rs

//! # List Type Support
//!
//! Elements are indexed by a `u64` sequence number stored big-endian, so
//! element order is index order. The metadata record keeps the next free
//! slot at each end (`left`, `right`); items live strictly between them,
//! which makes push and pop at either end O(1) and LRANGE a single bounded
//! range read.
//!
//! Supported commands:
//! - `LPUSH` / `RPUSH`
//! - `LPOP` / `RPOP`
//! - `LRANGE` / `LINDEX` / `LLEN`

use crate::codec;
use crate::element::LIST_ITEMS;
use crate::engine::{Namespace, WriteBatch};
use crate::error::{Error, Result};
use crate::meta::{self, DataType};
use crate::store::{or_default, Store};
use crate::types::resolve_range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Head,
    Tail,
}

impl Store {
    /// LPUSH key value [value ...]; each value is prepended in turn, so the
    /// last one given ends up first. Returns the new length.
    pub fn lpush<I, V>(&self, key: &[u8], values: I) -> Result<u64>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        let _op = self.monitor().op("lpush", key);
        self.push(key, values, End::Head)
    }

    /// RPUSH key value [value ...]. Returns the new length.
    pub fn rpush<I, V>(&self, key: &[u8], values: I) -> Result<u64>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        let _op = self.monitor().op("rpush", key);
        self.push(key, values, End::Tail)
    }

    fn push<I, V>(&self, key: &[u8], values: I, end: End) -> Result<u64>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        let values: Vec<V> = values.into_iter().collect();
        if values.is_empty() {
            return Err(Error::InvalidArgument("at least one element is required".into()));
        }
        let (_guard, mut inc) = self.open_for_write(key, DataType::List)?;
        let mut batch = WriteBatch::new();
        let exhausted = || Error::InvalidArgument("list index space exhausted".into());
        for value in &values {
            let index = match end {
                End::Head => {
                    let slot = inc.meta.left;
                    inc.meta.left = slot.checked_sub(1).ok_or_else(exhausted)?;
                    slot
                }
                End::Tail => {
                    let slot = inc.meta.right;
                    inc.meta.right = slot.checked_add(1).ok_or_else(exhausted)?;
                    slot
                }
            };
            batch.put(
                Namespace::ListData,
                codec::encode_element_key(key, inc.meta.version, &codec::encode_list_index(index)),
                value.as_ref(),
            );
        }
        inc.meta.size += values.len() as i64;
        self.stage_incarnation(&mut batch, key, &inc);
        self.commit(batch)?;
        Ok(inc.meta.len())
    }

    /// LPOP key; `None` when the list is missing or empty.
    pub fn lpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let _op = self.monitor().op("lpop", key);
        self.pop(key, End::Head)
    }

    /// RPOP key; `None` when the list is missing or empty.
    pub fn rpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let _op = self.monitor().op("rpop", key);
        self.pop(key, End::Tail)
    }

    fn pop(&self, key: &[u8], end: End) -> Result<Option<Vec<u8>>> {
        let Some((_guard, mut meta)) = self.open_existing(key, DataType::List)? else {
            return Ok(None);
        };
        if meta.is_empty() {
            return Ok(None);
        }
        let index = match end {
            End::Head => meta.left + 1,
            End::Tail => meta.right - 1,
        };
        let id = codec::encode_list_index(index);
        let value = LIST_ITEMS
            .get(self.engine(), key, meta.version, &id)?
            .ok_or_else(|| Error::MalformedMeta(format!("list item {index} missing")))?;

        let mut batch = WriteBatch::new();
        batch.delete(Namespace::ListData, codec::encode_element_key(key, meta.version, &id));
        match end {
            End::Head => meta.left = index,
            End::Tail => meta.right = index,
        }
        meta.size -= 1;
        meta::write_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(Some(value.to_vec()))
    }

    /// LRANGE key start stop, inclusive; negative offsets count from the tail.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let _op = self.monitor().op("lrange", key);
        self.read_collection(key, DataType::List, |snap, meta| {
            let Some((first, last)) = resolve_range(start, stop, meta.len()) else {
                return Ok(Vec::new());
            };
            // resume right after the slot preceding `first`
            let after = codec::encode_list_index(meta.left + first);
            let take = (last - first + 1) as usize;
            LIST_ITEMS
                .range_scan(snap, key, meta.version, Some(&after[..]), Some(take))
                .map(|e| e.map(|(_, value)| value.to_vec()))
                .collect()
        })
    }

    /// LINDEX key index; `NotFound` when out of range.
    pub fn lindex(&self, key: &[u8], index: i64) -> Result<Vec<u8>> {
        let _op = self.monitor().op("lindex", key);
        self.read_collection(key, DataType::List, |snap, meta| {
            let len = meta.len() as i64;
            let offset = if index < 0 { index + len } else { index };
            if offset < 0 || offset >= len {
                return Err(Error::NotFound);
            }
            let id = codec::encode_list_index(meta.left + 1 + offset as u64);
            LIST_ITEMS
                .get(snap, key, meta.version, &id)?
                .map(|v| v.to_vec())
                .ok_or(Error::NotFound)
        })
    }

    /// LLEN key; 0 for a missing key.
    pub fn llen(&self, key: &[u8]) -> Result<u64> {
        let _op = self.monitor().op("llen", key);
        or_default(self.read_collection(key, DataType::List, |_, meta| Ok(meta.len())), 0)
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

    fn strings(items: Vec<Vec<u8>>) -> Vec<String> {
        items.into_iter().map(|v| String::from_utf8(v).unwrap()).collect()
    }

    #[test]
    fn test_list_push_pop() -> Result<()> {
        let store = make_store();
        // RPUSH a b c, LPUSH x y  →  y x a b c
        assert_eq!(store.rpush(b"l", ["a", "b", "c"])?, 3);
        assert_eq!(store.lpush(b"l", ["x", "y"])?, 5);
        assert_eq!(strings(store.lrange(b"l", 0, -1)?), vec!["y", "x", "a", "b", "c"]);

        assert_eq!(store.lpop(b"l")?, Some(b"y".to_vec()));
        assert_eq!(store.rpop(b"l")?, Some(b"c".to_vec()));
        assert_eq!(store.llen(b"l")?, 3);
        assert_eq!(strings(store.lrange(b"l", 0, -1)?), vec!["x", "a", "b"]);
        Ok(())
    }

    #[test]
    fn test_lrange_offsets() -> Result<()> {
        let store = make_store();
        store.rpush(b"l", ["0", "1", "2", "3", "4"])?;
        assert_eq!(strings(store.lrange(b"l", 1, 2)?), vec!["1", "2"]);
        assert_eq!(strings(store.lrange(b"l", -2, -1)?), vec!["3", "4"]);
        assert_eq!(strings(store.lrange(b"l", 3, 100)?), vec!["3", "4"]);
        assert!(store.lrange(b"l", 4, 1)?.is_empty());
        assert_eq!(store.lindex(b"l", -1)?, b"4".to_vec());
        assert!(store.lindex(b"l", 5).unwrap_err().is_not_found());
        assert!(store.lrange(b"missing", 0, -1).unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn popping_everything_leaves_an_empty_list() -> Result<()> {
        let store = make_store();
        store.lpush(b"l", ["only"])?;
        assert_eq!(store.rpop(b"l")?, Some(b"only".to_vec()));
        assert_eq!(store.lpop(b"l")?, None);
        assert!(store.lrange(b"l", 0, -1)?.is_empty());
        // and it can grow again from either side
        store.lpush(b"l", ["a"])?;
        store.rpush(b"l", ["b"])?;
        assert_eq!(strings(store.lrange(b"l", 0, -1)?), vec!["a", "b"]);
        Ok(())
    }
}
