// src/types/set.rs

//! # Set Type Support
//!
//! Members are element ids in `set.data` with an empty value, giving
//! O(log n) insertion, removal and membership checks.
//!
//! Supported commands:
//! - `SADD` / `SREM`
//! - `SMOVE`
//! - `SPOP`
//! - `SMEMBERS` / `SISMEMBER` / `SCARD`

use rand::seq::SliceRandom;

use crate::codec;
use crate::element::SET_MEMBERS;
use crate::engine::{Namespace, WriteBatch};
use crate::error::Result;
use crate::expire::now_ms;
use crate::meta::{self, DataType, MetaState};
use crate::store::{or_default, Store};
use crate::types::dedupe_ids;

impl Store {
    /// Execute the SADD command:
    /// Add `members` to the set stored at `key`, creating it if needed.
    ///
    /// # Returns
    ///
    /// The number of members that were not already in the set.
    pub fn sadd<I, M>(&self, key: &[u8], members: I) -> Result<u64>
    where
        I: IntoIterator<Item = M>,
        M: AsRef<[u8]>,
    {
        let _op = self.monitor().op("sadd", key);
        let members = dedupe_ids(members)?;
        let (_guard, mut inc) = self.open_for_write(key, DataType::Set)?;
        let mut batch = WriteBatch::new();
        let added = SET_MEMBERS.stage_upserts(
            self.engine(),
            &mut batch,
            key,
            inc.meta.version,
            members.into_iter().map(|m| (m, Vec::<u8>::new())),
            inc.created,
        )?;
        inc.meta.size += added as i64;
        self.stage_incarnation(&mut batch, key, &inc);
        self.commit(batch)?;
        Ok(added)
    }

    /// Execute the SREM command:
    /// Remove `members` from the set stored at `key`.
    ///
    /// # Returns
    ///
    /// The number of members that were present and removed; 0 for a missing key.
    pub fn srem<I, M>(&self, key: &[u8], members: I) -> Result<u64>
    where
        I: IntoIterator<Item = M>,
        M: AsRef<[u8]>,
    {
        let _op = self.monitor().op("srem", key);
        let members = dedupe_ids(members)?;
        let Some((_guard, mut meta)) = self.open_existing(key, DataType::Set)? else {
            return Ok(0);
        };
        let mut batch = WriteBatch::new();
        let removed =
            SET_MEMBERS.stage_deletes(self.engine(), &mut batch, key, meta.version, members)?;
        if removed == 0 {
            return Ok(0);
        }
        meta.size -= removed as i64;
        meta::write_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(removed)
    }

    /// Execute the SMOVE command:
    /// Move `member` from `src` to `dst` in one commit.
    ///
    /// # Returns
    ///
    /// `true` if the member was in `src`. With `src == dst` nothing is written.
    pub fn smove(&self, src: &[u8], dst: &[u8], member: &[u8]) -> Result<bool> {
        let _op = self.monitor().op("smove", src);
        if src == dst {
            return or_default(
                self.read_collection(src, DataType::Set, |snap, meta| {
                    SET_MEMBERS.contains(snap, src, meta.version, member)
                }),
                false,
            );
        }
        codec::check_key_len(dst.len())?;
        if self.options().strict_types {
            // drops expired rivals of dst before both stripes are held
            drop(self.lock_for_write(dst, DataType::Set)?);
        }
        let _pair = self
            .locks()
            .lock_pair((src, DataType::Set), (dst, DataType::Set));

        let mut src_meta = match meta::read_meta(self.engine(), src, DataType::Set)? {
            Some(m) if m.state(now_ms()) == MetaState::Live => m,
            _ => {
                self.check_rivals(src, DataType::Set)?;
                return Ok(false);
            }
        };
        if !SET_MEMBERS.contains(self.engine(), src, src_meta.version, member)? {
            return Ok(false);
        }
        let mut dst_inc = self.incarnation(dst, DataType::Set)?;

        let mut batch = WriteBatch::new();
        batch.delete(
            Namespace::SetData,
            codec::encode_element_key(src, src_meta.version, member),
        );
        src_meta.size -= 1;
        meta::write_meta(&mut batch, src, &src_meta);

        let added = SET_MEMBERS.stage_upserts(
            self.engine(),
            &mut batch,
            dst,
            dst_inc.meta.version,
            [(member, Vec::<u8>::new())],
            dst_inc.created,
        )?;
        dst_inc.meta.size += added as i64;
        self.stage_incarnation(&mut batch, dst, &dst_inc);
        self.commit(batch)?;
        Ok(true)
    }

    /// Execute the SPOP command:
    /// Remove and return up to `count` random members.
    pub fn spop(&self, key: &[u8], count: usize) -> Result<Vec<Vec<u8>>> {
        let _op = self.monitor().op("spop", key);
        if count == 0 {
            return Ok(Vec::new());
        }
        let Some((_guard, mut meta)) = self.open_existing(key, DataType::Set)? else {
            return Ok(Vec::new());
        };
        let members: Vec<Vec<u8>> = {
            let snap = self.snapshot();
            SET_MEMBERS
                .range_scan(&snap, key, meta.version, None, None)
                .map(|e| e.map(|(member, _)| member))
                .collect::<Result<_>>()?
        };
        let picked: Vec<Vec<u8>> = members
            .choose_multiple(&mut rand::thread_rng(), count)
            .cloned()
            .collect();
        if picked.is_empty() {
            return Ok(picked);
        }

        let mut batch = WriteBatch::new();
        for member in &picked {
            batch.delete(
                Namespace::SetData,
                codec::encode_element_key(key, meta.version, member),
            );
        }
        meta.size -= picked.len() as i64;
        meta::write_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(picked)
    }

    /// Execute the SMEMBERS command, members in byte order.
    pub fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let _op = self.monitor().op("smembers", key);
        self.read_collection(key, DataType::Set, |snap, meta| {
            SET_MEMBERS
                .range_scan(snap, key, meta.version, None, None)
                .map(|e| e.map(|(member, _)| member))
                .collect()
        })
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let _op = self.monitor().op("sismember", key);
        let found = self.read_collection(key, DataType::Set, |snap, meta| {
            SET_MEMBERS.contains(snap, key, meta.version, member)
        });
        or_default(found, false)
    }

    pub fn scard(&self, key: &[u8]) -> Result<u64> {
        let _op = self.monitor().op("scard", key);
        or_default(self.read_collection(key, DataType::Set, |_, meta| Ok(meta.len())), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use anyhow::Result;
    use std::collections::BTreeSet;

    fn make_store() -> Store {
        Store::temporary(Options::default()).expect("failed to open temporary store")
    }

    #[test]
    fn test_set_basic() -> Result<()> {
        let store = make_store();
        assert_eq!(store.sadd(b"myset", ["a", "b", "a"])?, 2);
        assert_eq!(store.sadd(b"myset", ["b", "c"])?, 1);
        assert_eq!(store.scard(b"myset")?, 3);
        assert!(store.sismember(b"myset", b"c")?);
        assert!(!store.sismember(b"myset", b"z")?);
        assert_eq!(
            store.smembers(b"myset")?,
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(store.srem(b"myset", ["a", "z"])?, 1);
        assert_eq!(store.srem(b"nope", ["a"])?, 0);
        assert_eq!(store.scard(b"myset")?, 2);
        Ok(())
    }

    #[test]
    fn smove_moves_exactly_once() -> Result<()> {
        let store = make_store();
        store.sadd(b"src", ["m", "n"])?;
        assert!(store.smove(b"src", b"dst", b"m")?);
        assert!(!store.smove(b"src", b"dst", b"m")?);
        assert_eq!(store.smembers(b"src")?, vec![b"n".to_vec()]);
        assert_eq!(store.smembers(b"dst")?, vec![b"m".to_vec()]);
        assert_eq!(store.scard(b"dst")?, 1);
        // same key on both sides reports membership only
        assert!(store.smove(b"src", b"src", b"n")?);
        assert_eq!(store.scard(b"src")?, 1);
        Ok(())
    }

    #[test]
    fn spop_removes_what_it_returns() -> Result<()> {
        let store = make_store();
        let all: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        store.sadd(b"s", &all)?;

        let popped = store.spop(b"s", 5)?;
        assert_eq!(popped.len(), 5);
        assert_eq!(store.scard(b"s")?, 15);
        let left: BTreeSet<Vec<u8>> = store.smembers(b"s")?.into_iter().collect();
        for m in &popped {
            assert!(!left.contains(m));
        }
        // asking for more than present drains the set
        assert_eq!(store.spop(b"s", 100)?.len(), 15);
        assert_eq!(store.scard(b"s")?, 0);
        assert!(store.spop(b"missing", 1)?.is_empty());
        Ok(())
    }
}
