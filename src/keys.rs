// src/keys.rs

//! Operations on whole keys, across every type a key holds: DEL, EXISTS,
//! TYPE, the TTL family and the expiry sweep.
//!
//! A key may hold several types at once, so these commit once per affected
//! type and report per type.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::time::Duration;

use tracing::debug;

use crate::codec;
use crate::engine::{Namespace, WriteBatch};
use crate::error::{Error, Result};
use crate::expire::now_ms;
use crate::meta::{DataType, MetaState};
use crate::store::{index_bits, read_slot, stage_retire, stage_slot, Store};

/// Result of [`Store::del`].
#[derive(Debug, Default)]
pub struct DelOutcome {
    /// Distinct keys that held at least one live value.
    pub removed: u64,
    /// Per type: keys removed, or the error that type's commit failed with.
    pub statuses: BTreeMap<DataType, Result<u64>>,
}

impl DelOutcome {
    pub fn is_ok(&self) -> bool {
        self.statuses.values().all(|s| s.is_ok())
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// No live value under the key.
    Missing,
    /// Live, without a deadline.
    Persistent,
    Remaining(Duration),
}

impl Store {
    /// DEL key [key ...]
    ///
    /// Each type is one commit covering every key that holds it, so a failure
    /// of one type leaves the others deleted.
    pub fn del<I, K>(&self, keys: I) -> Result<DelOutcome>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let keys: BTreeSet<Vec<u8>> = keys.into_iter().map(|k| k.as_ref().to_vec()).collect();
        let _op = self.monitor().op("del", keys.first().map_or(&[][..], |k| k.as_slice()));

        let mut by_type: BTreeMap<DataType, Vec<&[u8]>> = BTreeMap::new();
        for key in &keys {
            for ty in DataType::types_in(index_bits(self.engine(), key)?) {
                by_type.entry(ty).or_default().push(key.as_slice());
            }
        }

        let mut outcome = DelOutcome::default();
        let mut removed_keys: BTreeSet<&[u8]> = BTreeSet::new();
        for (ty, candidates) in by_type {
            match self.del_type(ty, &candidates) {
                Ok(removed) => {
                    outcome.statuses.insert(ty, Ok(removed.len() as u64));
                    removed_keys.extend(removed);
                }
                Err(e) => {
                    outcome.statuses.insert(ty, Err(e));
                }
            }
        }
        outcome.removed = removed_keys.len() as u64;
        Ok(outcome)
    }

    fn del_type<'k>(&self, data_type: DataType, keys: &[&'k [u8]]) -> Result<Vec<&'k [u8]>> {
        let _guard = self.locks().lock_many(keys.iter().map(|k| (*k, data_type)));
        let now = now_ms();
        let mut batch = WriteBatch::new();
        let mut removed = Vec::new();
        let mut expired = 0;
        for &key in keys {
            let Some(slot) = read_slot(self.engine(), key, data_type)? else {
                continue;
            };
            match slot.state(now) {
                MetaState::Live => removed.push(key),
                MetaState::Expired => expired += 1,
                MetaState::Deleted => continue,
            }
            stage_retire(&mut batch, key, &slot)?;
        }
        self.commit(batch)?;
        self.monitor().metrics.record_reclaim(expired);
        Ok(removed)
    }

    /// EXISTS key: whether any type holds a live value under `key`.
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        let _op = self.monitor().op("exists", key);
        Ok(!self.live_types(key)?.is_empty())
    }

    /// TYPE key, generalized: every type live under `key`, in tag order.
    pub fn types(&self, key: &[u8]) -> Result<Vec<DataType>> {
        let _op = self.monitor().op("type", key);
        self.live_types(key)
    }

    fn live_types(&self, key: &[u8]) -> Result<Vec<DataType>> {
        let snapshot = self.snapshot();
        let now = now_ms();
        let mut live = Vec::new();
        for ty in DataType::types_in(index_bits(&snapshot, key)?) {
            if let Some(slot) = read_slot(&snapshot, key, ty)? {
                if slot.state(now) == MetaState::Live {
                    live.push(ty);
                }
            }
        }
        Ok(live)
    }

    /// EXPIRE key ttl. Returns `false` when nothing live is under `key`.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> Result<bool> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let at = now_ms().saturating_add(millis);
        self.pexpire_at(key, at)
    }

    /// PEXPIREAT key unix-ms. A deadline already passed deletes the key.
    pub fn pexpire_at(&self, key: &[u8], at_ms: u64) -> Result<bool> {
        let _op = self.monitor().op("pexpireat", key);
        if at_ms == 0 {
            return Err(Error::InvalidArgument("deadline must be after the epoch".into()));
        }
        self.update_deadline(key, Some(at_ms))
    }

    /// PERSIST key. Returns `true` when some type had a deadline to drop.
    pub fn persist(&self, key: &[u8]) -> Result<bool> {
        let _op = self.monitor().op("persist", key);
        self.update_deadline(key, None)
    }

    /// Sets or clears the deadline of every live type under `key`, one
    /// commit per type.
    fn update_deadline(&self, key: &[u8], at: Option<u64>) -> Result<bool> {
        let mut touched = false;
        for ty in DataType::types_in(index_bits(self.engine(), key)?) {
            let _guard = self.locks().lock(key, ty);
            let now = now_ms();
            let Some(mut slot) = read_slot(self.engine(), key, ty)? else {
                continue;
            };
            let mut batch = WriteBatch::new();
            match slot.state(now) {
                MetaState::Deleted => continue,
                MetaState::Expired => {
                    stage_retire(&mut batch, key, &slot)?;
                    self.commit(batch)?;
                    self.monitor().metrics.record_reclaim(1);
                    continue;
                }
                MetaState::Live => {}
            }
            let previous = slot.expires_at();
            match at {
                Some(at) if at <= now => {
                    stage_retire(&mut batch, key, &slot)?;
                    touched = true;
                }
                Some(at) => {
                    if let Some(old) = previous {
                        batch.delete(
                            Namespace::Expiry,
                            codec::encode_expiry_key(old, ty.tag(), key),
                        );
                    }
                    batch.put(
                        Namespace::Expiry,
                        codec::encode_expiry_key(at, ty.tag(), key),
                        &[0u8; 0][..],
                    );
                    slot.set_expires_at(Some(at));
                    stage_slot(&mut batch, key, &slot);
                    touched = true;
                }
                None => {
                    let Some(old) = previous else {
                        continue;
                    };
                    batch.delete(Namespace::Expiry, codec::encode_expiry_key(old, ty.tag(), key));
                    slot.set_expires_at(None);
                    stage_slot(&mut batch, key, &slot);
                    touched = true;
                }
            }
            self.commit(batch)?;
        }
        Ok(touched)
    }

    /// TTL key. With several live types the earliest deadline wins; the key
    /// is persistent only when none of them has one.
    pub fn ttl(&self, key: &[u8]) -> Result<Ttl> {
        let _op = self.monitor().op("ttl", key);
        let snapshot = self.snapshot();
        let now = now_ms();
        let mut any_live = false;
        let mut earliest: Option<u64> = None;
        for ty in DataType::types_in(index_bits(&snapshot, key)?) {
            let Some(slot) = read_slot(&snapshot, key, ty)? else {
                continue;
            };
            if slot.state(now) != MetaState::Live {
                continue;
            }
            any_live = true;
            if let Some(at) = slot.expires_at() {
                earliest = Some(earliest.map_or(at, |e| e.min(at)));
            }
        }
        Ok(match (any_live, earliest) {
            (false, _) => Ttl::Missing,
            (true, None) => Ttl::Persistent,
            (true, Some(at)) => Ttl::Remaining(Duration::from_millis(at.saturating_sub(now))),
        })
    }

    /// Retires up to `limit` records whose deadline has passed, oldest
    /// deadline first. Returns how many were retired.
    pub fn sweep_expired(&self, limit: usize) -> Result<usize> {
        let now = now_ms();
        let due: Vec<(u64, u8, Vec<u8>)> = {
            let snapshot = self.snapshot();
            let upper = match now.checked_add(1) {
                Some(end) => Bound::Excluded(end.to_be_bytes().to_vec()),
                None => Bound::Unbounded,
            };
            let mut due = Vec::new();
            for entry in snapshot.range(Namespace::Expiry, Bound::Unbounded, upper).take(limit) {
                let (raw, _) = entry?;
                let (at, tag, key) = codec::decode_expiry_key(&raw)?;
                due.push((at, tag, key.to_vec()));
            }
            due
        };

        let mut retired = 0;
        for (at, tag, key) in due {
            let data_type = DataType::from_tag(tag)
                .ok_or_else(|| Error::MalformedKey(format!("expiry entry with type tag {tag}")))?;
            if self.sweep_one(at, data_type, &key)? {
                retired += 1;
            }
        }
        if retired > 0 {
            debug!(retired, "expired records swept");
        }
        Ok(retired)
    }

    fn sweep_one(&self, at: u64, data_type: DataType, key: &[u8]) -> Result<bool> {
        let _guard = self.locks().lock(key, data_type);
        let mut batch = WriteBatch::new();
        let retired = match read_slot(self.engine(), key, data_type)? {
            Some(slot) if slot.expires_at() == Some(at) => {
                if slot.state(now_ms()) != MetaState::Expired {
                    return Ok(false);
                }
                stage_retire(&mut batch, key, &slot)?;
                true
            }
            // entry outlived its record
            _ => {
                batch.delete(Namespace::Expiry, codec::encode_expiry_key(at, data_type.tag(), key));
                false
            }
        };
        self.commit(batch)?;
        if retired {
            self.monitor().metrics.record_reclaim(1);
        }
        Ok(retired)
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
    fn del_reports_each_type_it_touched() -> Result<()> {
        let store = make_store();
        store.set(b"k", b"v")?;
        store.sadd(b"k", ["m"])?;
        store.hset(b"h", b"f", b"v")?;

        let outcome = store.del(["k", "h", "missing"])?;
        assert!(outcome.is_ok());
        assert_eq!(outcome.removed, 2);
        assert_eq!(outcome.statuses.len(), 3);
        assert!(matches!(outcome.statuses[&DataType::Set], Ok(1)));
        assert!(matches!(outcome.statuses[&DataType::Hash], Ok(1)));

        assert!(!store.exists(b"k")?);
        assert!(store.smembers(b"k").unwrap_err().is_not_found());
        assert!(store.get(b"k").unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn types_lists_every_live_type() -> Result<()> {
        let store = make_store();
        store.rpush(b"k", ["a"])?;
        store.zadd(b"k", [(1.0, "a")])?;
        assert_eq!(store.types(b"k")?, vec![DataType::List, DataType::ZSet]);
        assert!(store.types(b"nope")?.is_empty());
        Ok(())
    }

    #[test]
    fn ttl_lifecycle() -> Result<()> {
        let store = make_store();
        assert_eq!(store.ttl(b"s")?, Ttl::Missing);
        store.sadd(b"s", ["a"])?;
        assert_eq!(store.ttl(b"s")?, Ttl::Persistent);

        assert!(store.expire(b"s", Duration::from_secs(100))?);
        match store.ttl(b"s")? {
            Ttl::Remaining(left) => {
                assert!(left <= Duration::from_secs(100) && left > Duration::from_secs(90))
            }
            other => panic!("expected a deadline, got {other:?}"),
        }
        assert!(store.persist(b"s")?);
        assert!(!store.persist(b"s")?);
        assert_eq!(store.ttl(b"s")?, Ttl::Persistent);
        assert!(!store.expire(b"missing", Duration::from_secs(1))?);
        Ok(())
    }

    #[test]
    fn huge_ttl_saturates_instead_of_wrapping() -> Result<()> {
        let store = make_store();
        store.set(b"k", b"v")?;
        store.sadd(b"s", ["a"])?;
        // millisecond counts past u64::MAX must not wrap to a short deadline
        assert!(store.expire(b"k", Duration::from_secs(18_446_744_073_709_552))?);
        assert!(store.expire(b"s", Duration::MAX)?);
        for key in [&b"k"[..], &b"s"[..]] {
            match store.ttl(key)? {
                Ttl::Remaining(left) => assert!(left > Duration::from_secs(365 * 24 * 3600)),
                other => panic!("expected a deadline, got {other:?}"),
            }
        }
        assert_eq!(store.get(b"k")?, b"v".to_vec());
        assert_eq!(store.sweep_expired(100)?, 0);
        Ok(())
    }

    #[test]
    fn past_deadline_deletes_immediately() -> Result<()> {
        let store = make_store();
        store.hset(b"h", b"f", b"v")?;
        assert!(store.pexpire_at(b"h", 1)?);
        assert!(store.hgetall(b"h").unwrap_err().is_not_found());
        assert!(!store.exists(b"h")?);
        Ok(())
    }

    #[test]
    fn expired_values_vanish_and_are_swept() -> Result<()> {
        let store = make_store();
        store.set(b"str", b"v")?;
        store.sadd(b"set", ["a"])?;
        let soon = now_ms() + 30;
        store.pexpire_at(b"str", soon)?;
        store.pexpire_at(b"set", soon)?;
        std::thread::sleep(Duration::from_millis(60));

        assert!(store.get(b"str").unwrap_err().is_not_found());
        assert_eq!(store.ttl(b"set")?, Ttl::Missing);
        // the read above already reclaimed the string; the set is left
        assert_eq!(store.sweep_expired(100)?, 1);
        assert_eq!(store.sweep_expired(100)?, 0);
        assert!(store.keys("*")?.is_empty());

        // recreating after expiry starts from a clean incarnation
        assert_eq!(store.sadd(b"set", ["b"])?, 1);
        assert_eq!(store.smembers(b"set")?, vec![b"b".to_vec()]);
        Ok(())
    }
}
