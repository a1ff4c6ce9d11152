// src/store.rs

//! # Store
//!
//! The handle every operation goes through. It owns the engine, the key lock
//! table and the monitor; the per-type operations live in `crate::types` as
//! further `impl Store` blocks and share the helpers below.
//!
//! Write path: lock the (key, type) stripe, load the incarnation, stage all
//! writes into one [`WriteBatch`], commit once, drop the guard.
//! Read path: take a snapshot, read metadata, walk the element range.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::codec;
use crate::config::Options;
use crate::engine::{Engine, KeyGuard, LockTable, Namespace, ReadView, Snapshot, WriteBatch};
use crate::error::{Error, Result};
use crate::expire::now_ms;
use crate::meta::{self, DataType, Meta, MetaState};
use crate::monitor::Monitor;
use crate::types::string::StringRecord;

pub struct Store {
    engine: Engine,
    locks: LockTable,
    options: Options,
    monitor: Monitor,
}

/// The collection a write lands in, loaded under its stripe lock.
#[derive(Debug)]
pub(crate) struct Incarnation {
    pub(crate) meta: Meta,
    /// A new version was allocated: the key was absent, deleted or expired.
    pub(crate) created: bool,
    /// Deadline of the expired record this incarnation replaces.
    stale_expiry: Option<u64>,
}

/// Whatever one (key, type) pair holds on disk.
#[derive(Debug)]
pub(crate) enum Slot {
    String(StringRecord),
    Collection(Meta),
}

impl Slot {
    pub(crate) fn state(&self, now: u64) -> MetaState {
        match self {
            Slot::String(record) if record.is_expired(now) => MetaState::Expired,
            Slot::String(_) => MetaState::Live,
            Slot::Collection(meta) => meta.state(now),
        }
    }

    pub(crate) fn expires_at(&self) -> Option<u64> {
        match self {
            Slot::String(record) => record.expires_at,
            Slot::Collection(meta) => meta.expires_at,
        }
    }

    pub(crate) fn set_expires_at(&mut self, at: Option<u64>) {
        match self {
            Slot::String(record) => record.expires_at = at,
            Slot::Collection(meta) => meta.expires_at = at,
        }
    }
}

/// Reads the slot of (key, type), tombstones included.
pub(crate) fn read_slot<R: ReadView>(
    view: &R,
    key: &[u8],
    data_type: DataType,
) -> Result<Option<Slot>> {
    if data_type == DataType::String {
        return match view.get(Namespace::Strings, key)? {
            Some(raw) => Ok(Some(Slot::String(StringRecord::decode(&raw)?))),
            None => Ok(None),
        };
    }
    Ok(meta::read_meta(view, key, data_type)?.map(Slot::Collection))
}

/// Type bits of `key` in the key-space index.
pub(crate) fn index_bits<R: ReadView>(view: &R, key: &[u8]) -> Result<u8> {
    Ok(view
        .get(Namespace::KeySpace, key)?
        .and_then(|bits| bits.first().copied())
        .unwrap_or(0))
}

/// Stages the removal of a slot: a tombstone for collections, a plain delete
/// for strings. Either way the index bit and the expiry entry go too.
pub(crate) fn stage_retire(batch: &mut WriteBatch, key: &[u8], slot: &Slot) -> Result<()> {
    match slot {
        Slot::String(record) => {
            batch.delete(Namespace::Strings, key);
            batch.mark_index(key, DataType::String, false, false);
            if let Some(at) = record.expires_at {
                batch.delete(
                    Namespace::Expiry,
                    codec::encode_expiry_key(at, DataType::String.tag(), key),
                );
            }
        }
        Slot::Collection(meta) => {
            meta::bump_version_for_delete(batch, key, meta)?;
        }
    }
    Ok(())
}

/// Stages `slot` back with its current fields.
pub(crate) fn stage_slot(batch: &mut WriteBatch, key: &[u8], slot: &Slot) {
    match slot {
        Slot::String(record) => batch.put(Namespace::Strings, key, record.encode()),
        Slot::Collection(meta) => meta::write_meta(batch, key, meta),
    }
}

/// Maps `NotFound` to `default`; cardinality queries treat an absent key as empty.
pub(crate) fn or_default<T>(result: Result<T>, default: T) -> Result<T> {
    match result {
        Err(Error::NotFound) => Ok(default),
        other => other,
    }
}

impl Store {
    /// Opens (or creates) a store under `path`.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let engine = Engine::open(path, &options)?;
        Ok(Self::with_engine(engine, options))
    }

    /// A store backed by a temporary database, removed on drop.
    pub fn temporary(options: Options) -> Result<Self> {
        let engine = Engine::temporary(&options)?;
        Ok(Self::with_engine(engine, options))
    }

    fn with_engine(engine: Engine, options: Options) -> Self {
        Store {
            engine,
            locks: LockTable::new(options.lock_stripes),
            monitor: Monitor::new(&options),
            options,
        }
    }

    /// Flushes and releases the store.
    pub fn close(self) -> Result<()> {
        self.engine.flush()?;
        info!("store closed");
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.engine.flush()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        self.engine.size_on_disk()
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub(crate) fn snapshot(&self) -> Snapshot<'_> {
        self.engine.snapshot()
    }

    pub(crate) fn commit(&self, batch: WriteBatch) -> Result<()> {
        let staged = batch.len();
        self.engine.commit(batch)?;
        self.monitor.metrics.record_commit(staged);
        Ok(())
    }

    /// Locks (key, type) and loads the incarnation a write goes to,
    /// allocating a new version when there is no live one.
    pub(crate) fn open_for_write(
        &self,
        key: &[u8],
        data_type: DataType,
    ) -> Result<(KeyGuard<'_>, Incarnation)> {
        let guard = self.lock_for_write(key, data_type)?;
        let incarnation = self.incarnation(key, data_type)?;
        Ok((guard, incarnation))
    }

    /// Takes the (key, type) stripe for a write that may create the key.
    pub(crate) fn lock_for_write(&self, key: &[u8], data_type: DataType) -> Result<KeyGuard<'_>> {
        codec::check_key_len(key.len())?;
        if self.options.strict_types {
            self.reclaim_expired_rivals(key, data_type)?;
        }
        Ok(self.locks.lock(key, data_type))
    }

    /// Caller holds the (key, type) stripe.
    pub(crate) fn incarnation(&self, key: &[u8], data_type: DataType) -> Result<Incarnation> {
        match meta::read_meta(&self.engine, key, data_type)? {
            Some(meta) if meta.state(now_ms()) == MetaState::Live => Ok(Incarnation {
                meta,
                created: false,
                stale_expiry: None,
            }),
            stored => Ok(Incarnation {
                meta: Meta::new(data_type, meta::next_version(stored.as_ref())?),
                created: true,
                stale_expiry: stored
                    .as_ref()
                    .filter(|m| !m.is_tombstone())
                    .and_then(|m| m.expires_at),
            }),
        }
    }

    /// Stages the metadata of `incarnation`; a new one also claims its index
    /// bit and drops the expiry entry of the record it replaces.
    pub(crate) fn stage_incarnation(
        &self,
        batch: &mut WriteBatch,
        key: &[u8],
        incarnation: &Incarnation,
    ) {
        let data_type = incarnation.meta.data_type;
        meta::write_meta(batch, key, &incarnation.meta);
        if incarnation.created {
            batch.mark_index(key, data_type, true, self.options.strict_types);
            if let Some(at) = incarnation.stale_expiry {
                batch.delete(Namespace::Expiry, codec::encode_expiry_key(at, data_type.tag(), key));
            }
        }
    }

    /// Locks (key, type) for a write that needs the collection to exist.
    /// `None` when it does not.
    pub(crate) fn open_existing(
        &self,
        key: &[u8],
        data_type: DataType,
    ) -> Result<Option<(KeyGuard<'_>, Meta)>> {
        let guard = self.locks.lock(key, data_type);
        let Some(meta) = meta::read_meta(&self.engine, key, data_type)? else {
            drop(guard);
            self.check_rivals(key, data_type)?;
            return Ok(None);
        };
        match meta.state(now_ms()) {
            MetaState::Live => Ok(Some((guard, meta))),
            MetaState::Expired => {
                self.retire_locked(key, &Slot::Collection(meta));
                Ok(None)
            }
            MetaState::Deleted => {
                drop(guard);
                self.check_rivals(key, data_type)?;
                Ok(None)
            }
        }
    }

    /// Runs `read` against the live collection of (key, type) inside one
    /// snapshot. Absent, deleted and expired collections are `NotFound`;
    /// expired ones are reclaimed after the snapshot is released.
    pub(crate) fn read_collection<T, F>(
        &self,
        key: &[u8],
        data_type: DataType,
        read: F,
    ) -> Result<T>
    where
        F: FnOnce(&Snapshot<'_>, &Meta) -> Result<T>,
    {
        let expired = {
            let snapshot = self.engine.snapshot();
            match meta::read_meta(&snapshot, key, data_type)? {
                Some(meta) => match meta.state(now_ms()) {
                    MetaState::Live => return read(&snapshot, &meta),
                    MetaState::Expired => true,
                    MetaState::Deleted => false,
                },
                None => false,
            }
        };
        if expired {
            self.reclaim_quietly(key, data_type);
        } else {
            self.check_rivals(key, data_type)?;
        }
        Err(Error::NotFound)
    }

    /// With strict types, a miss on a key that holds another live type is a
    /// type mismatch rather than `NotFound`.
    pub(crate) fn check_rivals(&self, key: &[u8], data_type: DataType) -> Result<()> {
        if !self.options.strict_types {
            return Ok(());
        }
        let bits = index_bits(&self.engine, key)? & !data_type.bit();
        let now = now_ms();
        for other in DataType::types_in(bits) {
            if let Some(slot) = read_slot(&self.engine, key, other)? {
                if slot.state(now) == MetaState::Live {
                    return Err(Error::TypeMismatch {
                        expected: data_type,
                        found: other,
                    });
                }
            }
        }
        Ok(())
    }

    /// Clears expired records of other types under `key` so a strict
    /// exclusive index mark does not trip over them.
    fn reclaim_expired_rivals(&self, key: &[u8], data_type: DataType) -> Result<()> {
        let bits = index_bits(&self.engine, key)? & !data_type.bit();
        for other in DataType::types_in(bits) {
            self.reclaim_expired(key, other)?;
        }
        Ok(())
    }

    /// Retires (key, type) if it holds an expired record. Takes the stripe.
    pub(crate) fn reclaim_expired(&self, key: &[u8], data_type: DataType) -> Result<bool> {
        let _guard = self.locks.lock(key, data_type);
        let Some(slot) = read_slot(&self.engine, key, data_type)? else {
            return Ok(false);
        };
        if slot.state(now_ms()) != MetaState::Expired {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        stage_retire(&mut batch, key, &slot)?;
        self.commit(batch)?;
        self.monitor.metrics.record_reclaim(1);
        debug!(key = %String::from_utf8_lossy(key), %data_type, "expired record reclaimed");
        Ok(true)
    }

    pub(crate) fn reclaim_quietly(&self, key: &[u8], data_type: DataType) {
        if let Err(e) = self.reclaim_expired(key, data_type) {
            warn!(
                key = %String::from_utf8_lossy(key),
                %data_type,
                error = %e,
                "lazy reclaim failed"
            );
        }
    }

    /// Retires an expired slot while the caller holds its stripe.
    pub(crate) fn retire_locked(&self, key: &[u8], slot: &Slot) {
        let mut batch = WriteBatch::new();
        let outcome = stage_retire(&mut batch, key, slot).and_then(|()| self.commit(batch));
        match outcome {
            Ok(()) => self.monitor.metrics.record_reclaim(1),
            Err(e) => warn!(key = %String::from_utf8_lossy(key), error = %e, "lazy reclaim failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn make_store() -> Store {
        Store::temporary(Options::default()).expect("failed to open temporary store")
    }

    #[test]
    fn new_key_gets_version_one_and_recreate_bumps() -> Result<()> {
        let store = make_store();
        {
            let (_guard, inc) = store.open_for_write(b"k", DataType::Set)?;
            assert!(inc.created);
            assert_eq!(inc.meta.version, 1);
            let mut batch = WriteBatch::new();
            store.stage_incarnation(&mut batch, b"k", &inc);
            store.commit(batch)?;
        }
        {
            let (_guard, inc) = store.open_for_write(b"k", DataType::Set)?;
            assert!(!inc.created);
            let mut batch = WriteBatch::new();
            meta::bump_version_for_delete(&mut batch, b"k", &inc.meta)?;
            store.commit(batch)?;
        }
        let (_guard, inc) = store.open_for_write(b"k", DataType::Set)?;
        assert!(inc.created);
        assert_eq!(inc.meta.version, 3);
        Ok(())
    }

    #[test]
    fn read_of_missing_collection_is_not_found() {
        let store = make_store();
        let err = store.read_collection(b"nope", DataType::Hash, |_, _| Ok(())).unwrap_err();
        assert!(err.is_not_found());
        assert!(store.open_existing(b"nope", DataType::Hash).unwrap().is_none());
    }

    #[test]
    fn expired_collection_is_reclaimed_on_read() -> Result<()> {
        let store = make_store();
        let mut meta = Meta::new(DataType::Hash, 5);
        meta.expires_at = Some(1);
        let mut batch = WriteBatch::new();
        meta::write_meta(&mut batch, b"h", &meta);
        batch.mark_index(b"h", DataType::Hash, true, false);
        store.commit(batch)?;

        let err = store.read_collection(b"h", DataType::Hash, |_, _| Ok(())).unwrap_err();
        assert!(err.is_not_found());
        let stored = meta::read_meta(store.engine(), b"h", DataType::Hash)?.unwrap();
        assert!(stored.is_tombstone());
        assert_eq!(stored.version, 6);
        assert_eq!(index_bits(store.engine(), b"h")?, 0);
        Ok(())
    }

    #[test]
    fn size_on_disk_reports_flushed_data() -> Result<()> {
        let store = make_store();
        store.hmset(b"h", (0..500).map(|i| (format!("f{i}"), "v".repeat(64))))?;
        store.flush()?;
        assert!(store.size_on_disk()? > 0);
        Ok(())
    }
}
