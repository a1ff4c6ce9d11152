// src/engine/mod.rs

//! # Engine adapter
//!
//! Thin layer over `sled` that the rest of the crate talks to:
//! - one `sled::Tree` per [`Namespace`], so metadata lookups never walk over
//!   element bytes;
//! - point reads and ordered range reads;
//! - [`Engine::commit`], the only way anything is written;
//! - [`Snapshot`], a point-in-time read view.
//!
//! sled has no read snapshots, so the adapter keeps a commit gate: a commit
//! holds it exclusively for the length of its transaction, a snapshot holds
//! it shared. A reader holding a snapshot sees every batch fully or not at
//! all.

pub mod batch;
pub mod kv;
pub mod lock;

pub use batch::WriteBatch;
pub use kv::ReadView;
pub use lock::{KeyGuard, LockTable, MultiGuard, PairGuard};

use std::marker::PhantomData;
use std::ops::Bound;
use std::path::Path;

use parking_lot::{RwLock, RwLockReadGuard};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, Transactional,
};
use sled::{Db, IVec, Tree};
use tracing::{debug, info};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::meta::DataType;

/// Independently ordered key spaces, one sled tree each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    KeySpace,
    Strings,
    HashMeta,
    HashData,
    SetMeta,
    SetData,
    ListMeta,
    ListData,
    ZSetMeta,
    ZSetData,
    ZSetScore,
    Expiry,
}

impl Namespace {
    pub const ALL: [Namespace; 12] = [
        Namespace::KeySpace,
        Namespace::Strings,
        Namespace::HashMeta,
        Namespace::HashData,
        Namespace::SetMeta,
        Namespace::SetData,
        Namespace::ListMeta,
        Namespace::ListData,
        Namespace::ZSetMeta,
        Namespace::ZSetData,
        Namespace::ZSetScore,
        Namespace::Expiry,
    ];

    pub fn tree_name(self) -> &'static str {
        match self {
            Namespace::KeySpace => "keyspace",
            Namespace::Strings => "strings",
            Namespace::HashMeta => "hash.meta",
            Namespace::HashData => "hash.data",
            Namespace::SetMeta => "set.meta",
            Namespace::SetData => "set.data",
            Namespace::ListMeta => "list.meta",
            Namespace::ListData => "list.data",
            Namespace::ZSetMeta => "zset.meta",
            Namespace::ZSetData => "zset.data",
            Namespace::ZSetScore => "zset.score",
            Namespace::Expiry => "expiry",
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Handle over one opened sled database and its namespaces.
pub struct Engine {
    db: Db,
    trees: Vec<Tree>,
    gate: RwLock<()>,
}

impl Engine {
    /// Opens (or creates) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, options: &Options) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let config = Self::base_config(options).path(path);
        let engine = Self::from_config(config)?;
        info!(path = %path.display(), "engine opened");
        Ok(engine)
    }

    /// Opens a database that is removed when dropped. Used by tests and benches.
    pub fn temporary(options: &Options) -> Result<Self> {
        Self::from_config(Self::base_config(options).temporary(true))
    }

    fn base_config(options: &Options) -> sled::Config {
        sled::Config::new()
            .cache_capacity(options.cache_capacity_bytes)
            .flush_every_ms(options.flush_every_ms)
    }

    fn from_config(config: sled::Config) -> Result<Self> {
        let db = config.open()?;
        let trees = Namespace::ALL
            .iter()
            .map(|ns| db.open_tree(ns.tree_name()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Engine {
            db,
            trees,
            gate: RwLock::new(()),
        })
    }

    #[inline]
    pub fn tree(&self, ns: Namespace) -> &Tree {
        &self.trees[ns.index()]
    }

    /// Takes a point-in-time read view.
    ///
    /// The gate is store-wide, not per key: while any snapshot is alive every
    /// commit waits, including commits to unrelated keys, so a long scan (an
    /// HGETALL of a huge hash) stalls all writers until it is dropped. Do not
    /// commit while holding a snapshot on the same thread.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            engine: self,
            _gate: self.gate.read(),
        }
    }

    /// Applies every staged write of `batch` atomically, across namespaces.
    ///
    /// Key-space index marks are resolved inside the transaction, so two
    /// types of one key updating the index concurrently never lose a bit.
    pub fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let staged = batch.len();
        let _gate = self.gate.write();
        let trees: &[Tree] = &self.trees;
        let outcome = trees.transaction(|views| -> ConflictableTransactionResult<(), Error> {
            for (ns, writes) in batch.touched() {
                views[ns.index()].apply_batch(writes)?;
            }
            let index = &views[Namespace::KeySpace.index()];
            for mark in batch.marks() {
                let current = index
                    .get(mark.key.as_slice())?
                    .and_then(|bits| bits.first().copied())
                    .unwrap_or(0);
                let bit = mark.data_type.bit();
                let next = if mark.live {
                    if mark.exclusive {
                        if let Some(found) = DataType::types_in(current & !bit).next() {
                            return Err(ConflictableTransactionError::Abort(Error::TypeMismatch {
                                expected: mark.data_type,
                                found,
                            }));
                        }
                    }
                    current | bit
                } else {
                    current & !bit
                };
                if next == current {
                    continue;
                }
                if next == 0 {
                    index.remove(mark.key.as_slice())?;
                } else {
                    index.insert(mark.key.as_slice(), &[next][..])?;
                }
            }
            Ok(())
        });
        match outcome {
            Ok(()) => {
                debug!(staged, "batch committed");
                Ok(())
            }
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(Error::Engine(err)),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self.db.size_on_disk()?)
    }
}

impl ReadView for Engine {
    fn get(&self, ns: Namespace, key: &[u8]) -> Result<Option<IVec>> {
        Ok(self.tree(ns).get(key)?)
    }
}

/// Shared read view; see [`Engine::snapshot`].
pub struct Snapshot<'a> {
    engine: &'a Engine,
    _gate: RwLockReadGuard<'a, ()>,
}

impl<'a> Snapshot<'a> {
    /// Forward iterator over `ns` between two bounds.
    pub fn range(
        &self,
        ns: Namespace,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
    ) -> RangeIter<'_> {
        RangeIter {
            inner: self.engine.tree(ns).range::<Vec<u8>, _>((lower, upper)),
            _snapshot: PhantomData,
        }
    }

    /// Iterates every key starting with `prefix`, resuming strictly after
    /// `after` when given.
    pub fn prefix_range(
        &self,
        ns: Namespace,
        prefix: &[u8],
        after: Option<&[u8]>,
    ) -> RangeIter<'_> {
        let lower = match after {
            Some(resume) if resume >= prefix => Bound::Excluded(resume.to_vec()),
            _ => Bound::Included(prefix.to_vec()),
        };
        let upper = match crate::codec::prefix_successor(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        self.range(ns, lower, upper)
    }
}

impl ReadView for Snapshot<'_> {
    fn get(&self, ns: Namespace, key: &[u8]) -> Result<Option<IVec>> {
        self.engine.get(ns, key)
    }
}

/// Ordered entries read under a [`Snapshot`].
pub struct RangeIter<'s> {
    inner: sled::Iter,
    _snapshot: PhantomData<&'s ()>,
}

impl Iterator for RangeIter<'_> {
    type Item = Result<(IVec, IVec)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| entry.map_err(Error::from))
    }
}
