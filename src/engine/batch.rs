// src/engine/batch.rs

//! # Batch mutator
//!
//! A [`WriteBatch`] collects every write of one public operation: metadata,
//! any number of element puts/deletes, expiry-index entries and key-space
//! index marks. [`super::Engine::commit`] applies it as one sled transaction,
//! so an HMSET of a million fields is one commit, not a million.

use sled::IVec;

use super::Namespace;
use crate::meta::DataType;

/// Pending change of one type bit in the key-space index.
#[derive(Debug, Clone)]
pub(crate) struct IndexMark {
    pub(crate) key: Vec<u8>,
    pub(crate) data_type: DataType,
    pub(crate) live: bool,
    /// Abort the commit if another type is live under the same key.
    pub(crate) exclusive: bool,
}

/// Writes staged for one atomic commit.
#[derive(Debug)]
pub struct WriteBatch {
    writes: Vec<sled::Batch>,
    touched: u16,
    marks: Vec<IndexMark>,
    staged: usize,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch {
            writes: vec![sled::Batch::default(); Namespace::ALL.len()],
            touched: 0,
            marks: Vec::new(),
            staged: 0,
        }
    }

    /// Stages `key -> value` in `ns`. A later write to the same key in the
    /// same batch wins.
    pub fn put<K, V>(&mut self, ns: Namespace, key: K, value: V)
    where
        K: Into<IVec>,
        V: Into<IVec>,
    {
        debug_assert!(ns != Namespace::KeySpace, "index entries go through mark_index");
        self.slot(ns).insert(key, value);
    }

    pub fn delete<K: Into<IVec>>(&mut self, ns: Namespace, key: K) {
        debug_assert!(ns != Namespace::KeySpace, "index entries go through mark_index");
        self.slot(ns).remove(key);
    }

    /// Sets (`live`) or clears the bit of `data_type` in the index entry of
    /// `key`. The entry disappears once no bit is left.
    pub fn mark_index(&mut self, key: &[u8], data_type: DataType, live: bool, exclusive: bool) {
        self.marks.push(IndexMark {
            key: key.to_vec(),
            data_type,
            live,
            exclusive,
        });
        self.staged += 1;
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged == 0
    }

    fn slot(&mut self, ns: Namespace) -> &mut sled::Batch {
        self.touched |= 1 << ns.index();
        self.staged += 1;
        &mut self.writes[ns.index()]
    }

    pub(crate) fn touched(&self) -> impl Iterator<Item = (Namespace, &sled::Batch)> + '_ {
        Namespace::ALL
            .iter()
            .copied()
            .filter(|ns| self.touched & (1 << ns.index()) != 0)
            .map(|ns| (ns, &self.writes[ns.index()]))
    }

    pub(crate) fn marks(&self) -> &[IndexMark] {
        &self.marks
    }
}
