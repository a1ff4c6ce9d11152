// src/element.rs

//! # Element store
//!
//! Elements of one collection incarnation live under the prefix
//! `(user key, version)` of their namespace. Writes are staged into a
//! [`WriteBatch`]; reads walk a [`Snapshot`] range that never leaves the
//! prefix, so older versions of the same key stay invisible.

use std::ops::Bound;

use sled::IVec;

use crate::codec;
use crate::engine::{Namespace, RangeIter, ReadView, Snapshot, WriteBatch};
use crate::error::Result;

/// Hash fields: field -> value.
pub const HASH_FIELDS: ElementStore = ElementStore::new(Namespace::HashData);
/// Set members: member -> empty.
pub const SET_MEMBERS: ElementStore = ElementStore::new(Namespace::SetData);
/// List items: sequence index (u64 BE) -> value.
pub const LIST_ITEMS: ElementStore = ElementStore::new(Namespace::ListData);
/// Sorted-set members: member -> score.
pub const ZSET_MEMBERS: ElementStore = ElementStore::new(Namespace::ZSetData);
/// Sorted-set order: score ‖ member -> empty.
pub const ZSET_SCORES: ElementStore = ElementStore::new(Namespace::ZSetScore);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementStore {
    ns: Namespace,
}

impl ElementStore {
    pub const fn new(ns: Namespace) -> Self {
        ElementStore { ns }
    }

    pub fn get<R: ReadView>(
        &self,
        view: &R,
        key: &[u8],
        version: u64,
        id: &[u8],
    ) -> Result<Option<IVec>> {
        view.get(self.ns, &codec::encode_element_key(key, version, id))
    }

    pub fn contains<R: ReadView>(
        &self,
        view: &R,
        key: &[u8],
        version: u64,
        id: &[u8],
    ) -> Result<bool> {
        view.contains(self.ns, &codec::encode_element_key(key, version, id))
    }

    /// Stages one put per element and returns how many ids did not exist yet.
    ///
    /// Ids must be distinct. With `known_empty` (a collection created in this
    /// same batch) no existence lookups are made.
    pub fn stage_upserts<R, I, K, V>(
        &self,
        view: &R,
        batch: &mut WriteBatch,
        key: &[u8],
        version: u64,
        elements: I,
        known_empty: bool,
    ) -> Result<u64>
    where
        R: ReadView,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: Into<IVec>,
    {
        let mut inserted = 0;
        for (id, value) in elements {
            let encoded = codec::encode_element_key(key, version, id.as_ref());
            if known_empty || !view.contains(self.ns, &encoded)? {
                inserted += 1;
            }
            batch.put(self.ns, encoded, value);
        }
        Ok(inserted)
    }

    /// Stages deletes for the ids that exist and returns their count.
    /// Ids must be distinct.
    pub fn stage_deletes<R, I, K>(
        &self,
        view: &R,
        batch: &mut WriteBatch,
        key: &[u8],
        version: u64,
        ids: I,
    ) -> Result<u64>
    where
        R: ReadView,
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let mut removed = 0;
        for id in ids {
            let encoded = codec::encode_element_key(key, version, id.as_ref());
            if view.contains(self.ns, &encoded)? {
                batch.delete(self.ns, encoded);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Lazily walks the elements of `(key, version)` in id order, strictly
    /// after `after` when resuming, yielding at most `limit` of them.
    pub fn range_scan<'s>(
        &self,
        snapshot: &'s Snapshot<'_>,
        key: &[u8],
        version: u64,
        after: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Elements<'s> {
        let prefix = codec::element_prefix(key, version);
        let resume = after.map(|id| codec::encode_element_key(key, version, id));
        Elements {
            inner: snapshot.prefix_range(self.ns, &prefix, resume.as_deref()),
            prefix_len: prefix.len(),
            remaining: limit.unwrap_or(usize::MAX),
        }
    }

    /// Walks `(key, version)` from element id `from`, inclusive.
    pub fn range_scan_from<'s>(
        &self,
        snapshot: &'s Snapshot<'_>,
        key: &[u8],
        version: u64,
        from: &[u8],
    ) -> Elements<'s> {
        let prefix = codec::element_prefix(key, version);
        let lower = Bound::Included(codec::encode_element_key(key, version, from));
        let upper = codec::prefix_successor(&prefix).map_or(Bound::Unbounded, Bound::Excluded);
        Elements {
            inner: snapshot.range(self.ns, lower, upper),
            prefix_len: prefix.len(),
            remaining: usize::MAX,
        }
    }
}

/// `(element id, value)` pairs of one incarnation; see [`ElementStore::range_scan`].
pub struct Elements<'s> {
    inner: RangeIter<'s>,
    prefix_len: usize,
    remaining: usize,
}

impl Iterator for Elements<'_> {
    type Item = Result<(Vec<u8>, IVec)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let entry = self.inner.next()?;
        self.remaining -= 1;
        Some(entry.map(|(k, v)| (k[self.prefix_len..].to_vec(), v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::engine::Engine;
    use anyhow::Result;

    fn ids(elements: Elements<'_>) -> Result<Vec<Vec<u8>>> {
        Ok(elements.map(|e| e.map(|(id, _)| id)).collect::<crate::Result<_>>()?)
    }

    #[test]
    fn upserts_count_only_new_ids() -> Result<()> {
        let engine = Engine::temporary(&Options::default())?;
        let mut batch = WriteBatch::new();
        let pairs = [("a", "1"), ("b", "2")];
        let n = HASH_FIELDS.stage_upserts(&engine, &mut batch, b"h", 1, pairs, true)?;
        assert_eq!(n, 2);
        engine.commit(batch)?;

        let mut batch = WriteBatch::new();
        let pairs = [("b", "3"), ("c", "4")];
        let n = HASH_FIELDS.stage_upserts(&engine, &mut batch, b"h", 1, pairs, false)?;
        assert_eq!(n, 1);
        engine.commit(batch)?;
        assert_eq!(HASH_FIELDS.get(&engine, b"h", 1, b"b")?.as_deref(), Some(&b"3"[..]));
        Ok(())
    }

    #[test]
    fn deletes_skip_missing_ids() -> Result<()> {
        let engine = Engine::temporary(&Options::default())?;
        let mut batch = WriteBatch::new();
        SET_MEMBERS.stage_upserts(&engine, &mut batch, b"s", 1, [("x", ""), ("y", "")], true)?;
        engine.commit(batch)?;

        let mut batch = WriteBatch::new();
        let n = SET_MEMBERS.stage_deletes(&engine, &mut batch, b"s", 1, ["x", "nope"])?;
        assert_eq!(n, 1);
        assert_eq!(batch.len(), 1);
        engine.commit(batch)?;
        assert!(!SET_MEMBERS.contains(&engine, b"s", 1, b"x")?);
        assert!(SET_MEMBERS.contains(&engine, b"s", 1, b"y")?);
        Ok(())
    }

    #[test]
    fn range_scan_is_bounded_by_version_and_resumable() -> Result<()> {
        let engine = Engine::temporary(&Options::default())?;
        let mut batch = WriteBatch::new();
        SET_MEMBERS.stage_upserts(&engine, &mut batch, b"s", 1, [("old", "")], true)?;
        let members = [("a", ""), ("b", ""), ("c", "")];
        SET_MEMBERS.stage_upserts(&engine, &mut batch, b"s", 2, members, true)?;
        SET_MEMBERS.stage_upserts(&engine, &mut batch, b"s2", 2, [("other", "")], true)?;
        engine.commit(batch)?;

        let snap = engine.snapshot();
        assert_eq!(
            ids(SET_MEMBERS.range_scan(&snap, b"s", 2, None, None))?,
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(
            ids(SET_MEMBERS.range_scan(&snap, b"s", 2, None, Some(2)))?,
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        assert_eq!(
            ids(SET_MEMBERS.range_scan(&snap, b"s", 2, Some(&b"b"[..]), None))?,
            vec![b"c".to_vec()]
        );
        assert_eq!(ids(SET_MEMBERS.range_scan(&snap, b"s", 1, None, None))?, vec![b"old".to_vec()]);
        assert!(ids(SET_MEMBERS.range_scan(&snap, b"s", 3, None, None))?.is_empty());
        Ok(())
    }
}
