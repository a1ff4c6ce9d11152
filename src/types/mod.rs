// src/types/mod.rs

//! Per-type operations, each an `impl Store` block over the shared write and
//! read paths of [`crate::store`].

pub mod hash;
pub mod list;
pub mod set;
pub mod string;
pub mod zset;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

/// One hash entry as returned by HGETALL / HSCAN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub field: Vec<u8>,
    pub value: Vec<u8>,
}

/// One sorted-set entry as returned by ZRANGE.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMember {
    pub score: f64,
    pub member: Vec<u8>,
}

/// Collapses repeated ids, keeping the last value given for each.
pub(crate) fn dedupe_pairs<I, K, V>(pairs: I) -> Result<BTreeMap<Vec<u8>, Vec<u8>>>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let map: BTreeMap<Vec<u8>, Vec<u8>> = pairs
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_vec(), v.as_ref().to_vec()))
        .collect();
    if map.is_empty() {
        return Err(Error::InvalidArgument("at least one element is required".into()));
    }
    Ok(map)
}

pub(crate) fn dedupe_ids<I, K>(ids: I) -> Result<BTreeSet<Vec<u8>>>
where
    I: IntoIterator<Item = K>,
    K: AsRef<[u8]>,
{
    let set: BTreeSet<Vec<u8>> = ids.into_iter().map(|id| id.as_ref().to_vec()).collect();
    if set.is_empty() {
        return Err(Error::InvalidArgument("at least one element is required".into()));
    }
    Ok(set)
}

/// Resolves Redis-style inclusive `start..=stop` (negatives count from the
/// end) against `len`. `None` when the range selects nothing.
pub(crate) fn resolve_range(start: i64, stop: i64, len: u64) -> Option<(u64, u64)> {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as u64, stop as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_value_wins_on_duplicate_ids() {
        let map = dedupe_pairs([("f", "1"), ("g", "2"), ("f", "3")]).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&b"f".to_vec()], b"3".to_vec());
        assert!(dedupe_ids(Vec::<&[u8]>::new()).is_err());
    }

    #[test]
    fn range_follows_redis_index_rules() {
        assert_eq!(resolve_range(0, -1, 5), Some((0, 4)));
        assert_eq!(resolve_range(-2, -1, 5), Some((3, 4)));
        assert_eq!(resolve_range(1, 100, 5), Some((1, 4)));
        assert_eq!(resolve_range(-100, 1, 5), Some((0, 1)));
        assert_eq!(resolve_range(3, 1, 5), None);
        assert_eq!(resolve_range(5, 10, 5), None);
        assert_eq!(resolve_range(0, -1, 0), None);
        assert_eq!(resolve_range(0, -6, 5), None);
    }
}
