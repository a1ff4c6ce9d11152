// src/types/zset.rs

//! # Sorted Set Type Support
//!
//! Two element namespaces per sorted set, written in the same batch:
//! - `zset.data`: member -> score, for point lookups;
//! - `zset.score`: score ‖ member -> empty, ordered by (score, member).
//!
//! Scores are encoded order-preserving, so rank and score-range queries are
//! forward range reads of `zset.score`.

use std::collections::BTreeMap;

use crate::codec;
use crate::element::{ZSET_MEMBERS, ZSET_SCORES};
use crate::engine::{Namespace, WriteBatch};
use crate::error::{Error, Result};
use crate::meta::{self, DataType, Meta};
use crate::store::{or_default, Store};
use crate::types::{dedupe_ids, resolve_range, ScoreMember};

fn stage_member(batch: &mut WriteBatch, key: &[u8], version: u64, member: &[u8], score: f64) {
    batch.put(
        Namespace::ZSetData,
        codec::encode_element_key(key, version, member),
        &codec::encode_score(score)[..],
    );
    batch.put(
        Namespace::ZSetScore,
        codec::encode_element_key(key, version, &codec::encode_score_member(score, member)),
        &[0u8; 0][..],
    );
}

fn stage_member_removal(
    batch: &mut WriteBatch,
    key: &[u8],
    version: u64,
    member: &[u8],
    score: f64,
) {
    batch.delete(Namespace::ZSetData, codec::encode_element_key(key, version, member));
    batch.delete(
        Namespace::ZSetScore,
        codec::encode_element_key(key, version, &codec::encode_score_member(score, member)),
    );
}

fn decode_entry(id: &[u8]) -> Result<ScoreMember> {
    let (score, member) = codec::decode_score_member(id)?;
    Ok(ScoreMember {
        score,
        member: member.to_vec(),
    })
}

impl Store {
    /// ZADD key score member [score member ...]
    ///
    /// Returns the number of new members; existing members get their score
    /// updated. NaN scores are rejected before anything is written.
    pub fn zadd<I, M>(&self, key: &[u8], members: I) -> Result<u64>
    where
        I: IntoIterator<Item = (f64, M)>,
        M: AsRef<[u8]>,
    {
        let _op = self.monitor().op("zadd", key);
        let mut scores: BTreeMap<Vec<u8>, f64> = BTreeMap::new();
        for (score, member) in members {
            if score.is_nan() {
                return Err(Error::InvalidArgument("score is not a number".into()));
            }
            // -0.0 and 0.0 must land on the same index key
            let score = if score == 0.0 { 0.0 } else { score };
            scores.insert(member.as_ref().to_vec(), score);
        }
        if scores.is_empty() {
            return Err(Error::InvalidArgument("at least one element is required".into()));
        }

        let (_guard, mut inc) = self.open_for_write(key, DataType::ZSet)?;
        let version = inc.meta.version;
        let mut batch = WriteBatch::new();
        let mut added = 0u64;
        for (member, score) in &scores {
            let previous = if inc.created {
                None
            } else {
                ZSET_MEMBERS.get(self.engine(), key, version, member)?
            };
            match previous {
                Some(raw) => {
                    let old = codec::decode_score(&raw)?;
                    if old.to_bits() != score.to_bits() {
                        batch.delete(
                            Namespace::ZSetScore,
                            codec::encode_element_key(
                                key,
                                version,
                                &codec::encode_score_member(old, member),
                            ),
                        );
                        stage_member(&mut batch, key, version, member, *score);
                    }
                }
                None => {
                    stage_member(&mut batch, key, version, member, *score);
                    added += 1;
                }
            }
        }
        inc.meta.size += added as i64;
        self.stage_incarnation(&mut batch, key, &inc);
        self.commit(batch)?;
        Ok(added)
    }

    /// ZSCORE key member; `NotFound` for a missing key or member.
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Result<f64> {
        let _op = self.monitor().op("zscore", key);
        self.read_collection(key, DataType::ZSet, |snap, meta| {
            match ZSET_MEMBERS.get(snap, key, meta.version, member)? {
                Some(raw) => codec::decode_score(&raw),
                None => Err(Error::NotFound),
            }
        })
    }

    /// ZCARD key; 0 for a missing key.
    pub fn zcard(&self, key: &[u8]) -> Result<u64> {
        let _op = self.monitor().op("zcard", key);
        or_default(self.read_collection(key, DataType::ZSet, |_, meta| Ok(meta.len())), 0)
    }

    /// ZREM key member [member ...]; returns how many were removed.
    pub fn zrem<I, M>(&self, key: &[u8], members: I) -> Result<u64>
    where
        I: IntoIterator<Item = M>,
        M: AsRef<[u8]>,
    {
        let _op = self.monitor().op("zrem", key);
        let members = dedupe_ids(members)?;
        let Some((_guard, mut meta)) = self.open_existing(key, DataType::ZSet)? else {
            return Ok(0);
        };
        let mut batch = WriteBatch::new();
        let removed = self.stage_zrem(&mut batch, key, &meta, &members)?;
        if removed == 0 {
            return Ok(0);
        }
        meta.size -= removed as i64;
        meta::write_meta(&mut batch, key, &meta);
        self.commit(batch)?;
        Ok(removed)
    }

    fn stage_zrem<'m, I>(
        &self,
        batch: &mut WriteBatch,
        key: &[u8],
        meta: &Meta,
        members: I,
    ) -> Result<u64>
    where
        I: IntoIterator<Item = &'m Vec<u8>>,
    {
        let mut removed = 0;
        for member in members {
            if let Some(raw) = ZSET_MEMBERS.get(self.engine(), key, meta.version, member)? {
                stage_member_removal(batch, key, meta.version, member, codec::decode_score(&raw)?);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// ZRANGE key start stop by rank, lowest score first; ties ordered by member.
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<ScoreMember>> {
        let _op = self.monitor().op("zrange", key);
        self.read_collection(key, DataType::ZSet, |snap, meta| {
            let Some((first, last)) = resolve_range(start, stop, meta.len()) else {
                return Ok(Vec::new());
            };
            ZSET_SCORES
                .range_scan(snap, key, meta.version, None, Some((last + 1) as usize))
                .skip(first as usize)
                .map(|e| e.and_then(|(id, _)| decode_entry(&id)))
                .collect()
        })
    }

    /// ZRANGEBYSCORE key min max, both bounds inclusive.
    pub fn zrange_by_score(&self, key: &[u8], min: f64, max: f64) -> Result<Vec<ScoreMember>> {
        let _op = self.monitor().op("zrangebyscore", key);
        if min.is_nan() || max.is_nan() {
            return Err(Error::InvalidArgument("score is not a number".into()));
        }
        self.read_collection(key, DataType::ZSet, |snap, meta| {
            let mut out = Vec::new();
            if min > max {
                return Ok(out);
            }
            let from = codec::encode_score(min);
            for entry in ZSET_SCORES.range_scan_from(snap, key, meta.version, &from) {
                let (id, _) = entry?;
                let item = decode_entry(&id)?;
                if item.score > max {
                    break;
                }
                out.push(item);
            }
            Ok(out)
        })
    }
}
