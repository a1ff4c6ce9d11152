// src/codec.rs

//! # Key codec
//!
//! Byte layouts for everything the layer writes into sled. All encoders are
//! pure and size their output buffer exactly before writing into it.
//!
//! Element keys:
//!
//! ```text
//! [key_len: u32 BE][user key][version: u64 BE][element id]
//! ```
//!
//! Fixing `(user key, version)` fixes a prefix, so one collection incarnation
//! is a single contiguous range of its element namespace. The version is
//! big-endian so numeric order equals byte order.

use crate::error::{Error, Result};

const LEN_WIDTH: usize = 4;

/// Longest user key the `u32` length prefix can describe.
pub const MAX_KEY_LEN: usize = u32::MAX as usize;

/// Rejects keys whose length does not fit the element-key prefix. Every
/// write that can create a key runs this first; reads go through the meta
/// record, which such a key never has.
pub fn check_key_len(len: usize) -> Result<()> {
    if len > MAX_KEY_LEN {
        return Err(Error::InvalidArgument(format!(
            "key of {len} bytes exceeds the {MAX_KEY_LEN} byte limit"
        )));
    }
    Ok(())
}
const VERSION_WIDTH: usize = 8;

/// Meta keys are the user key itself, which keeps meta and index scans in
/// user-key order.
#[inline]
pub fn encode_meta_key(user_key: &[u8]) -> Vec<u8> {
    user_key.to_vec()
}

/// Encodes `(user_key, version, element_id)` into one element key.
/// `user_key` is at most [`MAX_KEY_LEN`] bytes.
#[inline]
pub fn encode_element_key(user_key: &[u8], version: u64, element_id: &[u8]) -> Vec<u8> {
    debug_assert!(user_key.len() <= MAX_KEY_LEN);
    let mut out = Vec::with_capacity(LEN_WIDTH + user_key.len() + VERSION_WIDTH + element_id.len());
    out.extend_from_slice(&(user_key.len() as u32).to_be_bytes());
    out.extend_from_slice(user_key);
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(element_id);
    out
}

/// Prefix shared by every element of one collection incarnation.
#[inline]
pub fn element_prefix(user_key: &[u8], version: u64) -> Vec<u8> {
    encode_element_key(user_key, version, &[])
}

/// A decoded element key borrowing from the encoded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementKey<'a> {
    pub user_key: &'a [u8],
    pub version: u64,
    pub element_id: &'a [u8],
}

/// Inverse of [`encode_element_key`].
pub fn decode_element_key(encoded: &[u8]) -> Result<ElementKey<'_>> {
    if encoded.len() < LEN_WIDTH {
        return Err(Error::MalformedKey(format!(
            "element key too short for length prefix: {} bytes",
            encoded.len()
        )));
    }
    let key_len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
    let version_at = LEN_WIDTH + key_len;
    if encoded.len() < version_at + VERSION_WIDTH {
        return Err(Error::MalformedKey(format!(
            "element key of {} bytes cannot hold a {}-byte user key and version",
            encoded.len(),
            key_len
        )));
    }
    let version = read_u64(&encoded[version_at..version_at + VERSION_WIDTH]);
    Ok(ElementKey {
        user_key: &encoded[LEN_WIDTH..version_at],
        version,
        element_id: &encoded[version_at + VERSION_WIDTH..],
    })
}

/// Smallest byte string greater than every string starting with `prefix`,
/// or `None` when no such bound exists (prefix is all `0xff`).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last != u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// List sequence indices are stored big-endian so iteration order is index order.
#[inline]
pub fn encode_list_index(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

pub fn decode_list_index(bytes: &[u8]) -> Result<u64> {
    if bytes.len() != 8 {
        return Err(Error::MalformedKey(format!(
            "list index must be 8 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(read_u64(bytes))
}

/// Order-preserving transform of an `f64` into 8 bytes: byte order of the
/// output equals numeric order of the input (NaN excluded by callers).
#[inline]
pub fn encode_score(score: f64) -> [u8; 8] {
    let bits = score.to_bits();
    let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
    ordered.to_be_bytes()
}

pub fn decode_score(bytes: &[u8]) -> Result<f64> {
    if bytes.len() < 8 {
        return Err(Error::MalformedKey(format!(
            "score needs 8 bytes, got {}",
            bytes.len()
        )));
    }
    let ordered = read_u64(&bytes[..8]);
    let bits = if ordered >> 63 == 1 { ordered ^ (1 << 63) } else { !ordered };
    Ok(f64::from_bits(bits))
}

/// Element id of the sorted-set score index: `[score][member]`.
pub fn encode_score_member(score: f64, member: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + member.len());
    out.extend_from_slice(&encode_score(score));
    out.extend_from_slice(member);
    out
}

pub fn decode_score_member(element_id: &[u8]) -> Result<(f64, &[u8])> {
    let score = decode_score(element_id)?;
    Ok((score, &element_id[8..]))
}

/// Expiry index key: `[expires_at ms: u64 BE][type tag][user key]`, ordered by
/// deadline so a sweep is one forward range read up to "now".
pub fn encode_expiry_key(expires_at: u64, type_tag: u8, user_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 1 + user_key.len());
    out.extend_from_slice(&expires_at.to_be_bytes());
    out.push(type_tag);
    out.extend_from_slice(user_key);
    out
}

pub fn decode_expiry_key(encoded: &[u8]) -> Result<(u64, u8, &[u8])> {
    if encoded.len() < 9 {
        return Err(Error::MalformedKey(format!(
            "expiry key too short: {} bytes",
            encoded.len()
        )));
    }
    Ok((read_u64(&encoded[..8]), encoded[8], &encoded[9..]))
}

#[inline]
pub(crate) fn read_u64(bytes: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(b)
}
