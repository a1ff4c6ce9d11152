// src/meta.rs

//! # Metadata store
//!
//! One compact record per (collection key, type), kept in the type's meta
//! namespace apart from the element bytes:
//!
//! ```text
//! [type: u8][flags: u8][version: u64 BE][size: i64 BE][expires_at ms: u64 BE, 0 = none]
//! lists only: [left: u64 BE][right: u64 BE]
//! ```
//!
//! Deleting a collection rewrites this record with a higher version and a
//! tombstone flag. Element records of older versions stay on disk until sled
//! garbage-collects them; no read path ever reaches them again.

use std::fmt;

use crate::codec::{self, read_u64};
use crate::engine::{Namespace, ReadView, WriteBatch};
use crate::error::{Error, Result};

/// Value types a user key can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    String,
    Hash,
    Set,
    List,
    ZSet,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::String,
        DataType::Hash,
        DataType::Set,
        DataType::List,
        DataType::ZSet,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        DataType::ALL.get(tag as usize).copied()
    }

    /// Bit of this type in a key-space index entry.
    pub fn bit(self) -> u8 {
        1 << self.tag()
    }

    /// Types whose bit is set in `bits`, in tag order.
    pub fn types_in(bits: u8) -> impl Iterator<Item = DataType> {
        DataType::ALL.into_iter().filter(move |ty| bits & ty.bit() != 0)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Hash => "hash",
            DataType::Set => "set",
            DataType::List => "list",
            DataType::ZSet => "zset",
        }
    }

    /// Namespace holding this type's metadata (the values themselves for strings).
    pub fn meta_namespace(self) -> Namespace {
        match self {
            DataType::String => Namespace::Strings,
            DataType::Hash => Namespace::HashMeta,
            DataType::Set => Namespace::SetMeta,
            DataType::List => Namespace::ListMeta,
            DataType::ZSet => Namespace::ZSetMeta,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitset stored alongside every metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetaFlags(u8);

impl MetaFlags {
    /// The collection was logically deleted.
    pub const TOMBSTONE: MetaFlags = MetaFlags(0b0000_0001);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        MetaFlags(bits)
    }

    pub fn contains(self, other: MetaFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: MetaFlags) {
        self.0 |= other.0;
    }
}

/// First free slot on each side of a new list; elements live strictly
/// between `left` and `right`.
pub const LIST_INITIAL_LEFT: u64 = u64::MAX / 2;

const BASE_LEN: usize = 1 + 1 + 8 + 8 + 8;
const LIST_LEN: usize = BASE_LEN + 16;

#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    pub data_type: DataType,
    pub flags: MetaFlags,
    pub version: u64,
    /// Live element count at `version`.
    pub size: i64,
    /// Absolute deadline in unix milliseconds.
    pub expires_at: Option<u64>,
    /// List only: next free index at the head.
    pub left: u64,
    /// List only: next free index at the tail.
    pub right: u64,
}

/// How a stored record looks to an operation running at time `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaState {
    Live,
    Expired,
    Deleted,
}

impl Meta {
    /// Fresh, empty incarnation.
    pub fn new(data_type: DataType, version: u64) -> Self {
        Meta {
            data_type,
            flags: MetaFlags::default(),
            version,
            size: 0,
            expires_at: None,
            left: LIST_INITIAL_LEFT,
            right: LIST_INITIAL_LEFT + 1,
        }
    }

    pub fn len(&self) -> u64 {
        self.size.max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.size <= 0
    }

    pub fn is_tombstone(&self) -> bool {
        self.flags.contains(MetaFlags::TOMBSTONE)
    }

    pub fn state(&self, now_ms: u64) -> MetaState {
        if self.is_tombstone() {
            MetaState::Deleted
        } else if self.expires_at.is_some_and(|at| at <= now_ms) {
            MetaState::Expired
        } else {
            MetaState::Live
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let list = self.data_type == DataType::List;
        let mut out = Vec::with_capacity(if list { LIST_LEN } else { BASE_LEN });
        out.push(self.data_type.tag());
        out.push(self.flags.bits());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.size.to_be_bytes());
        out.extend_from_slice(&self.expires_at.unwrap_or(0).to_be_bytes());
        if list {
            out.extend_from_slice(&self.left.to_be_bytes());
            out.extend_from_slice(&self.right.to_be_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BASE_LEN {
            return Err(Error::MalformedMeta(format!(
                "record of {} bytes, need at least {}",
                bytes.len(),
                BASE_LEN
            )));
        }
        let data_type = DataType::from_tag(bytes[0])
            .ok_or_else(|| Error::MalformedMeta(format!("unknown type tag {}", bytes[0])))?;
        let expires_at = match read_u64(&bytes[18..26]) {
            0 => None,
            at => Some(at),
        };
        let mut meta = Meta {
            data_type,
            flags: MetaFlags::from_bits(bytes[1]),
            version: read_u64(&bytes[2..10]),
            size: read_u64(&bytes[10..18]) as i64,
            expires_at,
            left: LIST_INITIAL_LEFT,
            right: LIST_INITIAL_LEFT + 1,
        };
        if data_type == DataType::List {
            if bytes.len() != LIST_LEN {
                return Err(Error::MalformedMeta(format!(
                    "list record of {} bytes, expected {}",
                    bytes.len(),
                    LIST_LEN
                )));
            }
            meta.left = read_u64(&bytes[26..34]);
            meta.right = read_u64(&bytes[34..42]);
        }
        Ok(meta)
    }
}

/// Version for a new incarnation of a collection: 1 for a key never seen,
/// otherwise one past whatever is stored (tombstone or expired record).
///
/// Callers hold the (key, type) stripe.
pub fn next_version(current: Option<&Meta>) -> Result<u64> {
    match current {
        None => Ok(1),
        Some(meta) => meta.version.checked_add(1).ok_or(Error::VersionOverflow),
    }
}

/// Reads the stored record of `key` for `data_type`, tombstones included.
pub fn read_meta<R: ReadView>(view: &R, key: &[u8], data_type: DataType) -> Result<Option<Meta>> {
    debug_assert!(data_type != DataType::String, "strings carry no metadata record");
    let Some(raw) = view.get(data_type.meta_namespace(), &codec::encode_meta_key(key))? else {
        return Ok(None);
    };
    let meta = Meta::decode(&raw)?;
    if meta.data_type != data_type {
        return Err(Error::TypeMismatch {
            expected: data_type,
            found: meta.data_type,
        });
    }
    Ok(Some(meta))
}

/// Stages `meta` as the record of `key`. Nothing is written until commit.
pub fn write_meta(batch: &mut WriteBatch, key: &[u8], meta: &Meta) {
    batch.put(meta.data_type.meta_namespace(), codec::encode_meta_key(key), meta.encode());
}

/// Stages the logical delete of `key`: a tombstone one version past `meta`,
/// size 0 and no TTL, plus removal of its index bit and expiry entry.
///
/// No element record is touched, whatever the collection's size.
pub fn bump_version_for_delete(batch: &mut WriteBatch, key: &[u8], meta: &Meta) -> Result<Meta> {
    let mut tombstone = Meta::new(meta.data_type, next_version(Some(meta))?);
    tombstone.flags.insert(MetaFlags::TOMBSTONE);
    write_meta(batch, key, &tombstone);
    if !meta.is_tombstone() {
        batch.mark_index(key, meta.data_type, false, false);
    }
    if let Some(at) = meta.expires_at {
        batch.delete(Namespace::Expiry, codec::encode_expiry_key(at, meta.data_type.tag(), key));
    }
    Ok(tombstone)
}
