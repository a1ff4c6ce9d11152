// src/types/string.rs

//! String values.
//!
//! A string has no metadata record: the value lives directly in the
//! `strings` namespace, prefixed by its deadline:
//!
//! ```text
//! [expires_at ms: u64 BE, 0 = none][payload]
//! ```

use crate::codec::{self, read_u64};
use crate::engine::{Namespace, ReadView, WriteBatch};
use crate::error::{Error, Result};
use crate::expire::now_ms;
use crate::meta::DataType;
use crate::store::{read_slot, Slot, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StringRecord {
    pub(crate) expires_at: Option<u64>,
    pub(crate) value: Vec<u8>,
}

impl StringRecord {
    pub(crate) fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.value.len());
        out.extend_from_slice(&self.expires_at.unwrap_or(0).to_be_bytes());
        out.extend_from_slice(&self.value);
        out
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::MalformedMeta(format!(
                "string record of {} bytes",
                bytes.len()
            )));
        }
        let expires_at = match read_u64(&bytes[..8]) {
            0 => None,
            at => Some(at),
        };
        Ok(StringRecord {
            expires_at,
            value: bytes[8..].to_vec(),
        })
    }
}

impl Store {
    /// SET key value. Overwrites any previous value and clears its TTL.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _op = self.monitor().op("set", key);
        let _guard = self.lock_for_write(key, DataType::String)?;
        let mut batch = WriteBatch::new();
        if let Some(Slot::String(old)) = read_slot(self.engine(), key, DataType::String)? {
            if let Some(at) = old.expires_at {
                batch.delete(
                    Namespace::Expiry,
                    codec::encode_expiry_key(at, DataType::String.tag(), key),
                );
            }
        }
        let record = StringRecord {
            expires_at: None,
            value: value.to_vec(),
        };
        batch.put(Namespace::Strings, key, record.encode());
        batch.mark_index(key, DataType::String, true, self.options().strict_types);
        self.commit(batch)
    }

    /// GET key. `NotFound` when the key holds no live string.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let _op = self.monitor().op("get", key);
        let now = now_ms();
        let record = match self.engine().get(Namespace::Strings, key)? {
            Some(raw) => StringRecord::decode(&raw)?,
            None => {
                self.check_rivals(key, DataType::String)?;
                return Err(Error::NotFound);
            }
        };
        if record.is_expired(now) {
            self.reclaim_quietly(key, DataType::String);
            return Err(Error::NotFound);
        }
        Ok(record.value)
    }

    /// INCRBY key delta. A missing key counts as 0; the TTL is kept.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> Result<i64> {
        let _op = self.monitor().op("incrby", key);
        let _guard = self.lock_for_write(key, DataType::String)?;
        let now = now_ms();
        let fresh = StringRecord {
            expires_at: None,
            value: b"0".to_vec(),
        };
        let (mut record, stale_expiry) = match read_slot(self.engine(), key, DataType::String)? {
            Some(Slot::String(record)) if !record.is_expired(now) => (record, None),
            Some(Slot::String(expired)) => (fresh, expired.expires_at),
            _ => (fresh, None),
        };
        let current = std::str::from_utf8(&record.value)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| Error::InvalidArgument("value is not an integer".into()))?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| Error::InvalidArgument("increment or decrement would overflow".into()))?;

        let mut batch = WriteBatch::new();
        if let Some(at) = stale_expiry {
            batch.delete(
                Namespace::Expiry,
                codec::encode_expiry_key(at, DataType::String.tag(), key),
            );
        }
        record.value = next.to_string().into_bytes();
        batch.put(Namespace::Strings, key, record.encode());
        batch.mark_index(key, DataType::String, true, self.options().strict_types);
        self.commit(batch)?;
        Ok(next)
    }

    pub fn incr(&self, key: &[u8]) -> Result<i64> {
        self.incr_by(key, 1)
    }

    pub fn decr(&self, key: &[u8]) -> Result<i64> {
        self.incr_by(key, -1)
    }
}
