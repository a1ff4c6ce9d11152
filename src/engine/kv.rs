// src/engine/kv.rs

use sled::IVec;

use super::Namespace;
use crate::error::Result;

/// Point reads shared by the live engine and a [`super::Snapshot`].
///
/// Writers read through the engine directly while holding the key's stripe
/// lock; readers go through a snapshot. Code that only needs `get` (metadata
/// lookups, existence checks) is written once against this trait.
pub trait ReadView {
    fn get(&self, ns: Namespace, key: &[u8]) -> Result<Option<IVec>>;

    fn contains(&self, ns: Namespace, key: &[u8]) -> Result<bool> {
        Ok(self.get(ns, key)?.is_some())
    }
}
