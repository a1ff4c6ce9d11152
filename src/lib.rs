// src/lib.rs
//! crab-strata: Redis-style strings, hashes, sets, lists and sorted sets
//! mapped onto sled trees, with O(1) delete through per-key versions.

pub mod codec; // key / value byte layouts
pub mod config; // Options + file loading
pub mod element; // element namespaces
pub mod engine; // sled adapter, batches, key locks
pub mod error;
pub mod expire; // clock + background sweeper
pub mod keys; // DEL / EXISTS / TTL family
pub mod meta; // metadata records + versions
pub mod monitor; // metrics & slowlog
pub mod scan; // SCAN / KEYS / HSCAN / SSCAN
pub mod store;
pub mod types; // String / Hash / Set / List / ZSet

pub use config::Options;
pub use error::{Error, Result};
pub use keys::{DelOutcome, Ttl};
pub use meta::DataType;
pub use monitor::Monitor;
pub use scan::{Cursor, GlobPattern};
pub use store::Store;
pub use types::{FieldValue, ScoreMember};
