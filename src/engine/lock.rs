// src/engine/lock.rs

//! Striped per-(key, type) mutexes.
//!
//! A structural write holds its stripe from the metadata read until the
//! batch commit returns. Guards release on drop, including on `?` returns.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};

use crate::meta::DataType;

pub struct LockTable {
    stripes: Box<[Mutex<()>]>,
}

/// Exclusive hold on one stripe.
#[must_use = "the stripe is released as soon as the guard is dropped"]
pub struct KeyGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Hold on the stripes of two keys, taken in ascending stripe order.
#[must_use = "the stripes are released as soon as the guard is dropped"]
pub struct PairGuard<'a> {
    _first: MutexGuard<'a, ()>,
    _second: Option<MutexGuard<'a, ()>>,
}

/// Hold on any number of stripes, taken in ascending stripe order.
#[must_use = "the stripes are released as soon as the guard is dropped"]
pub struct MultiGuard<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl LockTable {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        LockTable {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }

    pub fn stripe_of(&self, key: &[u8], data_type: DataType) -> usize {
        let mut hasher = DefaultHasher::new();
        data_type.tag().hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub fn lock(&self, key: &[u8], data_type: DataType) -> KeyGuard<'_> {
        KeyGuard {
            _guard: self.stripes[self.stripe_of(key, data_type)].lock(),
        }
    }

    /// Locks two keys without deadlocking against a thread locking the same
    /// pair in the opposite order. Keys sharing a stripe lock it once.
    pub fn lock_pair(&self, a: (&[u8], DataType), b: (&[u8], DataType)) -> PairGuard<'_> {
        let sa = self.stripe_of(a.0, a.1);
        let sb = self.stripe_of(b.0, b.1);
        if sa == sb {
            return PairGuard {
                _first: self.stripes[sa].lock(),
                _second: None,
            };
        }
        let (low, high) = if sa < sb { (sa, sb) } else { (sb, sa) };
        let first = self.stripes[low].lock();
        let second = self.stripes[high].lock();
        PairGuard {
            _first: first,
            _second: Some(second),
        }
    }

    /// Locks every distinct stripe of `keys`, lowest stripe first, so it
    /// never deadlocks against [`LockTable::lock_pair`] or another `lock_many`.
    pub fn lock_many<'k, I>(&self, keys: I) -> MultiGuard<'_>
    where
        I: IntoIterator<Item = (&'k [u8], DataType)>,
    {
        let mut stripes: Vec<usize> = keys
            .into_iter()
            .map(|(key, data_type)| self.stripe_of(key, data_type))
            .collect();
        stripes.sort_unstable();
        stripes.dedup();
        MultiGuard {
            _guards: stripes.into_iter().map(|i| self.stripes[i].lock()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn stripe_is_stable_and_type_aware() {
        let table = LockTable::new(64);
        assert_eq!(table.stripe_of(b"k", DataType::Hash), table.stripe_of(b"k", DataType::Hash));
        assert!(table.stripe_of(b"k", DataType::Hash) < 64);
        assert_eq!(LockTable::new(0).stripes(), 1);
    }

    #[test]
    fn same_stripe_pair_does_not_self_deadlock() {
        let table = LockTable::new(1);
        let _pair = table.lock_pair((&b"a"[..], DataType::Set), (&b"b"[..], DataType::Set));
    }

    #[test]
    fn lock_many_dedups_shared_stripes() {
        let table = LockTable::new(2);
        let keys: Vec<&[u8]> = vec![&b"a"[..], &b"b"[..], &b"c"[..], &b"a"[..]];
        let _all = table.lock_many(keys.iter().map(|k| (*k, DataType::Hash)));
    }

    #[test]
    fn opposite_order_pairs_complete() {
        let table = Arc::new(LockTable::new(16));
        let done = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = table.clone();
                let done = done.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let (a, b) = if i % 2 == 0 {
                            (&b"src"[..], &b"dst"[..])
                        } else {
                            (&b"dst"[..], &b"src"[..])
                        };
                        let _pair = table.lock_pair((a, DataType::Set), (b, DataType::Set));
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn guard_serializes_critical_sections() {
        let table = Arc::new(LockTable::new(8));
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _g = table.lock(b"hot", DataType::Hash);
                        // non-atomic read-modify-write, safe only under the stripe
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 4000);
    }
}
