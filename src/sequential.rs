//! Single-threaded memoization.

use core::borrow::Borrow;
use core::fmt;
use std::collections::HashMap;
use std::hash::Hash;

use crate::compute::Compute;

/// Cache for a single caller. `get` takes `&mut self`, so no caller can ever observe a computation
/// in flight and the map needs neither a lock nor a completion signal.
///
/// Like [`Memo`](crate::Memo), runs the computation at most once per key and memoizes failures.
pub struct SequentialMemo<K, F: Compute<K>> {
    f: F,
    results: HashMap<K, Result<F::Value, F::Error>>,
}

impl<K, F> SequentialMemo<K, F>
where
    K: Eq + Hash,
    F: Compute<K>,
    F::Value: Clone,
    F::Error: Clone,
{
    /// Creates an empty cache around `f`.
    pub fn new(f: F) -> Self {
        Self {
            f,
            results: HashMap::new(),
        }
    }

    /// Returns the result for `key`, computing it on the first request.
    pub fn get(&mut self, key: K) -> Result<F::Value, F::Error> {
        if let Some(result) = self.results.get(&key) {
            return result.clone();
        }
        let result = self.f.compute(&key);
        let _ = self.results.insert(key, result.clone());
        result
    }

    /// Number of keys computed so far.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns `true` if nothing has been computed yet.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns `true` if `key` has been computed.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.results.contains_key(key)
    }
}

impl<K, F: Compute<K>> fmt::Debug for SequentialMemo<K, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialMemo")
            .field("len", &self.results.len())
            .finish()
    }
}
