//! Thread-safe coalescing cache.

use core::borrow::Borrow;
use core::fmt;
use std::collections::hash_map::{self, HashMap};
use std::hash::Hash;
use std::thread;

use tracing::trace;

use crate::compute::Compute;
use crate::signal::Completion;
use crate::sync::{Arc, Mutex};

/// Computation state for one key. Pending until the claiming caller stores the result.
type Entry<V, E> = Completion<Result<V, E>>;

/// Cache that runs its computation at most once per key and shares the result with every caller.
///
/// Concurrent `get`s for the same key are coalesced: the first caller claims the key and runs the
/// computation, the others block until its result is stored. `get`s for different keys don't
/// block each other, since the computation runs without the map lock held.
///
/// Errors are results too. A key whose computation failed keeps failing with the same error; it is
/// never retried.
pub struct Memo<K, F: Compute<K>> {
    f: F,
    entries: Mutex<HashMap<K, Arc<Entry<F::Value, F::Error>>>>,
}

/// Marks the claimed entry abandoned if the computation unwinds, so its waiters don't hang.
struct AbandonOnUnwind<'a, T>(&'a Completion<T>);

impl<T> Drop for AbandonOnUnwind<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abandon();
        }
    }
}

impl<K, F> Memo<K, F>
where
    K: Eq + Hash + Clone,
    F: Compute<K>,
    F::Value: Clone,
    F::Error: Clone,
{
    /// Creates an empty cache around `f`.
    pub fn new(f: F) -> Self {
        Self {
            f,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the result of the computation for `key`, running it if no caller has yet.
    ///
    /// If another caller is computing `key` right now, blocks until it finishes and returns its
    /// result. If the computation panics, the panic propagates to this caller and every caller
    /// waiting on the same key panics as well.
    pub fn get(&self, key: K) -> Result<F::Value, F::Error> {
        let mut entries = self.entries.lock().unwrap();
        let entry = match entries.entry(key.clone()) {
            hash_map::Entry::Occupied(o) => {
                let entry = o.get().clone();
                drop(entries);
                trace!("key already claimed, waiting");
                return entry.wait();
            }
            hash_map::Entry::Vacant(v) => v.insert(Arc::new(Completion::new())).clone(),
        };
        drop(entries);

        trace!("key claimed, computing");
        let guard = AbandonOnUnwind(&*entry);
        let result = self.f.compute(&key);
        entry.complete(result.clone());
        drop(guard);
        trace!(ok = result.is_ok(), "computation done");
        result
    }
}

impl<K: Eq + Hash, F: Compute<K>> Memo<K, F> {
    /// Number of keys requested so far, computed or still in flight.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns `true` if no key has been requested yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `key` has been requested, whether or not its computation finished.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().unwrap().contains_key(key)
    }
}

impl<K: Eq + Hash, F: Compute<K>> fmt::Debug for Memo<K, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo").field("len", &self.len()).finish()
    }
}

#[cfg(all(test, not(feature = "check-loom")))]
mod tests {
    use super::Memo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn tracks_requested_keys() {
        let calls = AtomicUsize::new(0);
        let memo = Memo::new(|k: &u32| -> Result<u32, ()> {
            let _ = calls.fetch_add(1, Ordering::Relaxed);
            Ok(k * 2)
        });
        assert!(memo.is_empty());
        assert_eq!(memo.get(1), Ok(2));
        assert_eq!(memo.get(2), Ok(4));
        assert_eq!(memo.get(1), Ok(2));
        assert_eq!(memo.len(), 2);
        assert!(memo.contains(&1));
        assert!(!memo.contains(&3));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn borrowed_lookup() {
        let memo = Memo::new(|k: &String| -> Result<usize, ()> { Ok(k.len()) });
        let _ = memo.get("abc".to_string());
        assert!(memo.contains("abc"));
    }
}
