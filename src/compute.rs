//! The keyed computation a cache memoizes.

/// An expensive, idempotent computation from a key to a result.
///
/// Implemented for every `Fn(&K) -> Result<V, E>`, so closures and plain functions can be handed
/// to a cache directly.
pub trait Compute<K> {
    /// Value produced on success.
    type Value;

    /// Error produced on failure. Failures are memoized like values.
    type Error;

    /// Runs the computation for `key`.
    fn compute(&self, key: &K) -> Result<Self::Value, Self::Error>;
}

impl<K, V, E, F> Compute<K> for F
where
    F: Fn(&K) -> Result<V, E>,
{
    type Value = V;
    type Error = E;

    fn compute(&self, key: &K) -> Result<V, E> {
        self(key)
    }
}
