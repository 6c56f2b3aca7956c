//! Coalescing memoization.
//!
//! [`Memo`] wraps an expensive keyed computation and guarantees it runs at most once per key, even
//! when many threads ask for the same key at the same time. Threads asking for different keys never
//! wait on each other. [`SequentialMemo`] is the unsynchronized counterpart for a single
//! caller.
//!
//! The [`driver`] module pushes a worklist of urls through a cache around a [`fetch::SimulatedFetch`]
//! and reports how long each lookup took.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod cache;
mod compute;
pub mod driver;
pub mod fetch;
mod sequential;
pub mod signal;
mod sync;
mod thread_pool;

pub use cache::Memo;
pub use compute::Compute;
pub use sequential::SequentialMemo;
pub use thread_pool::ThreadPool;
