//! Synchronization primitives, swapped for loom's under `check-loom`.

cfg_if::cfg_if! {
    if #[cfg(feature = "check-loom")] {
        pub(crate) use loom::sync::{Arc, Condvar, Mutex};
    } else {
        pub(crate) use std::sync::{Arc, Condvar, Mutex};
    }
}
