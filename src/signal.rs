//! One-shot completion signal.

use core::fmt;

use crate::sync::{Condvar, Mutex};

#[derive(Debug)]
enum State<T> {
    Pending,
    Done(T),
    /// The writer unwound before producing a value.
    Abandoned,
}

/// A slot that is settled at most once and can be waited on by any number of threads.
///
/// `complete` stores the value and wakes every waiter. All accesses go through the same mutex, so
/// the write happens-before every `wait` that returns it.
pub struct Completion<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> Completion<T> {
    /// Creates a pending completion.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending),
            ready: Condvar::new(),
        }
    }

    /// Stores `value` and wakes all waiters.
    ///
    /// Panics if the completion is already settled.
    pub fn complete(&self, value: T) {
        let mut state = self.state.lock().unwrap();
        assert!(
            matches!(*state, State::Pending),
            "completion settled more than once"
        );
        *state = State::Done(value);
        drop(state);
        self.ready.notify_all();
    }

    /// Marks a pending completion as abandoned and wakes all waiters. No-op once settled.
    pub fn abandon(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, State::Pending) {
            *state = State::Abandoned;
        }
        drop(state);
        self.ready.notify_all();
    }

    /// Returns `true` if a value has been stored.
    pub fn is_complete(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Done(_))
    }
}

impl<T: Clone> Completion<T> {
    /// Blocks until the value is stored and returns a copy of it.
    ///
    /// Panics if the completion was abandoned.
    pub fn wait(&self) -> T {
        let mut state = self.state.lock().unwrap();
        loop {
            if let State::Done(value) = &*state {
                return value.clone();
            }
            if matches!(*state, State::Abandoned) {
                // release before unwinding so other waiters don't see a poisoned lock
                drop(state);
                panic!("waited on a computation that panicked");
            }
            state = self.ready.wait(state).unwrap();
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(all(test, not(feature = "check-loom")))]
mod tests {
    use super::Completion;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread::{self, scope};
    use std::time::Duration;

    const WAITERS: usize = 8;

    #[test]
    fn wait_after_complete() {
        let c = Completion::new();
        c.complete(42);
        assert!(c.is_complete());
        assert_eq!(c.wait(), 42);
        assert_eq!(c.wait(), 42);
    }

    // Every waiter blocked before `complete` wakes up with the stored value.
    #[test]
    fn wakes_all_waiters() {
        let c = Completion::new();
        let barrier = Barrier::new(WAITERS + 1);
        let woken = AtomicUsize::new(0);
        scope(|s| {
            for _ in 0..WAITERS {
                let _ = s.spawn(|| {
                    let _ = barrier.wait();
                    assert_eq!(c.wait(), "done".to_string());
                    let _ = woken.fetch_add(1, Ordering::Relaxed);
                });
            }
            let _ = barrier.wait();
            thread::sleep(Duration::from_millis(20));
            assert_eq!(woken.load(Ordering::Relaxed), 0);
            c.complete("done".to_string());
        });
        assert_eq!(woken.load(Ordering::Relaxed), WAITERS);
    }

    #[test]
    #[should_panic(expected = "settled more than once")]
    fn complete_twice() {
        let c = Completion::new();
        c.complete(1);
        c.complete(2);
    }

    #[test]
    fn abandon_panics_waiters() {
        let c = Completion::<usize>::new();
        scope(|s| {
            let waiter = s.spawn(|| c.wait());
            thread::sleep(Duration::from_millis(20));
            c.abandon();
            assert!(waiter.join().is_err());
        });
        assert!(!c.is_complete());
        // late waiters fail the same way
        assert!(thread::scope(|s| s.spawn(|| c.wait()).join()).is_err());
    }

    #[test]
    fn abandon_after_complete_is_noop() {
        let c = Completion::new();
        c.complete(7);
        c.abandon();
        assert_eq!(c.wait(), 7);
    }
}
