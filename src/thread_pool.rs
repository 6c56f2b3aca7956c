//! Thread pool that joins all thread when dropped.

#![allow(clippy::mutex_atomic)]

// NOTE: Crossbeam channels are MPMC, so every worker gets a clone of the same receiver.
use crossbeam_channel::{unbounded, Sender};
use itertools::Itertools;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use tracing::debug;

struct Job(Box<dyn FnOnce() + Send + 'static>);

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for Worker {
    /// Joins the worker thread. Jobs run under `catch_unwind`, so the thread itself only fails if
    /// the pool's own bookkeeping panicked.
    fn drop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if let Err(payload) = thread.join() {
            debug!(worker = self.id, "worker panicked");
            if !thread::panicking() {
                panic::resume_unwind(payload);
            }
        }
    }
}

/// State shared by the pool and its workers: the job count `join` waits on, and the first panic
/// a job raised.
#[derive(Debug, Default)]
struct ThreadPoolInner {
    job_count: Mutex<usize>,
    empty_condvar: Condvar,
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl ThreadPoolInner {
    /// Increment the job count.
    fn start_job(&self) {
        *self.job_count.lock().unwrap() += 1;
    }

    /// Decrement the job count.
    fn finish_job(&self) {
        let mut count = self.job_count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.empty_condvar.notify_all();
        }
    }

    /// Wait until the job count becomes 0.
    fn wait_empty(&self) {
        let count = self.job_count.lock().unwrap();
        drop(
            self.empty_condvar
                .wait_while(count, |count| *count > 0)
                .unwrap(),
        );
    }

    /// Runs `job`, keeping its panic payload if it is the first one.
    fn run(&self, job: Job) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job.0)) {
            let mut panic = self.panic.lock().unwrap();
            if panic.is_none() {
                *panic = Some(payload);
            }
        }
        self.finish_job();
    }
}

/// Thread pool.
#[derive(Debug)]
pub struct ThreadPool {
    workers: Vec<Worker>,
    job_sender: Option<Sender<Job>>,
    pool_inner: Arc<ThreadPoolInner>,
}

impl ThreadPool {
    /// Create a new ThreadPool with `size` threads. Panics if the size is 0.
    pub fn new(size: usize) -> Self {
        assert!(size > 0);

        let (job_sender, job_receiver) = unbounded::<Job>();
        let pool_inner = Arc::new(ThreadPoolInner::default());

        let workers = (0..size)
            .map(|id| {
                let job_receiver = job_receiver.clone();
                let pool_inner = pool_inner.clone();
                let thread = thread::spawn(move || {
                    for job in job_receiver {
                        debug!(worker = id, "executing job");
                        pool_inner.run(job);
                    }
                    debug!(worker = id, "terminating");
                });
                Worker {
                    id,
                    thread: Some(thread),
                }
            })
            .collect_vec();

        ThreadPool {
            workers,
            job_sender: Some(job_sender),
            pool_inner,
        }
    }

    /// Execute a new job in the thread pool.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Counted before sending, so `join` can't observe an empty pool while the job is queued.
        self.pool_inner.start_job();
        self.job_sender
            .as_ref()
            .unwrap()
            .send(Job(Box::new(f)))
            .unwrap();
    }

    /// Block the current thread until all jobs in the pool have been executed.  NOTE: This method
    /// has nothing to do with `JoinHandle::join`.
    pub fn join(&self) {
        self.pool_inner.wait_empty();
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    /// Closes the job channel and joins the workers once they drain the remaining jobs. If any job
    /// panicked, the first panic is resumed here unless this thread is already unwinding.
    fn drop(&mut self) {
        drop(self.job_sender.take());
        self.workers.clear();
        let payload = self.pool_inner.panic.lock().unwrap().take();
        if let Some(payload) = payload {
            if !thread::panicking() {
                panic::resume_unwind(payload);
            }
        }
    }
}
