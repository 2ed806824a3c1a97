//! Fixed-size worker pool executing fallible jobs (component C1).
//!
//! Rust port of `common::ThreadPool` (`src/common/thread.pool.hh`/`.cpp` in
//! the original driver): a FIFO job queue guarded by a mutex and condition
//! variable, `n` worker threads, and a caller-supplied error handler invoked
//! whenever a job reports failure. The redesign flag in spec §9 calls for
//! replacing the `std::atomic<bool> + condition_variable` pair with a
//! channel; `crossbeam_channel::unbounded` plays exactly that role here —
//! `send` is the non-blocking enqueue, `recv` is the condvar wait, and
//! dropping the sender half is the "stop accepting jobs" signal.
//!
//! `JobT` is `Box<dyn FnOnce() -> Result<(), String> + Send>`, mirroring the
//! C++ `std::function<bool(std::string&)>` contract: `Ok(())` is success,
//! `Err(msg)` is a diagnostic string handed to the error handler.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Condvar, Mutex,
};
use std::thread::JoinHandle;

/// A fallible unit of work. Panics inside a job are caught at the worker
/// boundary via `catch_unwind` so one bad job cannot take down the pool —
/// "jobs do not propagate panics" (spec §4.1).
pub type Job = Box<dyn FnOnce() -> Result<(), String> + Send + 'static>;

struct Completion {
    pending: Mutex<usize>,
    cvar: Condvar,
}

impl Completion {
    fn new() -> Self {
        Completion {
            pending: Mutex::new(0),
            cvar: Condvar::new(),
        }
    }

    fn inc(&self) {
        *self.pending.lock().unwrap() += 1;
    }

    fn dec_and_notify(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending -= 1;
        if *pending == 0 {
            self.cvar.notify_all();
        }
    }

    fn wait_for_zero(&self) {
        let mut pending = self.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.cvar.wait(pending).unwrap();
        }
    }
}

/// Bounded worker pool. `submit` enqueues non-blockingly; `await_stop`
/// drains the queue and joins every worker. After `await_stop`, `submit`
/// panics (mirrors `CHECK(is_accepting_jobs_)` in the C++ source) — the
/// pool is meant to be torn down once, at stream finalization.
pub struct ThreadPool {
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    completion: Arc<Completion>,
    stopped: AtomicUsize,
}

impl ThreadPool {
    /// Spawn `min(available_parallelism, requested)` workers, minimum 1.
    /// `on_error` is called from a worker thread whenever a job returns
    /// `Err`; it must be `Send + Sync` since any worker may invoke it.
    pub fn new<F>(requested: usize, on_error: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let n_threads = requested.max(1).min(crate::util::count_cores().max(1));

        let (tx, rx): (Sender<Job>, Receiver<Job>) = unbounded();
        let completion = Arc::new(Completion::new());
        let on_error = Arc::new(on_error);

        let mut handles = Vec::with_capacity(n_threads);
        for _ in 0..n_threads {
            let rx = rx.clone();
            let completion = Arc::clone(&completion);
            let on_error = Arc::clone(&on_error);
            handles.push(std::thread::spawn(move || {
                while let Ok(job) = rx.recv() {
                    log::trace!("worker picked up job");
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(msg)) => {
                            log::warn!("job failed: {msg}");
                            on_error(&msg);
                        }
                        Err(_) => {
                            log::error!("job panicked");
                            on_error("job panicked");
                        }
                    }
                    completion.dec_and_notify();
                }
            }));
        }

        ThreadPool {
            tx: Some(tx),
            handles,
            completion,
            stopped: AtomicUsize::new(0),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }

    /// Enqueue a job. Non-blocking; returns immediately once the job is in
    /// the FIFO queue. Panics if called after [`ThreadPool::await_stop`].
    pub fn submit(&self, job: Job) {
        self.completion.inc();
        let tx = self
            .tx
            .as_ref()
            .expect("ThreadPool::submit called after await_stop");
        tx.send(job).expect("worker threads gone");
    }

    /// Block until every submitted job has finished running (not just been
    /// dequeued). Does not stop the pool — more jobs may be submitted
    /// afterwards. Equivalent to `TPool_jobsCompleted`.
    pub fn await_completion(&self) {
        self.completion.wait_for_zero();
    }

    /// Drain the queue, stop accepting new jobs, and join every worker.
    /// Idempotent. Equivalent to `ThreadPool::await_stop` in the C++ source.
    pub fn await_stop(&mut self) {
        if self.stopped.swap(1, Ordering::SeqCst) == 1 {
            return;
        }
        self.await_completion();
        self.tx.take(); // dropping the sender unblocks every worker's recv()
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.await_stop();
    }
}
