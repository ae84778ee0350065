//! Background thread pool for frame prefetch
//!
//! Uses work-stealing deques:
//! - New tasks go to the global injector (checked before stealing)
//! - Idle workers steal old tasks from each other
//!
//! Epoch mechanism skips stale prefetch jobs queued before a scrub jump.

use crossbeam::deque::{Injector, Worker};
use log::trace;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Work-stealing worker pool.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4)?;
/// workers.execute(move || decode_window(...));
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Thread count used when configured as 0 (leave 25% for the command loop)
    pub fn auto_threads() -> usize {
        (num_cpus::get() * 3 / 4).max(1)
    }

    /// Spawn `num_threads` workers (0 = auto)
    pub fn new(num_threads: usize) -> io::Result<Self> {
        let num_threads = if num_threads == 0 {
            Self::auto_threads()
        } else {
            num_threads
        };
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers_local: Vec<Worker<Job>> = Vec::new();
        let mut stealers = Vec::new();
        for _ in 0..num_threads {
            let worker: Worker<Job> = Worker::new_fifo();
            stealers.push(worker.stealer());
            workers_local.push(worker);
        }

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, worker) in workers_local.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let handle = thread::Builder::new()
                .name(format!("vcompare-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    loop {
                        if let Some(job) = worker.pop() {
                            job();
                            continue;
                        }
                        if let Some(job) = injector.steal().success() {
                            job();
                            continue;
                        }
                        if let Some(job) = stealers.iter().find_map(|s| s.steal().success()) {
                            job();
                            continue;
                        }
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                    trace!("Worker {} stopped", worker_id);
                })?;
            handles.push(handle);
        }

        trace!("Workers initialized: {} threads (work-stealing)", num_threads);
        Ok(Self {
            injector,
            handles,
            shutdown,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }

    /// Run closure on a worker thread
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push(Box::new(f));
    }

    /// Run closure only if `epoch` still equals `expected` when a worker
    /// picks it up. Jobs made stale while queued are skipped silently.
    pub fn execute_with_epoch<F>(&self, epoch: Arc<AtomicU64>, expected: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push(Box::new(move || {
            if epoch.load(Ordering::Acquire) == expected {
                f();
            } else {
                trace!("Skipping stale job (epoch {} != {})", expected, epoch.load(Ordering::Relaxed));
            }
        }));
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);
        self.shutdown.store(true, Ordering::SeqCst);

        // 500ms total; a worker stuck in a decode is left to die with the process
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("All {} workers stopped", num_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_for(counter: &AtomicUsize, n: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if counter.load(Ordering::SeqCst) >= n {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_execute_runs_all_jobs() {
        let workers = Workers::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let c = Arc::clone(&counter);
            workers.execute(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(wait_for(&counter, 20));
    }

    #[test]
    fn test_stale_epoch_skipped() {
        let workers = Workers::new(1).unwrap();
        let epoch = Arc::new(AtomicU64::new(5));
        let ran = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&ran);
        workers.execute_with_epoch(Arc::clone(&epoch), 4, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let r = Arc::clone(&ran);
        workers.execute_with_epoch(Arc::clone(&epoch), 5, move || {
            r.fetch_add(10, Ordering::SeqCst);
        });
        let d = Arc::clone(&done);
        workers.execute(move || {
            d.fetch_add(1, Ordering::SeqCst);
        });

        assert!(wait_for(&done, 1));
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_auto_thread_count() {
        assert!(Workers::auto_threads() >= 1);
    }
}
