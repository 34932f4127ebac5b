use crate::{
    log::{Logger, NullLogger},
    sync::queue::BoundedQueue,
};
use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Unit of work executed by a pool worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// One worker thread: runs tasks from its own queue, otherwise steals one
/// from its donor, otherwise sleeps briefly.
struct Worker {
    id: usize,
    queue: Arc<BoundedQueue<Task>>,
    donor: Arc<BoundedQueue<Task>>,
    running: Arc<AtomicBool>,
    logger: Arc<dyn Logger>,
}

impl Worker {
    fn run(self) {
        while self.running.load(Ordering::Acquire) {
            match self.queue.pop().or_else(|| self.donor.pop()) {
                Some(task) => self.execute(task),
                None => thread::sleep(IDLE_SLEEP),
            }
        }
    }

    fn execute(&self, task: Task) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            self.logger.error(format_args!(
                "Task panicked on worker {}: {}",
                self.id,
                panic_message(payload.as_ref())
            ));
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Fixed ring of workers with round-robin submission and neighbor stealing.
///
/// Worker `i` steals from worker `(i + 1) % n`. Submission never blocks:
/// [`submit`](Self::submit) returns `false` when the chosen worker's
/// queue is full.
///
/// ```
/// use std::sync::mpsc;
/// use trio_http::ThreadPool;
///
/// let pool = ThreadPool::new(2, 16).unwrap();
/// let (tx, rx) = mpsc::channel();
///
/// for i in 0..8 {
///     let tx = tx.clone();
///     assert!(pool.submit(move || tx.send(i).unwrap()));
/// }
///
/// let mut results: Vec<i32> = rx.iter().take(8).collect();
/// results.sort();
/// assert_eq!(results, (0..8).collect::<Vec<_>>());
/// ```
pub struct ThreadPool {
    queues: Vec<Arc<BoundedQueue<Task>>>,
    handles: Vec<JoinHandle<()>>,
    next: AtomicUsize,
    running: Arc<AtomicBool>,
}

impl ThreadPool {
    /// Starts `threads` workers (at least one), each with a queue of
    /// `capacity` tasks rounded up to a power of two.
    pub fn new(threads: usize, capacity: usize) -> io::Result<Self> {
        Self::with_logger(threads, capacity, Arc::new(NullLogger))
    }

    pub fn with_logger(threads: usize, capacity: usize, logger: Arc<dyn Logger>) -> io::Result<Self> {
        let threads = threads.max(1);
        let queues: Vec<_> = (0..threads)
            .map(|_| Arc::new(BoundedQueue::with_capacity(capacity)))
            .collect();

        let mut pool = Self {
            handles: Vec::with_capacity(threads),
            queues,
            next: AtomicUsize::new(0),
            running: Arc::new(AtomicBool::new(true)),
        };

        for id in 0..threads {
            let worker = Worker {
                id,
                queue: Arc::clone(&pool.queues[id]),
                donor: Arc::clone(&pool.queues[(id + 1) % threads]),
                running: Arc::clone(&pool.running),
                logger: Arc::clone(&logger),
            };

            let spawned = thread::Builder::new()
                .name(format!("trio-worker-{id}"))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(err) => {
                    logger.error(format_args!("Failed to start worker {id}: {err}"));
                    pool.shutdown();
                    return Err(err);
                }
            }
        }

        Ok(pool)
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.queues.len()
    }

    /// Per-worker queue capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.queues.first().map_or(0, |q| q.capacity())
    }

    /// Tasks queued but not yet picked up.
    pub fn pending(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    /// Queues `task` on the next worker in round-robin order.
    ///
    /// Returns `false`, dropping the task, if that worker's queue is full
    /// or the pool has been shut down.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        self.queues[index].push(Box::new(task)).is_ok()
    }

    /// Stops every worker after its current task and joins the threads.
    /// Tasks still queued are dropped.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::tests::MemoryLogger;
    use crossbeam::channel::{self, RecvTimeoutError};
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn runs_all_submitted_tasks() {
        let pool = ThreadPool::new(4, 1024).unwrap();
        let (tx, rx) = channel::unbounded();

        for i in 0..1024u64 {
            let tx = tx.clone();
            assert!(pool.submit(move || tx.send(i).unwrap()));
        }

        let sum: u64 = (0..1024).map(|_| rx.recv_timeout(WAIT).unwrap()).sum();
        assert_eq!(sum, 1023 * 1024 / 2);
    }

    #[test]
    fn full_pool_rejects_without_blocking() {
        let pool = ThreadPool::new(2, 2).unwrap();
        let (started_tx, started_rx) = channel::unbounded();
        let (gate_tx, gate_rx) = channel::bounded::<()>(0);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let (started, gate, done) = (started_tx.clone(), gate_rx.clone(), done.clone());
            assert!(pool.submit(move || {
                started.send(()).unwrap();
                let _ = gate.recv();
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for _ in 0..2 {
            started_rx.recv_timeout(WAIT).unwrap();
        }

        for _ in 0..pool.threads() * pool.capacity() {
            let done = done.clone();
            assert!(pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let begin = Instant::now();
        for _ in 0..8 {
            assert!(!pool.submit(|| {}));
        }
        assert!(begin.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.pending(), 4);

        drop(gate_tx);
        wait_until(|| done.load(Ordering::SeqCst) == 6);
    }

    #[test]
    fn idle_worker_steals_from_neighbor() {
        let pool = ThreadPool::new(2, 8).unwrap();
        let (started_tx, started_rx) = channel::unbounded();
        let (names_tx, names_rx) = channel::unbounded();
        let (gate_a_tx, gate_a_rx) = channel::bounded::<()>(0);
        let (gate_b_tx, gate_b_rx) = channel::bounded::<()>(0);

        for gate in [gate_a_rx, gate_b_rx] {
            let (started, names) = (started_tx.clone(), names_tx.clone());
            assert!(pool.submit(move || {
                started.send(()).unwrap();
                let _ = gate.recv();
                names.send(("blocker", thread::current().name().map(str::to_owned))).unwrap();
            }));
        }
        for _ in 0..2 {
            started_rx.recv_timeout(WAIT).unwrap();
        }

        // One lands on each worker's queue; only the released worker is free.
        for label in ["first", "second"] {
            let names = names_tx.clone();
            assert!(pool.submit(move || {
                names.send((label, thread::current().name().map(str::to_owned))).unwrap();
            }));
        }

        drop(gate_a_tx);
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(names_rx.recv_timeout(WAIT).unwrap());
        }
        assert_eq!(seen[0].0, "blocker");
        assert!(seen[0].1.is_some());
        assert!(seen.iter().all(|(_, name)| *name == seen[0].1));
        assert_eq!(
            names_rx.recv_timeout(Duration::from_millis(50)),
            Err(RecvTimeoutError::Timeout)
        );

        drop(gate_b_tx);
        assert_eq!(names_rx.recv_timeout(WAIT).unwrap().0, "blocker");
    }

    #[test]
    fn panicking_task_is_logged_and_worker_survives() {
        let logger = Arc::new(MemoryLogger::default());
        let pool = ThreadPool::with_logger(1, 4, logger.clone()).unwrap();
        let (tx, rx) = channel::unbounded();

        assert!(pool.submit(|| panic!("boom")));
        assert!(pool.submit(move || tx.send(()).unwrap()));

        rx.recv_timeout(WAIT).unwrap();
        assert!(logger.contains(tracing::Level::ERROR, "boom"));
    }

    #[test]
    fn shutdown_rejects_new_tasks() {
        let mut pool = ThreadPool::new(2, 4).unwrap();
        pool.shutdown();
        assert!(!pool.submit(|| {}));
        pool.shutdown();
    }
}
