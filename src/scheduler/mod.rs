//! Named execution contexts and the task submission surface.
//!
//! Four policies govern where submitted work runs: a dedicated FIFO worker
//! (`single`), a fixed pool sized to the machine (`parallel`), an unbounded
//! pool that grows on demand and reaps idle workers (`elastic`) and the
//! calling thread itself (`immediate`). Shared process-wide instances are
//! reachable through the [`schedulers`] functions; `new_*` variants create
//! private pools whose lifecycle the caller controls.

use std::{
    num::NonZeroUsize,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{channel, Receiver, Sender},
        Arc, Mutex, OnceLock,
    },
    thread,
    time::Duration,
};

use crate::errors::SequenceError;

pub(crate) type Task = Box<dyn FnOnce() + Send>;

const ELASTIC_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Handle to one execution context. Cloning is cheap; clones refer to the
/// same underlying pool.
#[derive(Clone)]
pub struct Scheduler {
    flavor: Arc<Flavor>,
}

enum Flavor {
    Immediate,
    Single(ChannelPool),
    Parallel(ChannelPool),
    Elastic(ElasticPool),
}

impl Scheduler {
    /// Submits a task to this context. For `immediate` the task runs
    /// synchronously on the calling thread before `schedule` returns; every
    /// other flavor hands the task off to a worker thread.
    ///
    /// # Errors
    ///
    /// Returns `SequenceError::SchedulerClosed` when the pool has been shut
    /// down; the task is dropped in that case.
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) -> Result<(), SequenceError> {
        match &*self.flavor {
            Flavor::Immediate => {
                task();
                Ok(())
            }
            Flavor::Single(pool) | Flavor::Parallel(pool) => pool.submit(Box::new(task)),
            Flavor::Elastic(pool) => pool.submit(Box::new(task)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match &*self.flavor {
            Flavor::Immediate => "immediate",
            Flavor::Single(pool) | Flavor::Parallel(pool) => pool.name,
            Flavor::Elastic(pool) => pool.name,
        }
    }

    /// Closes the pool. Workers finish their current task and exit; later
    /// submissions fail with `SchedulerClosed`. A no-op for `immediate`.
    pub fn shutdown(&self) {
        match &*self.flavor {
            Flavor::Immediate => {}
            Flavor::Single(pool) | Flavor::Parallel(pool) => pool.shutdown(),
            Flavor::Elastic(pool) => pool.shutdown(),
        }
    }
}

// A panicking task must not take down its worker; pipelines convert their own
// faults to error signals before they reach this boundary.
fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        eprintln!("fluxion: task panicked on a scheduler worker");
    }
}

/// Fixed set of workers draining one shared channel. One worker gives strict
/// submission order; N workers give a bounded concurrent pool.
struct ChannelPool {
    name: &'static str,
    tx: Mutex<Option<Sender<Task>>>,
}

impl ChannelPool {
    fn new(name: &'static str, workers: usize) -> Self {
        let (tx, rx) = channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));
        for i in 0..workers {
            let rx = Arc::clone(&rx);
            let thread_name = if workers == 1 {
                name.to_owned()
            } else {
                format!("{}-{}", name, i)
            };
            thread::Builder::new()
                .name(thread_name)
                .spawn(move || worker_loop(&rx))
                .expect("failed to spawn scheduler worker");
        }
        ChannelPool {
            name,
            tx: Mutex::new(Some(tx)),
        }
    }

    fn submit(&self, task: Task) -> Result<(), SequenceError> {
        let guard = self.tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx
                .send(task)
                .map_err(|_| SequenceError::SchedulerClosed(self.name)),
            None => Err(SequenceError::SchedulerClosed(self.name)),
        }
    }

    fn shutdown(&self) {
        // Dropping the sender ends every worker's recv loop.
        self.tx.lock().unwrap().take();
    }
}

fn worker_loop(rx: &Mutex<Receiver<Task>>) {
    loop {
        // Only the wait is serialized; the task itself runs with the lock
        // released so pool workers execute concurrently.
        let task = { rx.lock().unwrap().recv() };
        match task {
            Ok(task) => run_task(task),
            Err(_) => break,
        }
    }
}

/// Pool that grows a worker whenever no idle one is available, with no upper
/// bound, and reaps a worker after `keep_alive` of idleness. Idle workers are
/// a free-list of per-worker senders; a stale entry (a worker that already
/// reaped itself) is discovered by the failed send and discarded.
struct ElasticPool {
    name: &'static str,
    keep_alive: Duration,
    idle: Arc<Mutex<Vec<Sender<Task>>>>,
    closed: Arc<AtomicBool>,
    next_worker: AtomicUsize,
}

impl ElasticPool {
    fn new(name: &'static str, keep_alive: Duration) -> Self {
        ElasticPool {
            name,
            keep_alive,
            idle: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            next_worker: AtomicUsize::new(0),
        }
    }

    fn submit(&self, task: Task) -> Result<(), SequenceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SequenceError::SchedulerClosed(self.name));
        }
        let mut task = task;
        loop {
            let reuse = self.idle.lock().unwrap().pop();
            match reuse {
                Some(tx) => match tx.send(task) {
                    Ok(()) => return Ok(()),
                    Err(returned) => task = returned.0,
                },
                None => break,
            }
        }
        self.grow(task);
        Ok(())
    }

    fn grow(&self, task: Task) {
        let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::<Task>();
        let worker_tx = tx.clone();
        let idle = Arc::clone(&self.idle);
        let closed = Arc::clone(&self.closed);
        let keep_alive = self.keep_alive;

        // The receiver is alive until the worker exits, so this send cannot
        // fail.
        let _ = tx.send(task);

        thread::Builder::new()
            .name(format!("{}-{}", self.name, id))
            .spawn(move || loop {
                match rx.recv_timeout(keep_alive) {
                    Ok(task) => {
                        run_task(task);
                        if closed.load(Ordering::Acquire) {
                            break;
                        }
                        idle.lock().unwrap().push(worker_tx.clone());
                    }
                    Err(_) => break,
                }
            })
            .expect("failed to spawn scheduler worker");
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        // Parked workers sit in recv_timeout; hand each one an empty task so
        // it observes the closed flag now instead of at the end of its
        // keep-alive window.
        let parked = std::mem::take(&mut *self.idle.lock().unwrap());
        for worker in parked {
            let _ = worker.send(Box::new(|| {}));
        }
    }
}

/// Creates a private context with one dedicated worker thread (named
/// `single`); tasks execute strictly in submission order.
#[must_use]
pub fn new_single() -> Scheduler {
    Scheduler {
        flavor: Arc::new(Flavor::Single(ChannelPool::new("single", 1))),
    }
}

/// Creates a private fixed pool sized to the number of available processing
/// units (threads named `parallel-N`).
#[must_use]
pub fn new_parallel() -> Scheduler {
    let workers = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    Scheduler {
        flavor: Arc::new(Flavor::Parallel(ChannelPool::new("parallel", workers))),
    }
}

/// Creates a private unbounded pool (threads named `elastic-N`) that releases
/// a worker after it has been idle for 60 seconds.
#[must_use]
pub fn new_elastic() -> Scheduler {
    Scheduler {
        flavor: Arc::new(Flavor::Elastic(ElasticPool::new(
            "elastic",
            ELASTIC_KEEP_ALIVE,
        ))),
    }
}

/// Process-wide shared contexts, lazily initialized on first use.
pub mod schedulers {
    use super::{new_elastic, new_parallel, new_single, Arc, Flavor, OnceLock, Scheduler};

    /// The shared single-worker context.
    pub fn single() -> Scheduler {
        static SINGLE: OnceLock<Scheduler> = OnceLock::new();
        SINGLE.get_or_init(new_single).clone()
    }

    /// The shared fixed-size pool.
    pub fn parallel() -> Scheduler {
        static PARALLEL: OnceLock<Scheduler> = OnceLock::new();
        PARALLEL.get_or_init(new_parallel).clone()
    }

    /// The shared unbounded pool.
    pub fn elastic() -> Scheduler {
        static ELASTIC: OnceLock<Scheduler> = OnceLock::new();
        ELASTIC.get_or_init(new_elastic).clone()
    }

    /// The calling-thread context: tasks run synchronously, no hand-off.
    #[must_use]
    pub fn immediate() -> Scheduler {
        Scheduler {
            flavor: Arc::new(Flavor::Immediate),
        }
    }
}

// Single-worker tokio runtime (threads named "timer") acting as the crate's
// timer wheel for interval sources.
pub(crate) fn timer_runtime() -> &'static tokio::runtime::Runtime {
    static TIMER: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    TIMER.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("timer")
            .enable_time()
            .build()
            .expect("failed to start the timer runtime")
    })
}
