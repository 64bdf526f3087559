//! Thread-confinement executor.
//!
//! One worker thread owns whatever state it was initialised with and runs
//! submitted closures one at a time, in submission order. Callers block on
//! a one-shot reply until their closure has run.
//!
//! Lifecycle: `Uninitialized` until the first submission, which spawns the
//! worker; `Initializing` while the worker runs the init closure; `Running`
//! once it services the queue; `Destroyed` after [`Executor::destroy`].
//! Submissions after destruction, and waiters whose job is discarded by it,
//! get `None` instead of blocking forever.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

/// Jobs that may wait in the queue before producers block
pub const QUEUE_CAPACITY: usize = 10;

/// Interpreter evaluation recurses on the native stack
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

type Job = Box<dyn FnOnce() + Send>;
type Init = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Uninitialized = 0,
    Initializing = 1,
    Running = 2,
    Destroyed = 3,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Uninitialized,
            1 => State::Initializing,
            2 => State::Running,
            _ => State::Destroyed,
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    init: Option<Init>,
    sender: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

pub struct Executor {
    name: String,
    state: Arc<AtomicU8>,
    lifecycle: Mutex<Lifecycle>,
    worker: OnceLock<ThreadId>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Executor {
    /// Create an executor whose worker runs `init` before its first job
    pub fn new(name: impl Into<String>, init: impl FnOnce() + Send + 'static) -> Self {
        Executor {
            name: name.into(),
            state: Arc::new(AtomicU8::new(State::Uninitialized as u8)),
            lifecycle: Mutex::new(Lifecycle {
                init: Some(Box::new(init)),
                ..Lifecycle::default()
            }),
            worker: OnceLock::new(),
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_worker_thread(&self) -> bool {
        self.worker.get() == Some(&thread::current().id())
    }

    /// Identity of the worker thread, once started
    pub fn worker_thread(&self) -> Option<ThreadId> {
        self.worker.get().copied()
    }

    /// Jobs waiting in the queue
    pub fn pending(&self) -> usize {
        self.lifecycle
            .lock()
            .sender
            .as_ref()
            .map_or(0, |sender| sender.len())
    }

    /// Spawn the worker if it is not running yet
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if self.state() != State::Uninitialized {
            return;
        }
        self.state.store(State::Initializing as u8, Ordering::Release);

        let (sender, receiver) = channel::bounded::<Job>(QUEUE_CAPACITY);
        let init = lifecycle.init.take();
        let state = self.state.clone();
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(format!("scmbridge-{}", self.name))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                if let Some(init) = init
                    && panic::catch_unwind(AssertUnwindSafe(init)).is_err()
                {
                    error!(executor = %name, "worker initialisation panicked");
                }
                let _ = state.compare_exchange(
                    State::Initializing as u8,
                    State::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                debug!(executor = %name, "worker running");
                for job in receiver.iter() {
                    if State::from_u8(state.load(Ordering::Acquire)) == State::Destroyed {
                        break;
                    }
                    job();
                }
                debug!(executor = %name, "worker stopped");
            });

        match spawned {
            Ok(handle) => {
                let _ = self.worker.set(handle.thread().id());
                lifecycle.sender = Some(sender);
                lifecycle.thread = Some(handle);
            }
            Err(err) => {
                error!(executor = %self.name, %err, "cannot spawn worker thread");
                self.state.store(State::Destroyed as u8, Ordering::Release);
            }
        }
    }

    /// Run `f` on the worker thread and return its result.
    ///
    /// On the worker thread itself `f` runs immediately. A panic inside `f`
    /// is resumed on the calling thread; the worker keeps servicing the
    /// queue. Returns `None` when the executor is destroyed before `f` runs.
    pub fn submit<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_worker_thread() {
            trace!(executor = %self.name, "running reentrant job inline");
            return Some(f());
        }
        self.start();
        let Some(sender) = self.lifecycle.lock().sender.clone() else {
            warn!(executor = %self.name, "job submitted after shutdown");
            return None;
        };

        let (reply_sender, reply) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = reply_sender.send(outcome);
        });
        if sender.send(job).is_err() {
            warn!(executor = %self.name, "job submitted after shutdown");
            return None;
        }
        drop(sender);
        trace!(executor = %self.name, "job queued");

        match reply.recv() {
            Ok(Ok(value)) => Some(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => {
                warn!(executor = %self.name, "job discarded by shutdown");
                None
            }
        }
    }

    /// Stop accepting jobs and release waiters.
    ///
    /// The job currently running finishes; queued jobs are discarded and
    /// their callers get `None`. Joins the worker unless called from it.
    pub fn destroy(&self) {
        let (sender, thread) = {
            let mut lifecycle = self.lifecycle.lock();
            self.state.store(State::Destroyed as u8, Ordering::Release);
            lifecycle.init = None;
            (lifecycle.sender.take(), lifecycle.thread.take())
        };
        drop(sender);
        if let Some(thread) = thread
            && !self.is_worker_thread()
            && thread.join().is_err()
        {
            error!(executor = %self.name, "worker thread panicked");
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if self.state() != State::Destroyed {
            self.destroy();
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_starts_lazily_and_runs_init_first() {
        let initialised = Arc::new(AtomicUsize::new(0));
        let flag = initialised.clone();
        let executor = Executor::new("lazy", move || {
            flag.store(1, Ordering::SeqCst);
        });
        assert_eq!(executor.state(), State::Uninitialized);
        assert_eq!(initialised.load(Ordering::SeqCst), 0);

        let seen = executor.submit({
            let initialised = initialised.clone();
            move || initialised.load(Ordering::SeqCst)
        });
        assert_eq!(seen, Some(1));
        assert_eq!(executor.state(), State::Running);
    }

    #[test]
    fn test_jobs_run_on_the_worker_thread() {
        let executor = Executor::new("identity", || {});
        let caller = thread::current().id();
        let ran_on = executor.submit(|| thread::current().id()).unwrap();
        assert_ne!(ran_on, caller);
        assert_eq!(Some(ran_on), executor.worker_thread());
    }

    #[test]
    fn test_reentrant_submit_runs_inline() {
        let executor = Arc::new(Executor::new("reentrant", || {}));
        let inner = executor.clone();
        let (outer_id, inner_id, pending) = executor
            .submit(move || {
                let outer = thread::current().id();
                let (inner_id, pending) = inner
                    .submit({
                        let observed = inner.clone();
                        move || (thread::current().id(), observed.pending())
                    })
                    .unwrap();
                (outer, inner_id, pending)
            })
            .unwrap();
        assert_eq!(outer_id, inner_id);
        assert_eq!(pending, 0);
    }

    #[test]
    fn test_panic_is_resumed_on_caller_and_worker_survives() {
        let executor = Arc::new(Executor::new("panics", || {}));
        let failing = executor.clone();
        let outcome = thread::spawn(move || failing.submit(|| -> i32 { panic!("job failed") })).join();
        assert!(outcome.is_err());
        assert_eq!(executor.submit(|| 41 + 1), Some(42));
    }

    #[test]
    fn test_fifo_order_within_a_producer() {
        let executor = Executor::new("fifo", || {});
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..(QUEUE_CAPACITY * 3) {
            let log = log.clone();
            executor.submit(move || log.lock().push(i));
        }
        let order = log.lock().clone();
        assert_eq!(order, (0..QUEUE_CAPACITY * 3).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_producers_are_serialised() {
        let executor = Arc::new(Executor::new("serial", || {}));
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let executor = executor.clone();
                let active = active.clone();
                let overlaps = overlaps.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let active = active.clone();
                        let overlaps = overlaps.clone();
                        executor.submit(move || {
                            if active.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_submit_after_destroy_returns_none() {
        let executor = Executor::new("destroyed", || {});
        assert_eq!(executor.submit(|| 1), Some(1));
        executor.destroy();
        assert_eq!(executor.state(), State::Destroyed);
        assert_eq!(executor.submit(|| 2), None);
    }

    #[test]
    fn test_destroy_releases_queued_waiters() {
        let executor = Arc::new(Executor::new("release", || {}));
        let (unblock, blocked) = mpsc::channel::<()>();
        let (started_sender, started) = mpsc::channel::<()>();

        let first = {
            let executor = executor.clone();
            thread::spawn(move || {
                executor.submit(move || {
                    started_sender.send(()).unwrap();
                    blocked.recv().unwrap();
                    "first"
                })
            })
        };
        started.recv().unwrap();

        let second = {
            let executor = executor.clone();
            thread::spawn(move || executor.submit(|| "second"))
        };
        while executor.pending() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        let destroyer = {
            let executor = executor.clone();
            thread::spawn(move || executor.destroy())
        };
        while executor.state() != State::Destroyed {
            thread::sleep(Duration::from_millis(1));
        }
        unblock.send(()).unwrap();

        assert_eq!(first.join().unwrap(), Some("first"));
        assert_eq!(second.join().unwrap(), None);
        destroyer.join().unwrap();
    }
}
