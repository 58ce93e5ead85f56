use std::cell::Cell;
use std::fmt::{self, Display};
use std::panic::resume_unwind;
use std::rc::Rc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, Emitter};
use crate::error::{Error, Result};
use crate::main_loop::MainLoop;
use crate::observer::Observer;
use crate::pace::Pace;

/// The stable identity of a worker, assigned at construction. Coordinators number their workers
/// from 1, in launch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(usize);

impl WorkerId {
    pub const fn new(id: usize) -> Self {
        WorkerId(id)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Dispatchers are wired up; no thread exists yet.
    Created,
    /// The thread is running and reporting progress.
    Running,
    /// Progress reached the target and the finished notification was posted. The thread may still
    /// be winding down.
    Finished,
    /// The thread has been joined. The worker may be launched again.
    Joined,
}

/// Everything a worker needs at construction.
pub struct WorkerContext<'a> {
    pub main_loop: &'a MainLoop,
    pub id: WorkerId,
    pub iterations: u32,
    pub pace: &'a Pace,
    pub observer: &'a Rc<dyn Observer>,
}

/// Progress as seen from the main loop thread. The worker thread never touches it: it only posts
/// to the increment dispatcher, whose handler is the sole writer.
struct Progress {
    id: WorkerId,
    target: u32,
    count: Cell<u32>,
    state: Cell<WorkerState>,
    finished: Emitter,
    observer: Rc<dyn Observer>,
}

impl Progress {
    fn increment(&self) {
        let state = self.state.get();
        if state != WorkerState::Running {
            warn!(
                worker = %self.id,
                ?state,
                "ignoring progress event for a worker that is not running"
            );
            return;
        }

        let count = self.count.get() + 1;
        self.count.set(count);
        info!(worker = %self.id, progress = count, target = self.target, "progress received");
        self.observer.progress(self.id, count);

        if count == self.target {
            self.state.set(WorkerState::Finished);
            self.finished.post();
        }
    }

    /// The worker thread panicked before reaching the target. Treat it as finished so the owner
    /// joins the thread and gets the panic back.
    fn abandon(&self) {
        let state = self.state.get();
        if state != WorkerState::Running {
            return;
        }

        error!(worker = %self.id, progress = self.count.get(), "worker thread panicked");
        self.state.set(WorkerState::Finished);
        self.finished.post();
    }
}

/// Posts to the panic dispatcher if dropped while the worker thread unwinds.
struct PanicNotice(Emitter);

impl Drop for PanicNotice {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.post();
        }
    }
}

/// A unit of simulated work running on its own thread, reporting progress to the main loop.
///
/// The worker thread sleeps for a [`Pace`]-determined delay, posts a progress event, and repeats
/// until it has posted `iterations` events. Each event is counted on the main loop thread, and the
/// event that brings the count to the target posts the worker's finished notification, which is
/// delivered to the handler registered through [`Worker::on_finished()`]. The owner must then
/// [`join`](Worker::join()) the worker.
///
/// A `Worker` must not be dropped while it owns a running thread: doing so panics.
pub struct Worker {
    id: WorkerId,
    pace: Pace,
    progress: Rc<Progress>,
    observer: Rc<dyn Observer>,
    increment: Dispatcher,
    panicked: Dispatcher,
    finished: Dispatcher,
    stack_size: Option<usize>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(context: &WorkerContext<'_>) -> Result<Self> {
        if context.iterations == 0 {
            return Err(Error::Construction {
                worker: context.id,
                reason: "a worker needs at least one iteration".to_owned(),
            });
        }

        let increment = Dispatcher::new(context.main_loop);
        let finished = Dispatcher::new(context.main_loop);
        let progress = Rc::new(Progress {
            id: context.id,
            target: context.iterations,
            count: Cell::new(0),
            state: Cell::new(WorkerState::Created),
            finished: finished.emitter(),
            observer: context.observer.clone(),
        });

        let handler = progress.clone();
        increment.bind(move || handler.increment());
        let panicked = Dispatcher::new(context.main_loop);
        let handler = progress.clone();
        panicked.bind(move || handler.abandon());

        Ok(Worker {
            id: context.id,
            pace: context.pace.clone(),
            progress,
            observer: context.observer.clone(),
            increment,
            panicked,
            finished,
            stack_size: None,
            thread: None,
        })
    }

    /// Spawns the worker thread with a stack of `size` bytes instead of the platform default.
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Registers the single handler notified, on the main loop thread, once this worker reaches its
    /// target. Panics if a handler is already registered.
    pub fn on_finished<F>(&self, handler: F)
    where
        F: FnMut() + 'static,
    {
        self.finished.bind(handler);
    }

    /// Spawns the worker thread.
    ///
    /// Panics if the worker is already running or has finished without being joined.
    pub fn launch(&mut self) -> Result<()> {
        let state = self.progress.state.get();
        assert!(
            matches!(state, WorkerState::Created | WorkerState::Joined),
            "Worker::launch() called on worker {} in state {:?}",
            self.id,
            state
        );
        debug_assert!(self.thread.is_none());

        let id = self.id;
        let iterations = self.progress.target;
        let emitter = self.increment.emitter();
        let notice = PanicNotice(self.panicked.emitter());
        let mut pacer = self.pace.pacer(id);

        let mut builder = thread::Builder::new().name(format!("worker-{}", id));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        let handle = builder
            .spawn(move || {
                let _notice = notice;
                for i in 1..=iterations {
                    thread::sleep(pacer.next_delay());
                    debug!(worker = %id, progress = i, "progress emitted");
                    emitter.post();
                }
            })
            .map_err(|source| Error::Spawn { worker: id, source })?;

        info!(worker = %id, thread = ?handle.thread().id(), "worker thread created");
        self.thread = Some(handle);
        self.progress.count.set(0);
        self.progress.state.set(WorkerState::Running);
        self.observer.launched(id);

        Ok(())
    }

    /// Blocks until the worker thread exits, then releases it.
    ///
    /// Panics unless the worker has finished, and re-raises the worker thread's panic if it had
    /// one. A worker whose thread panicked is reported finished early, with its progress short of
    /// the target.
    pub fn join(&mut self) {
        let state = self.progress.state.get();
        assert!(
            state == WorkerState::Finished,
            "Worker::join() called on worker {} in state {:?}, before it finished",
            self.id,
            state
        );

        if let Some(handle) = self.thread.take() {
            if let Err(panic) = handle.join() {
                resume_unwind(panic);
            }
        }

        self.progress.state.set(WorkerState::Joined);
        info!(worker = %self.id, "worker thread joined");
        self.observer.joined(self.id);
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn progress(&self) -> u32 {
        self.progress.count.get()
    }

    pub fn target(&self) -> u32 {
        self.progress.target
    }

    pub fn state(&self) -> WorkerState {
        self.progress.state.get()
    }

    /// Whether progress has yet to reach the target.
    pub fn is_unfinished(&self) -> bool {
        self.progress() < self.target()
    }

    /// Whether the worker was launched and has not been joined since.
    pub fn is_outstanding(&self) -> bool {
        matches!(self.state(), WorkerState::Running | WorkerState::Finished)
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("progress", &self.progress())
            .field("target", &self.target())
            .finish_non_exhaustive()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let thread_live = self.thread.is_some();
        self.observer.teardown(self.id, thread_live);

        if thread_live {
            // Panicking again while unwinding would abort the process.
            if thread::panicking() {
                error!(
                    worker = %self.id,
                    "worker dropped during a panic while its thread is still running"
                );
            } else {
                panic!("worker {} dropped while its thread is still running", self.id);
            }
        }
    }
}
