use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, trace};

pub(crate) type DispatchId = u64;
pub(crate) type Handler = Rc<RefCell<Box<dyn FnMut()>>>;

/// A single-threaded, run-to-completion event loop.
///
/// A `MainLoop` belongs to the thread that created it: it is neither `Send` nor `Sync`, so every
/// callback it runs (timers, idle callbacks and [`Dispatcher`](crate::Dispatcher) handlers) runs
/// on that one thread, one at a time, and only from within [`MainLoop::run()`]. Other threads talk
/// to the loop exclusively through [`Emitter`](crate::Emitter)s.
///
/// `MainLoop` is a cheap handle. Clones share the same loop, which is how a
/// [`Coordinator`](crate::Coordinator) gets to stop a loop it does not own.
///
/// ## Example:
///
/// ```rust
/// use rsevents_dispatcher::{Dispatcher, MainLoop};
/// use std::time::Duration;
///
/// let main_loop = MainLoop::new();
/// let dispatcher = Dispatcher::new(&main_loop);
/// let quit = main_loop.clone();
/// dispatcher.bind(move || quit.quit());
///
/// let emitter = dispatcher.emitter();
/// main_loop.schedule_once(Duration::from_millis(5), move || {
///     std::thread::spawn(move || emitter.post());
/// });
///
/// main_loop.run();
/// ```
#[derive(Clone)]
pub struct MainLoop {
    inner: Rc<LoopInner>,
}

pub(crate) struct LoopInner {
    sender: Sender<DispatchId>,
    receiver: Receiver<DispatchId>,
    handlers: RefCell<HashMap<DispatchId, Handler>>,
    next_dispatch: Cell<DispatchId>,
    timers: RefCell<BinaryHeap<Timer>>,
    next_timer: Cell<u64>,
    idle: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    running: Cell<bool>,
    quit: Cell<bool>,
}

struct Timer {
    deadline: Instant,
    seq: u64,
    callback: Box<dyn FnOnce()>,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // `BinaryHeap` is a max-heap: the earliest deadline (then the earliest scheduled) is greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct RunningGuard<'a>(&'a LoopInner);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.running.set(false);
    }
}

impl MainLoop {
    /// Creates a new, idle main loop owned by the calling thread.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();

        MainLoop {
            inner: Rc::new(LoopInner {
                sender,
                receiver,
                handlers: RefCell::new(HashMap::new()),
                next_dispatch: Cell::new(0),
                timers: RefCell::new(BinaryHeap::new()),
                next_timer: Cell::new(0),
                idle: RefCell::new(VecDeque::new()),
                running: Cell::new(false),
                quit: Cell::new(false),
            }),
        }
    }

    /// Pumps the loop until [`MainLoop::quit()`] is called from one of its callbacks.
    ///
    /// Each iteration fires the timers that are due, or else dispatches a single posted event, or
    /// else runs a single idle callback, or else sleeps until an event is posted or the next timer
    /// is due. Events still queued when the loop stops are discarded.
    ///
    /// Panics if called while the loop is already running.
    pub fn run(&self) {
        let inner = &*self.inner;
        assert!(
            !inner.running.replace(true),
            "MainLoop::run() called while the loop is already running"
        );
        let _running = RunningGuard(inner);
        inner.quit.set(false);
        debug!("main loop running");

        while !inner.quit.get() {
            if inner.fire_due_timers() {
                continue;
            }

            if let Ok(id) = inner.receiver.try_recv() {
                inner.dispatch(id);
                continue;
            }

            let idle = inner.idle.borrow_mut().pop_front();
            if let Some(callback) = idle {
                callback();
                continue;
            }

            inner.wait();
        }

        let discarded = inner.receiver.try_iter().count();
        if discarded > 0 {
            debug!(discarded, "discarding events posted after quit");
        }
        debug!("main loop stopped");
    }

    /// Asks a running loop to stop once the current callback returns. Has no effect on a loop that
    /// is not running.
    pub fn quit(&self) {
        if self.inner.running.get() {
            self.inner.quit.set(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Runs `callback` once on the loop thread, no earlier than `delay` from now.
    pub fn schedule_once<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() + 'static,
    {
        let seq = self.inner.next_timer.get();
        self.inner.next_timer.set(seq + 1);
        self.inner.timers.borrow_mut().push(Timer {
            deadline: Instant::now() + delay,
            seq,
            callback: Box::new(callback),
        });
    }

    /// Runs `callback` once on the loop thread, the next time the loop has no event to dispatch
    /// and no timer due.
    pub fn schedule_idle<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner.idle.borrow_mut().push_back(Box::new(callback));
    }

    pub(crate) fn inner(&self) -> &LoopInner {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<LoopInner> {
        Rc::downgrade(&self.inner)
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopInner {
    pub(crate) fn allocate(&self) -> DispatchId {
        let id = self.next_dispatch.get();
        self.next_dispatch.set(id + 1);
        id
    }

    pub(crate) fn sender(&self) -> Sender<DispatchId> {
        self.sender.clone()
    }

    /// Returns `false` if a handler was already registered under `id`.
    pub(crate) fn register(&self, id: DispatchId, handler: Handler) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        if handlers.contains_key(&id) {
            return false;
        }
        handlers.insert(id, handler);
        true
    }

    pub(crate) fn unregister(&self, id: DispatchId) {
        self.handlers.borrow_mut().remove(&id);
    }

    pub(crate) fn is_registered(&self, id: DispatchId) -> bool {
        self.handlers.borrow().contains_key(&id)
    }

    fn dispatch(&self, id: DispatchId) {
        // Release the map before calling out: a handler may drop its own dispatcher.
        let handler = self.handlers.borrow().get(&id).cloned();
        match handler {
            Some(handler) => {
                let mut handler = handler.borrow_mut();
                (&mut *handler)();
            }
            None => trace!(dispatcher = id, "discarding event for an unbound dispatcher"),
        }
    }

    fn fire_due_timers(&self) -> bool {
        let now = Instant::now();
        let mut fired = false;

        loop {
            let timer = {
                let mut timers = self.timers.borrow_mut();
                let due = timers.peek().map_or(false, |timer| timer.deadline <= now);
                if due {
                    timers.pop()
                } else {
                    None
                }
            };

            match timer {
                Some(timer) => {
                    fired = true;
                    (timer.callback)();
                    if self.quit.get() {
                        break;
                    }
                }
                None => break,
            }
        }

        fired
    }

    fn wait(&self) {
        let deadline = self.timers.borrow().peek().map(|timer| timer.deadline);
        // The loop holds a sender of its own, so the channel never disconnects.
        let received = match deadline {
            Some(deadline) => self.receiver.recv_deadline(deadline).ok(),
            None => self.receiver.recv().ok(),
        };

        if let Some(id) = received {
            self.dispatch(id);
        }
    }
}
