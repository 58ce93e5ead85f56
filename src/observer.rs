use crate::worker::WorkerId;

/// Hooks into every worker lifecycle transition.
///
/// All methods run on the main loop thread, in the order the transitions happen. Every method
/// defaults to doing nothing; `()` is the observer that ignores everything.
pub trait Observer {
    /// A worker thread was spawned.
    fn launched(&self, _worker: WorkerId) {}

    /// A progress event was handled, bringing the worker's progress to `count`.
    fn progress(&self, _worker: WorkerId, _count: u32) {}

    /// The coordinator received the worker's finished notification.
    fn finished(&self, _worker: WorkerId) {}

    /// The worker's thread was joined.
    fn joined(&self, _worker: WorkerId) {}

    /// The worker is being dropped. `thread_live` is true if it still owns a thread handle, which
    /// is a bug in whoever dropped it.
    fn teardown(&self, _worker: WorkerId, _thread_live: bool) {}

    /// The coordinator's main loop returned.
    fn stopped(&self) {}
}

impl Observer for () {}
