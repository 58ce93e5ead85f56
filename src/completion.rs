use rsevents::{Awaitable, EventState, ManualResetEvent, TimeoutError};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Signals, to any thread, that every worker of a coordinated run has been joined.
///
/// The [`Coordinator`](crate::Coordinator) that owns it arms it with the number of workers at the
/// start of each run and records a join from the main loop every time it joins a worker thread.
/// The coordinator itself cannot leave the main loop thread; a `Completion` shared through an
/// [`Arc`](std::sync::Arc) can, so a watchdog or supervisor elsewhere can wait for the run to end.
///
/// ## Example:
///
/// ```rust
/// use rsevents_dispatcher::{Awaitable, Completion};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let completion = Arc::new(Completion::new(2));
/// let watchdog = {
///     let completion = completion.clone();
///     std::thread::spawn(move || completion.wait_for(Duration::from_secs(5)))
/// };
///
/// completion.tick();
/// completion.tick();
/// assert!(watchdog.join().unwrap());
/// ```
pub struct Completion {
    outstanding: AtomicUsize,
    done: ManualResetEvent,
}

const fn initial_state(workers: usize) -> EventState {
    match workers {
        0 => EventState::Set,
        _ => EventState::Unset,
    }
}

impl Completion {
    /// A completion waiting on `workers` joins; already done if there are none.
    pub const fn new(workers: usize) -> Self {
        Completion {
            outstanding: AtomicUsize::new(workers),
            done: ManualResetEvent::new(initial_state(workers)),
        }
    }

    /// Records one joined worker. The join that leaves nothing outstanding releases every waiter;
    /// joins past that point change nothing.
    pub fn tick(&self) {
        let joined = self
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| left.checked_sub(1));
        if let Ok(1) = joined {
            self.done.set();
        }
    }

    /// Starts waiting on `workers` joins for a new run. Called from the main loop thread before
    /// any worker of that run is launched, so no join can interleave with it.
    pub(crate) fn arm(&self, workers: usize) {
        self.outstanding.store(workers, Ordering::Relaxed);
        match initial_state(workers) {
            EventState::Set => self.done.set(),
            EventState::Unset => self.done.reset(),
        }
    }

    /// How many workers of the current run are still to be joined.
    pub fn remaining(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

// Waiting is entirely the event's business.
impl Awaitable<'_> for Completion {
    type T = ();
    type Error = TimeoutError;

    fn try_wait(&self) -> Result<(), Infallible> {
        self.done.try_wait()
    }

    fn try_wait_for(&self, limit: Duration) -> Result<(), TimeoutError> {
        self.done.try_wait_for(limit)
    }

    fn try_wait0(&self) -> Result<(), TimeoutError> {
        self.done.try_wait0()
    }
}

#[test]
fn last_join_releases_waiters() {
    let completion = Completion::new(2);
    completion.tick();
    assert_eq!(completion.wait0(), false);
    completion.tick();
    assert_eq!(completion.wait0(), true);
}

#[test]
fn joins_past_zero_are_ignored() {
    let completion = Completion::new(1);
    completion.tick();
    completion.tick();
    assert_eq!(completion.remaining(), 0);
    assert_eq!(completion.wait0(), true);
}

#[test]
fn rearm_for_next_run() {
    let completion = Completion::new(1);
    completion.tick();
    completion.arm(3);
    assert_eq!(completion.wait0(), false);
    assert_eq!(completion.remaining(), 3);
    completion.arm(0);
    assert_eq!(completion.wait0(), true);
}

#[test]
fn no_workers_means_done() {
    let completion = Completion::new(0);
    assert_eq!(completion.wait0(), true);
}

#[test]
fn watchdog_thread_sees_completion() {
    use std::thread;

    static COMPLETION: Completion = Completion::new(2);

    let watchdog = thread::spawn(|| COMPLETION.wait_for(Duration::from_secs(5)));
    thread::spawn(|| {
        COMPLETION.tick();
        COMPLETION.tick();
    })
    .join()
    .unwrap();

    assert!(watchdog.join().unwrap());
}
