//! Test doubles shared by the unit tests.

use std::cell::RefCell;

use crate::observer::Observer;
use crate::worker::WorkerId;

/// A worker stack larger than any 64-bit address space, so spawning the thread fails.
pub(crate) const UNSATISFIABLE_STACK: usize = usize::MAX >> 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Launched(WorkerId),
    Progress(WorkerId, u32),
    Finished(WorkerId),
    Joined(WorkerId),
    Teardown { worker: WorkerId, thread_live: bool },
    Stopped,
}

/// An [`Observer`] that records every transition in order.
#[derive(Default)]
pub(crate) struct Recorder {
    events: RefCell<Vec<Event>>,
}

impl Recorder {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub(crate) fn events_for(&self, worker: WorkerId) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| match event {
                Event::Launched(id)
                | Event::Progress(id, _)
                | Event::Finished(id)
                | Event::Joined(id) => *id == worker,
                Event::Teardown { worker: id, .. } => *id == worker,
                Event::Stopped => false,
            })
            .collect()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events.borrow().iter().filter(|event| matches(event)).count()
    }

    fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

impl Observer for Recorder {
    fn launched(&self, worker: WorkerId) {
        self.record(Event::Launched(worker));
    }

    fn progress(&self, worker: WorkerId, count: u32) {
        self.record(Event::Progress(worker, count));
    }

    fn finished(&self, worker: WorkerId) {
        self.record(Event::Finished(worker));
    }

    fn joined(&self, worker: WorkerId) {
        self.record(Event::Joined(worker));
    }

    fn teardown(&self, worker: WorkerId, thread_live: bool) {
        self.record(Event::Teardown { worker, thread_live });
    }

    fn stopped(&self) {
        self.record(Event::Stopped);
    }
}
