use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use crossbeam_channel::Sender;

use crate::main_loop::{DispatchId, LoopInner, MainLoop};

/// A many-producer, single-consumer notification bound to a [`MainLoop`].
///
/// Any thread holding an [`Emitter`] may post to a `Dispatcher`; the handler registered with
/// [`Dispatcher::bind()`] then runs once per post, on the thread that owns the main loop and only
/// while that loop is [running](MainLoop::run()). Posts from a single thread are handled in the
/// order they were made. Posting never blocks, and posting to a loop that has stopped or been
/// dropped is not an error: the event is simply never handled.
///
/// Dropping the `Dispatcher` unregisters its handler; any of its events still queued are discarded.
pub struct Dispatcher {
    id: DispatchId,
    sender: Sender<DispatchId>,
    main_loop: Weak<LoopInner>,
}

/// The producer side of a [`Dispatcher`]. Cheap to clone, and may be sent to any thread.
#[derive(Clone)]
pub struct Emitter {
    id: DispatchId,
    sender: Sender<DispatchId>,
}

impl Dispatcher {
    /// Creates an unbound dispatcher delivering to `main_loop`.
    pub fn new(main_loop: &MainLoop) -> Self {
        let inner = main_loop.inner();

        Dispatcher {
            id: inner.allocate(),
            sender: inner.sender(),
            main_loop: main_loop.downgrade(),
        }
    }

    /// Registers the handler run for every event posted to this dispatcher.
    ///
    /// A dispatcher has exactly one consumer: panics if a handler is already bound. Events drained
    /// before a handler is bound are discarded, so bind before handing out emitters.
    pub fn bind<F>(&self, handler: F)
    where
        F: FnMut() + 'static,
    {
        let main_loop = match self.main_loop.upgrade() {
            Some(main_loop) => main_loop,
            None => return,
        };

        let handler: Box<dyn FnMut()> = Box::new(handler);
        let registered = main_loop.register(self.id, Rc::new(RefCell::new(handler)));
        assert!(registered, "Dispatcher::bind() called on an already bound dispatcher");
    }

    pub fn is_bound(&self) -> bool {
        self.main_loop
            .upgrade()
            .map_or(false, |main_loop| main_loop.is_registered(self.id))
    }

    /// Posts an event from the main loop thread itself.
    pub fn post(&self) {
        let _ = self.sender.send(self.id);
    }

    /// Returns a handle other threads can post through.
    pub fn emitter(&self) -> Emitter {
        Emitter {
            id: self.id,
            sender: self.sender.clone(),
        }
    }
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.id)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(main_loop) = self.main_loop.upgrade() {
            main_loop.unregister(self.id);
        }
    }
}

impl Emitter {
    /// Queues one event for the owning [`Dispatcher`]. Never blocks.
    pub fn post(&self) {
        // The only failure is a dropped main loop, after which nobody is left to notify.
        let _ = self.sender.send(self.id);
    }
}

impl Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter").field("id", &self.id).finish_non_exhaustive()
    }
}
