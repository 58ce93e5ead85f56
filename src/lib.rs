//! Cross-thread progress reporting for worker threads driven from a single-threaded main loop.
//!
//! Worker threads never touch shared state. They post events through a [`Dispatcher`], and the
//! thread running the [`MainLoop`] handles those events one at a time. A [`Coordinator`] owns a
//! fixed set of [`Worker`]s, launches them, joins each one as soon as its finished notification
//! arrives, and stops the loop when the last one has been joined.

mod completion;
mod config;
mod coordinator;
mod dispatcher;
mod error;
mod main_loop;
mod observer;
mod pace;
pub mod telemetry;
mod worker;

#[cfg(test)]
mod testing;

pub use self::completion::Completion;
pub use self::config::{CoordinatorConfig, LaunchTrigger};
pub use self::coordinator::{Coordinator, CoordinatorBuilder, RunReport, WorkerReport};
pub use self::dispatcher::{Dispatcher, Emitter};
pub use self::error::{Error, Result};
pub use self::main_loop::MainLoop;
pub use self::observer::Observer;
pub use self::pace::Pace;
pub use self::worker::{Worker, WorkerContext, WorkerId, WorkerState};

/// The `rsevents` abstraction over all types that can be awaited, implemented by [`Completion`].
///
pub use rsevents::Awaitable;
/// The default `rsevents` error for `Awaitable` implementations in this crate, returned when a
/// bounded wait times out.
///
pub use rsevents::TimeoutError;
