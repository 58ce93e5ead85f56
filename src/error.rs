use std::io;

use thiserror::Error;

use crate::worker::WorkerId;

/// Recoverable failures while building or launching a set of workers.
///
/// Misuse of the worker lifecycle (launching twice, joining early, dropping a worker whose thread
/// is still running) is a bug in the caller and panics instead of surfacing here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to construct worker {worker}: {reason}")]
    Construction { worker: WorkerId, reason: String },

    #[error("failed to spawn the thread for worker {worker}")]
    Spawn {
        worker: WorkerId,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
