//! Console logging for the binary and for anyone embedding the coordinator.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "rsevents_dispatcher=info";

/// Installs a global `tracing` subscriber printing one line per event, tagged with the id and name
/// of the emitting thread. `RUST_LOG` overrides the default filter.
///
/// Does nothing if a global subscriber is already installed.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .try_init();
}
