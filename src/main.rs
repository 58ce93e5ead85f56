use std::process::ExitCode;
use std::thread;

use rsevents_dispatcher::{telemetry, Coordinator, CoordinatorConfig, MainLoop};
use tracing::{error, info};

fn main() -> ExitCode {
    telemetry::init();
    info!(thread = ?thread::current().id(), "main thread");

    let main_loop = MainLoop::new();
    let coordinator = match Coordinator::builder(main_loop.clone())
        .config(CoordinatorConfig::default())
        .build()
    {
        Ok(coordinator) => coordinator,
        Err(err) => {
            error!(error = %err, "failed to build coordinator");
            return ExitCode::FAILURE;
        }
    };

    let result = coordinator.run();
    drop(coordinator);
    drop(main_loop);

    match result {
        Ok(report) => {
            info!(
                workers = report.workers.len(),
                elapsed = ?report.elapsed,
                "all workers finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "run failed");
            ExitCode::FAILURE
        }
    }
}
