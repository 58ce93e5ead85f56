use std::time::Duration;

use crate::error::{Error, Result};
use crate::pace::Pace;

/// When a [`Coordinator`](crate::Coordinator) launches its workers once its main loop is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchTrigger {
    /// As soon as the main loop first goes idle.
    Idle,
    /// After the main loop has been running for the given delay.
    After(Duration),
}

/// The shape of a coordinated run.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Number of workers, fixed for the lifetime of the coordinator.
    pub workers: usize,
    /// Progress events each worker reports before it is finished.
    pub iterations: u32,
    pub launch: LaunchTrigger,
    pub pace: Pace,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            workers: 4,
            iterations: 10,
            launch: LaunchTrigger::After(Duration::from_secs(3)),
            pace: Pace::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_launch(mut self, launch: LaunchTrigger) -> Self {
        self.launch = launch;
        self
    }

    pub fn with_pace(mut self, pace: Pace) -> Self {
        self.pace = pace;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidConfig("iterations must be greater than zero".to_owned()));
        }

        if let Pace::Random { min, max, .. } = &self.pace {
            if min > max {
                return Err(Error::InvalidConfig(format!(
                    "random pace minimum {:?} exceeds maximum {:?}",
                    min, max
                )));
            }
        }

        Ok(())
    }
}
