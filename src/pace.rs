use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::worker::WorkerId;

type DelayFn = dyn Fn(WorkerId, u32) -> Duration + Send + Sync;

/// How long a worker thread spends on each unit of simulated work before reporting progress.
#[derive(Clone)]
pub enum Pace {
    /// The same delay before every progress report.
    Fixed(Duration),
    /// A delay drawn uniformly from `min..=max` before every progress report. Given a `seed`, each
    /// worker draws from its own generator seeded with `seed + worker id`, so runs repeat exactly.
    Random {
        min: Duration,
        max: Duration,
        seed: Option<u64>,
    },
    /// The delay for `(worker, iteration)` as computed by the caller. Iterations count from 1.
    Custom(Arc<DelayFn>),
}

impl Pace {
    /// Random delays between 2 and 20 milliseconds, freshly seeded on every run.
    pub fn random() -> Self {
        Pace::Random {
            min: Duration::from_millis(2),
            max: Duration::from_millis(20),
            seed: None,
        }
    }

    pub fn custom<F>(delay: F) -> Self
    where
        F: Fn(WorkerId, u32) -> Duration + Send + Sync + 'static,
    {
        Pace::Custom(Arc::new(delay))
    }

    pub(crate) fn pacer(&self, worker: WorkerId) -> Pacer {
        let rng = match self {
            Pace::Random { seed: Some(seed), .. } => {
                StdRng::seed_from_u64(seed.wrapping_add(worker.get() as u64))
            }
            _ => StdRng::from_entropy(),
        };

        Pacer {
            pace: self.clone(),
            worker,
            iteration: 0,
            rng,
        }
    }
}

impl Default for Pace {
    fn default() -> Self {
        Pace::random()
    }
}

impl Debug for Pace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pace::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Pace::Random { min, max, seed } => f
                .debug_struct("Random")
                .field("min", min)
                .field("max", max)
                .field("seed", seed)
                .finish(),
            Pace::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// The per-thread delay source handed to a worker thread at launch.
pub(crate) struct Pacer {
    pace: Pace,
    worker: WorkerId,
    iteration: u32,
    rng: StdRng,
}

impl Pacer {
    pub(crate) fn next_delay(&mut self) -> Duration {
        self.iteration += 1;

        match &self.pace {
            Pace::Fixed(delay) => *delay,
            Pace::Random { min, max, .. } => {
                let (low, high) = (min.min(max), min.max(max));
                let micros = self.rng.gen_range(low.as_micros() as u64..=high.as_micros() as u64);
                Duration::from_micros(micros)
            }
            Pace::Custom(delay) => delay(self.worker, self.iteration),
        }
    }
}
