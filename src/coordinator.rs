use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::completion::Completion;
use crate::config::{CoordinatorConfig, LaunchTrigger};
use crate::error::{Error, Result};
use crate::main_loop::MainLoop;
use crate::observer::Observer;
use crate::worker::{Worker, WorkerContext, WorkerId, WorkerState};

/// Owns a fixed set of [`Worker`]s and drives them through one run of a [`MainLoop`].
///
/// Workers are all constructed up front, with their finished notifications wired to the
/// coordinator, before any thread exists. [`Coordinator::run()`] schedules the launch of every
/// worker according to the configured [`LaunchTrigger`] and then runs the main loop. Each time a
/// worker's finished notification arrives the coordinator joins that worker's thread on the spot,
/// and once no launched worker is left unjoined it stops the loop. All of this happens on the main
/// loop thread, so the bookkeeping needs no locking.
///
/// ## Example:
///
/// ```rust
/// use rsevents_dispatcher::{Coordinator, CoordinatorConfig, LaunchTrigger, MainLoop, Pace};
/// use std::time::Duration;
///
/// let main_loop = MainLoop::new();
/// let coordinator = Coordinator::builder(main_loop.clone())
///     .config(CoordinatorConfig::default()
///         .with_launch(LaunchTrigger::Idle)
///         .with_pace(Pace::Fixed(Duration::from_millis(1))))
///     .build()
///     .unwrap();
///
/// let report = coordinator.run().unwrap();
/// assert!(report.all_joined());
/// ```
pub struct Coordinator {
    inner: Rc<Inner>,
}

struct Inner {
    main_loop: MainLoop,
    workers: Vec<RefCell<Worker>>,
    launch: LaunchTrigger,
    observer: Rc<dyn Observer>,
    completion: Arc<Completion>,
    failure: RefCell<Option<Error>>,
}

pub struct CoordinatorBuilder {
    main_loop: MainLoop,
    config: CoordinatorConfig,
    observer: Rc<dyn Observer>,
}

/// The state of every worker when a run ended.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workers: Vec<WorkerReport>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: WorkerId,
    pub progress: u32,
    pub target: u32,
    pub state: WorkerState,
}

impl RunReport {
    /// Whether every worker reached its target and was joined.
    pub fn all_joined(&self) -> bool {
        self.workers
            .iter()
            .all(|worker| worker.state == WorkerState::Joined && worker.progress == worker.target)
    }
}

impl CoordinatorBuilder {
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Rc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> Result<Coordinator> {
        self.build_with(Worker::new)
    }

    /// Builds the coordinator, constructing each worker with `factory`.
    ///
    /// Workers are constructed in id order. If one fails, the workers already constructed are
    /// dropped before the error is returned; none of them has a thread at that point. The factory
    /// must not register a finished handler on the workers it returns.
    pub fn build_with<F>(self, mut factory: F) -> Result<Coordinator>
    where
        F: FnMut(&WorkerContext<'_>) -> Result<Worker>,
    {
        self.config.validate()?;

        let mut workers = Vec::with_capacity(self.config.workers);
        for index in 0..self.config.workers {
            let context = WorkerContext {
                main_loop: &self.main_loop,
                id: WorkerId::new(index + 1),
                iterations: self.config.iterations,
                pace: &self.config.pace,
                observer: &self.observer,
            };

            match factory(&context) {
                Ok(worker) => workers.push(RefCell::new(worker)),
                Err(err) => {
                    warn!(
                        worker = %context.id,
                        constructed = workers.len(),
                        error = %err,
                        "worker construction failed, dropping constructed workers"
                    );
                    drop(workers);
                    return Err(err);
                }
            }
        }

        let inner = Rc::new(Inner {
            completion: Arc::new(Completion::new(workers.len())),
            main_loop: self.main_loop,
            workers,
            launch: self.config.launch,
            observer: self.observer,
            failure: RefCell::new(None),
        });

        for (index, worker) in inner.workers.iter().enumerate() {
            let coordinator = Rc::downgrade(&inner);
            worker.borrow().on_finished(move || {
                if let Some(coordinator) = coordinator.upgrade() {
                    coordinator.on_worker_finished(index);
                }
            });
        }

        Ok(Coordinator { inner })
    }
}

impl Coordinator {
    pub fn builder(main_loop: MainLoop) -> CoordinatorBuilder {
        CoordinatorBuilder {
            main_loop,
            config: CoordinatorConfig::default(),
            observer: Rc::new(()),
        }
    }

    /// Launches every worker once the launch trigger fires, and runs the main loop until every
    /// launched worker has been joined.
    ///
    /// If a worker thread fails to spawn, no further workers are launched; the loop still runs
    /// until the workers already launched are joined, and the spawn error is returned.
    pub fn run(&self) -> Result<RunReport> {
        let inner = &self.inner;
        inner.completion.arm(inner.workers.len());
        let started = Instant::now();

        let coordinator = Rc::downgrade(inner);
        let launch = move || {
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.launch_all();
            }
        };
        match inner.launch {
            LaunchTrigger::Idle => inner.main_loop.schedule_idle(launch),
            LaunchTrigger::After(delay) => inner.main_loop.schedule_once(delay, launch),
        }

        info!(workers = inner.workers.len(), launch = ?inner.launch, "coordinator running");
        inner.main_loop.run();
        inner.observer.stopped();

        let report = self.report(started.elapsed());
        info!(elapsed = ?report.elapsed, "coordinator stopped");

        let failure = inner.failure.borrow_mut().take();
        match failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// A completion other threads can wait on; set once every worker of the current run is joined.
    pub fn completion(&self) -> Arc<Completion> {
        self.inner.completion.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.workers.is_empty()
    }

    fn report(&self, elapsed: Duration) -> RunReport {
        let workers = self
            .inner
            .workers
            .iter()
            .map(|worker| {
                let worker = worker.borrow();
                WorkerReport {
                    id: worker.id(),
                    progress: worker.progress(),
                    target: worker.target(),
                    state: worker.state(),
                }
            })
            .collect();

        RunReport { workers, elapsed }
    }
}

impl Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("workers", &self.inner.workers)
            .field("launch", &self.inner.launch)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn launch_all(&self) {
        info!(workers = self.workers.len(), "launching worker threads");

        for (launched, worker) in self.workers.iter().enumerate() {
            if let Err(err) = worker.borrow_mut().launch() {
                error!(
                    error = %err,
                    launched,
                    "worker launch failed, waiting for launched workers"
                );
                self.completion.arm(launched);
                *self.failure.borrow_mut() = Some(err);
                break;
            }
        }

        self.quit_if_done();
    }

    fn on_worker_finished(&self, index: usize) {
        let mut worker = self.workers[index].borrow_mut();
        let id = worker.id();
        self.observer.finished(id);
        worker.join();
        info!(worker = %id, "worker finished");
        drop(worker);

        self.completion.tick();
        self.quit_if_done();
    }

    /// Stops the loop once no launched worker is left unjoined. A worker whose finished
    /// notification is still queued counts as outstanding.
    fn quit_if_done(&self) {
        let outstanding = self
            .workers
            .iter()
            .filter(|worker| worker.borrow().is_outstanding())
            .count();

        if outstanding == 0 {
            info!("all workers joined, stopping main loop");
            self.main_loop.quit();
        } else {
            debug!(outstanding, "workers still outstanding");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for worker in &self.workers {
            if let Ok(worker) = worker.try_borrow() {
                if worker.is_outstanding() {
                    warn!(
                        worker = %worker.id(),
                        state = ?worker.state(),
                        "coordinator dropped before joining worker"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::Coordinator;
    use crate::testing::{Event, Recorder, UNSATISFIABLE_STACK};
    use crate::worker::{Worker, WorkerContext, WorkerId, WorkerState};
    use crate::{Awaitable, CoordinatorConfig, Error, LaunchTrigger, MainLoop, Observer, Pace};
    use std::rc::Rc;
    use std::thread;
    use std::time::Duration;

    const TARGET: u32 = 10;

    fn config(workers: usize, seed: u64) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_workers(workers)
            .with_iterations(TARGET)
            .with_launch(LaunchTrigger::Idle)
            .with_pace(Pace::Random {
                min: Duration::from_micros(100),
                max: Duration::from_millis(2),
                seed: Some(seed),
            })
    }

    fn coordinator(workers: usize, recorder: &Rc<Recorder>) -> Coordinator {
        let observer: Rc<dyn Observer> = recorder.clone();
        Coordinator::builder(MainLoop::new())
            .config(config(workers, 7))
            .observer(observer)
            .build()
            .unwrap()
    }

    fn expected_lifecycle(worker: WorkerId) -> Vec<Event> {
        let mut events = vec![Event::Launched(worker)];
        events.extend((1..=TARGET).map(|count| Event::Progress(worker, count)));
        events.push(Event::Finished(worker));
        events.push(Event::Joined(worker));
        events
    }

    #[test]
    fn single_worker() {
        let recorder = Rc::new(Recorder::default());
        let coordinator = coordinator(1, &recorder);

        let report = coordinator.run().unwrap();
        assert!(report.all_joined());

        let mut expected = expected_lifecycle(WorkerId::new(1));
        expected.push(Event::Stopped);
        assert_eq!(recorder.events(), expected);
    }

    #[test]
    fn four_workers() {
        let recorder = Rc::new(Recorder::default());
        let coordinator = coordinator(4, &recorder);

        let report = coordinator.run().unwrap();
        assert!(report.all_joined());
        assert_eq!(report.workers.len(), 4);

        assert_eq!(recorder.count(|event| matches!(event, Event::Progress(..))), 40);
        assert_eq!(recorder.count(|event| matches!(event, Event::Finished(_))), 4);
        assert_eq!(recorder.count(|event| matches!(event, Event::Joined(_))), 4);
        assert_eq!(recorder.count(|event| *event == Event::Stopped), 1);

        // The loop stops only after the last join.
        let events = recorder.events();
        assert_eq!(events.last(), Some(&Event::Stopped));
        assert!(matches!(events[events.len() - 2], Event::Joined(_)));

        for id in 1..=4 {
            let worker = WorkerId::new(id);
            assert_eq!(recorder.events_for(worker), expected_lifecycle(worker));
        }
    }

    #[test]
    fn outcome_does_not_depend_on_interleaving() {
        for seed in 0..5 {
            let recorder = Rc::new(Recorder::default());
            let observer: Rc<dyn Observer> = recorder.clone();
            let coordinator = Coordinator::builder(MainLoop::new())
                .config(config(4, seed))
                .observer(observer)
                .build()
                .unwrap();

            let report = coordinator.run().unwrap();
            assert!(report.all_joined(), "seed {}: {:?}", seed, report);
            for worker in &report.workers {
                assert_eq!(worker.progress, TARGET);
            }
        }
    }

    #[test]
    fn construction_failure_rolls_back() {
        let recorder = Rc::new(Recorder::default());
        let observer: Rc<dyn Observer> = recorder.clone();

        let result = Coordinator::builder(MainLoop::new())
            .config(config(4, 7))
            .observer(observer)
            .build_with(|context: &WorkerContext<'_>| {
                if context.id == WorkerId::new(3) {
                    return Err(Error::Construction {
                        worker: context.id,
                        reason: "injected".to_owned(),
                    });
                }
                Worker::new(context)
            });

        match result {
            Err(Error::Construction { worker, .. }) => assert_eq!(worker, WorkerId::new(3)),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(
            recorder.events(),
            vec![
                Event::Teardown { worker: WorkerId::new(1), thread_live: false },
                Event::Teardown { worker: WorkerId::new(2), thread_live: false },
            ]
        );
    }

    #[test]
    fn spawn_failure_waits_for_launched_workers() {
        let recorder = Rc::new(Recorder::default());
        let observer: Rc<dyn Observer> = recorder.clone();
        let coordinator = Coordinator::builder(MainLoop::new())
            .config(config(4, 7))
            .observer(observer)
            .build_with(|context: &WorkerContext<'_>| {
                let worker = Worker::new(context)?;
                if context.id == WorkerId::new(3) {
                    return Ok(worker.with_stack_size(UNSATISFIABLE_STACK));
                }
                Ok(worker)
            })
            .unwrap();

        match coordinator.run() {
            Err(Error::Spawn { worker, .. }) => assert_eq!(worker, WorkerId::new(3)),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(coordinator.completion().remaining(), 0);
        assert!(coordinator.completion().wait0());

        for id in 1..=2 {
            let worker = WorkerId::new(id);
            assert_eq!(recorder.events_for(worker), expected_lifecycle(worker));
        }
        for id in 3..=4 {
            assert!(recorder.events_for(WorkerId::new(id)).is_empty());
        }
        assert_eq!(recorder.events().last(), Some(&Event::Stopped));

        drop(coordinator);
        assert_eq!(recorder.count(|event| matches!(event, Event::Teardown { .. })), 4);
        assert_eq!(
            recorder.count(|event| matches!(event, Event::Teardown { thread_live: true, .. })),
            0
        );
    }

    #[test]
    #[should_panic(expected = "simulated work failed")]
    fn worker_panic_reaches_run() {
        let pace = Pace::custom(|worker, iteration| {
            if worker == WorkerId::new(1) && iteration == 3 {
                panic!("simulated work failed");
            }
            Duration::from_millis(1)
        });
        let coordinator = Coordinator::builder(MainLoop::new())
            .config(config(2, 7).with_pace(pace))
            .build()
            .unwrap();

        let _ = coordinator.run();
    }

    #[test]
    fn invalid_config() {
        let result = Coordinator::builder(MainLoop::new())
            .config(config(4, 7).with_iterations(0))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn teardown_after_run() {
        let recorder = Rc::new(Recorder::default());
        let coordinator = coordinator(4, &recorder);
        coordinator.run().unwrap();
        drop(coordinator);

        assert_eq!(recorder.count(|event| matches!(event, Event::Teardown { .. })), 4);
        assert_eq!(
            recorder.count(|event| matches!(event, Event::Teardown { thread_live: true, .. })),
            0
        );
    }

    #[test]
    fn no_workers() {
        let coordinator = Coordinator::builder(MainLoop::new())
            .config(config(0, 7))
            .build()
            .unwrap();

        assert!(coordinator.is_empty());
        let report = coordinator.run().unwrap();
        assert!(report.workers.is_empty());
        assert!(coordinator.completion().wait0());
    }

    #[test]
    fn delayed_launch() {
        let recorder = Rc::new(Recorder::default());
        let observer: Rc<dyn Observer> = recorder.clone();
        let coordinator = Coordinator::builder(MainLoop::new())
            .config(config(2, 7).with_launch(LaunchTrigger::After(Duration::from_millis(30))))
            .observer(observer)
            .build()
            .unwrap();

        let report = coordinator.run().unwrap();
        assert!(report.all_joined());
        assert!(report.elapsed >= Duration::from_millis(30));
    }

    #[test]
    fn completion_seen_from_another_thread() {
        let recorder = Rc::new(Recorder::default());
        let coordinator = coordinator(3, &recorder);
        let completion = coordinator.completion();
        assert_eq!(completion.wait0(), false);

        let watchdog = thread::spawn(move || completion.wait_for(Duration::from_secs(30)));
        coordinator.run().unwrap();

        assert!(watchdog.join().unwrap());
        assert_eq!(coordinator.completion().remaining(), 0);
    }

    #[test]
    fn run_twice() {
        let recorder = Rc::new(Recorder::default());
        let coordinator = coordinator(2, &recorder);

        assert!(coordinator.run().unwrap().all_joined());
        let report = coordinator.run().unwrap();
        assert!(report.all_joined());
        assert!(report.workers.iter().all(|worker| worker.state == WorkerState::Joined));
        assert_eq!(recorder.count(|event| *event == Event::Stopped), 2);
    }
}
