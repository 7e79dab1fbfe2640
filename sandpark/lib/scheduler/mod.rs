//! Periodic probing task driver.
//!
//! On every tick the scheduler snapshots the open sessions, reaps the
//! expired ones, and fans the configured tasks out across every live
//! instance through a bounded worker pool. Task results are never awaited by
//! the tick; failures are logged and swallowed, and probes dropped under
//! load are simply retried next tick.

pub mod task;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use regex::Regex;
use tokio::{
    sync::Semaphore,
    time::{self, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    config::{SCHEDULER_DRAIN_TIMEOUT, SCHEDULER_TICK_INTERVAL},
    core::Core,
    types::{Instance, Playground, Session},
    SandparkError,
};

use task::Task;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Drives the probing [`Task`]s over live instances and reaps expired
/// sessions.
pub struct Scheduler {
    core: Arc<Core>,
    tasks: Vec<Arc<dyn Task>>,
    tick: std::time::Duration,
    pool: Arc<Semaphore>,

    /// `(task, instance)` pairs currently running; a pair launches at most
    /// once concurrently.
    inflight: Arc<DashMap<String, ()>>,

    /// Compiled per-playground task allow-patterns.
    patterns: DashMap<String, Regex>,

    cancel: CancellationToken,
    tracker: TaskTracker,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Scheduler {
    /// Creates a scheduler over `tasks` at the default tick interval.
    pub fn new(core: Arc<Core>, tasks: Vec<Arc<dyn Task>>) -> Self {
        Self::with_tick(core, tasks, SCHEDULER_TICK_INTERVAL)
    }

    /// Creates a scheduler ticking at `tick`.
    pub fn with_tick(
        core: Arc<Core>,
        tasks: Vec<Arc<dyn Task>>,
        tick: std::time::Duration,
    ) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .max(4);

        Self {
            core,
            tasks,
            tick,
            pool: Arc::new(Semaphore::new(workers)),
            inflight: Arc::new(DashMap::new()),
            patterns: DashMap::new(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Starts the tick loop.
    pub fn start(self: Arc<Self>) {
        tracing::info!(tasks = self.tasks.len(), "scheduler started");

        let tracker = self.tracker.clone();
        tracker.spawn(async move {
            let mut interval = time::interval(self.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                self.tick_once().await;
            }
        });
    }

    /// Cancels in-flight work and waits for the drain, bounded.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();

        if time::timeout(SCHEDULER_DRAIN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!("scheduler drain timed out");
        } else {
            tracing::info!("scheduler drained");
        }
    }

    /// One scheduling pass: reap expired sessions, then fan tasks out over
    /// every live instance.
    pub async fn tick_once(&self) {
        let sessions = match self.core.storage().session_list() {
            Result::Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "session snapshot failed, skipping tick");
                return;
            }
        };

        let now = Utc::now();
        for session in sessions {
            if session.expired(now) {
                self.reap(&session);
                continue;
            }

            let playground = match self.core.storage().playground_get(&session.playground_id) {
                Result::Ok(playground) => playground,
                Err(e) => {
                    tracing::warn!(session = %session.id, error = %e, "playground lookup failed");
                    continue;
                }
            };

            let instances = match self.core.storage().instance_find_by_session(&session.id) {
                Result::Ok(instances) => instances,
                Err(e) => {
                    tracing::warn!(session = %session.id, error = %e, "instance snapshot failed");
                    continue;
                }
            };

            for instance in instances {
                for task in &self.tasks {
                    if !self.task_allowed(&playground, task.name()) {
                        continue;
                    }
                    self.launch(task.clone(), &instance);
                }
            }
        }
    }

    /// Sessions past their deadline get closed exactly once; the core's
    /// close CAS collapses a reap racing an explicit close.
    fn reap(&self, session: &Session) {
        let core = self.core.clone();
        let session_id = session.id.clone();

        self.tracker.spawn(async move {
            tracing::info!(session = %session_id, "session expired, reaping");
            if let Err(e) = core.session_close(&session_id).await {
                tracing::warn!(session = %session_id, error = %e, "session reap failed");
            }
        });
    }

    fn launch(&self, task: Arc<dyn Task>, instance: &Instance) {
        let key = format!("{}/{}", task.name(), instance.name);
        if self.inflight.contains_key(&key) {
            return;
        }

        // Excess work is dropped for this tick; probes are idempotent and
        // come back next tick.
        let Result::Ok(permit) = self.pool.clone().try_acquire_owned() else {
            tracing::debug!(task = task.name(), instance = %instance.name, "worker pool full, dropping probe");
            return;
        };

        self.inflight.insert(key.clone(), ());

        let ctx = self.core.instance_context(instance).child_token();
        let cancel = self.cancel.clone();
        let inflight = self.inflight.clone();
        let instance = instance.clone();

        self.tracker.spawn(async move {
            let _permit = permit;

            let run = async {
                match task.timeout() {
                    Some(limit) => match time::timeout(limit, task.run(ctx.clone(), &instance)).await {
                        Result::Ok(result) => result,
                        Err(_) => Err(SandparkError::Backend(format!(
                            "task {} timed out",
                            task.name()
                        ))),
                    },
                    None => task.run(ctx.clone(), &instance).await,
                }
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Result::Ok(()),
                outcome = run => outcome,
            };

            if let Err(e) = outcome {
                tracing::warn!(
                    task = task.name(),
                    instance = %instance.name,
                    error = %e,
                    "task run failed"
                );
            }

            inflight.remove(&key);
        });
    }

    /// Whether the playground enables `task_name`. An empty pattern list
    /// enables everything.
    fn task_allowed(&self, playground: &Playground, task_name: &str) -> bool {
        if playground.tasks.is_empty() {
            return true;
        }

        playground.tasks.iter().any(|pattern| {
            let compiled = self
                .patterns
                .entry(pattern.clone())
                .or_insert_with(|| Regex::new(pattern).unwrap_or_else(|_| Regex::new("$^").unwrap()))
                .clone();
            compiled.is_match(task_name)
        })
    }
}
