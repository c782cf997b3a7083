//! Cron-driven job execution on tokio tasks.
//!
//! Every registered job runs once right away and then on each fire time of
//! its cron expression in the configured time zone. Runs of one job never
//! overlap: fire times missed during a slow run are coalesced, and a job
//! re-registered while its previous task is mid-run waits for that run.
//! A re-registered job drops its dedup keys once that run has finished, so
//! keys claimed by the old definition never suppress the new one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::ConfigError;
use crate::model::Job;
use crate::runner::JobRunner;
use crate::schedule::CronSchedule;

/// Registers and unregisters job triggers.
pub trait JobScheduler: Send + Sync {
    /// Start triggering `job` on its schedule.
    fn register(&self, job: &Job) -> Result<(), ConfigError>;

    /// Stop triggering the job. A run in progress completes.
    fn unregister(&self, job_uuid: &str);

    /// Replace the trigger of an already registered job.
    fn reregister(&self, job: &Job) -> Result<(), ConfigError> {
        self.unregister(&job.job_uuid);
        self.register(job)
    }
}

struct ScheduledTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// [`JobScheduler`] running each job in its own tokio task.
pub struct TokioScheduler {
    runner: Arc<JobRunner>,
    timezone: Tz,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    run_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokioScheduler {
    pub fn new(runner: Arc<JobRunner>) -> Self {
        Self {
            timezone: runner.timezone(),
            runner,
            tasks: Mutex::new(HashMap::new()),
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every job.
    pub fn shutdown(&self) {
        let mut tasks = lock(&self.tasks);
        for (job_uuid, task) in tasks.drain() {
            let _ = task.stop.send(true);
            debug!(job_uuid = %job_uuid, finished = task.handle.is_finished(), "Stopped job task");
        }
    }

    fn spawn(&self, job: &Job, first_run: FirstRun) -> Result<(), ConfigError> {
        let schedule = CronSchedule::parse(&job.schedule_cron)?;
        let (stop_tx, stop_rx) = watch::channel(false);

        let span = info_span!("job", job_uuid = %job.job_uuid, name = %job.name);
        let handle = tokio::spawn(
            job_loop(
                self.runner.clone(),
                job.clone(),
                schedule,
                self.timezone,
                self.run_lock(&job.job_uuid),
                first_run,
                stop_rx,
            )
            .instrument(span),
        );

        let previous = lock(&self.tasks).insert(
            job.job_uuid.clone(),
            ScheduledTask {
                stop: stop_tx,
                handle,
            },
        );
        if let Some(previous) = previous {
            let _ = previous.stop.send(true);
        }

        info!(job = %job.log_tag(), cron = %job.schedule_cron, "Scheduled job");
        Ok(())
    }

    fn run_lock(&self, job_uuid: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.run_locks)
            .entry(job_uuid.to_string())
            .or_default()
            .clone()
    }
}

impl JobScheduler for TokioScheduler {
    fn register(&self, job: &Job) -> Result<(), ConfigError> {
        self.spawn(job, FirstRun::Plain)
    }

    fn unregister(&self, job_uuid: &str) {
        if let Some(task) = lock(&self.tasks).remove(job_uuid) {
            let _ = task.stop.send(true);
            info!(job_uuid = %job_uuid, "Unscheduled job");
        }
    }

    fn reregister(&self, job: &Job) -> Result<(), ConfigError> {
        self.unregister(&job.job_uuid);
        self.spawn(job, FirstRun::InvalidateKeys)
    }
}

/// What the first run of a freshly spawned task does before evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FirstRun {
    Plain,
    /// Drop the job's dedup keys while holding the run lock, after any run
    /// of the replaced task has finished.
    InvalidateKeys,
}

async fn job_loop(
    runner: Arc<JobRunner>,
    job: Job,
    schedule: CronSchedule,
    timezone: Tz,
    run_lock: Arc<tokio::sync::Mutex<()>>,
    first_run: FirstRun,
    mut stop: watch::Receiver<bool>,
) {
    run_serialized(&runner, &job, &run_lock, first_run, &stop).await;

    loop {
        let now = Utc::now().with_timezone(&timezone);
        let Some(next) = schedule.next_after(&now) else {
            warn!(cron = %schedule.expression(), "Schedule has no future fire time");
            return;
        };
        let wait = (next.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or_default();
        debug!(next = %next, "Waiting for next run");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop.changed() => return,
        }

        run_serialized(&runner, &job, &run_lock, FirstRun::Plain, &stop).await;
    }
}

async fn run_serialized(
    runner: &JobRunner,
    job: &Job,
    run_lock: &tokio::sync::Mutex<()>,
    first_run: FirstRun,
    stop: &watch::Receiver<bool>,
) {
    let _guard = run_lock.lock().await;
    if *stop.borrow() {
        return;
    }
    if first_run == FirstRun::InvalidateKeys {
        let invalidated = runner.store().invalidate_job(&job.job_uuid);
        if invalidated > 0 {
            info!(job = %job.log_tag(), invalidated, "Dropped keys claimed before the update");
        }
    }
    runner.run_and_record(job, Utc::now()).await;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
