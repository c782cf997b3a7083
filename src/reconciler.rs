//! Job reconciliation.
//!
//! On every manager tick the desired job set is reloaded and compared with
//! the [`JobRegistry`] of scheduled jobs. The comparison is a pure
//! [`diff`]; [`Reconciler`] applies it to the scheduler, the alert state
//! store and the health aggregate.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::{JobsSource, load_jobs};
use crate::health::RuntimeHealth;
use crate::model::Job;
use crate::scheduler::JobScheduler;
use crate::state_store::AlertStateStore;

/// Difference between the scheduled and the desired job set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobDiff {
    pub added: Vec<Job>,
    pub removed: Vec<Job>,
    /// `(previous, desired)` pairs for jobs whose definition changed.
    pub changed: Vec<(Job, Job)>,
}

impl JobDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compute the difference between `current` and `desired`, keyed by `job_uuid`.
pub fn diff(current: &BTreeMap<String, Job>, desired: &[Job]) -> JobDiff {
    let mut result = JobDiff::default();
    let mut desired_by_uuid: BTreeMap<&str, &Job> = BTreeMap::new();

    for job in desired {
        desired_by_uuid.entry(job.job_uuid.as_str()).or_insert(job);
    }

    for (job_uuid, job) in current {
        if !desired_by_uuid.contains_key(job_uuid.as_str()) {
            result.removed.push(job.clone());
        }
    }

    for (job_uuid, job) in desired_by_uuid {
        match current.get(job_uuid) {
            None => result.added.push(job.clone()),
            Some(existing) if existing != job => result.changed.push((existing.clone(), job.clone())),
            Some(_) => {}
        }
    }

    result
}

/// Jobs currently scheduled, keyed by `job_uuid`.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diff(&self, desired: &[Job]) -> JobDiff {
        diff(&self.jobs, desired)
    }

    pub fn get(&self, job_uuid: &str) -> Option<&Job> {
        self.jobs.get(job_uuid)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    fn insert(&mut self, job: Job) {
        self.jobs.insert(job.job_uuid.clone(), job);
    }

    fn remove(&mut self, job_uuid: &str) -> Option<Job> {
        self.jobs.remove(job_uuid)
    }
}

/// Counts of what one reconciliation changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub invalidated_keys: usize,
    /// Jobs whose trigger could not be registered.
    pub failed: usize,
}

/// Owns the job registry and keeps the scheduler in line with it.
pub struct Reconciler {
    registry: JobRegistry,
    scheduler: Arc<dyn JobScheduler>,
    store: Arc<AlertStateStore>,
    health: RuntimeHealth,
}

impl Reconciler {
    pub fn new(scheduler: Arc<dyn JobScheduler>, store: Arc<AlertStateStore>, health: RuntimeHealth) -> Self {
        Self {
            registry: JobRegistry::new(),
            scheduler,
            store,
            health,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Bring scheduled jobs in line with `desired`.
    ///
    /// Removed jobs keep their health counters and dedup keys. Changed jobs
    /// lose all their dedup keys so the new definition is never suppressed by
    /// history from the old one.
    pub fn reconcile(&mut self, desired: &[Job]) -> ReconcileSummary {
        let diff = self.registry.diff(desired);
        let mut summary = ReconcileSummary::default();

        for job in &diff.removed {
            self.scheduler.unregister(&job.job_uuid);
            self.health.remove_job(&job.job_uuid);
            self.registry.remove(&job.job_uuid);
            summary.removed += 1;
            info!(job = %job.log_tag(), "Stopped deleted job");
        }

        for (previous, job) in &diff.changed {
            let invalidated = self.store.invalidate_job(&job.job_uuid);
            summary.invalidated_keys += invalidated;

            // The running task holds the old definition, so it is replaced
            // even when the schedule is unchanged. A run of the old task that
            // is still in flight may claim a key after this point; the
            // scheduler drops those again before the first run of the new one.
            match self.scheduler.reregister(job) {
                Ok(()) => {
                    self.health.upsert_job(&job.job_uuid, &job.name);
                    self.registry.insert(job.clone());
                    summary.changed += 1;
                    info!(
                        job = %job.log_tag(),
                        invalidated,
                        cron_changed = previous.schedule_cron != job.schedule_cron,
                        "Restarted updated job"
                    );
                }
                Err(e) => {
                    self.health.remove_job(&job.job_uuid);
                    self.registry.remove(&job.job_uuid);
                    summary.failed += 1;
                    error!(job = %job.log_tag(), error = %e, "Could not schedule updated job");
                }
            }
        }

        for job in &diff.added {
            match self.scheduler.register(job) {
                Ok(()) => {
                    self.health.upsert_job(&job.job_uuid, &job.name);
                    self.registry.insert(job.clone());
                    summary.added += 1;
                    info!(job = %job.log_tag(), "Started new job");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(job = %job.log_tag(), error = %e, "Could not schedule job");
                }
            }
        }

        summary
    }

    /// One manager tick: reload the job set, reconcile and prune state.
    ///
    /// When the jobs cannot be loaded at all, the running job set is kept
    /// and the failure is counted against the manager's health.
    pub fn tick(&mut self, source: &JobsSource, now: DateTime<Utc>, dedupe_window: chrono::Duration) -> Option<ReconcileSummary> {
        let loaded = match load_jobs(source) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(error = %e, "Could not load jobs, keeping current job set");
                self.health.mark_manager_failure(now, &e.to_string());
                return None;
            }
        };

        for rejected in &loaded.rejected {
            warn!(error = %rejected, "Rejected job definition");
        }

        let summary = self.reconcile(&loaded.jobs);
        let pruned = self.store.prune(now, dedupe_window);
        if !(summary == ReconcileSummary::default() && pruned == 0) {
            info!(
                added = summary.added,
                removed = summary.removed,
                changed = summary.changed,
                failed = summary.failed,
                invalidated_keys = summary.invalidated_keys,
                pruned,
                active = self.registry.len(),
                "Reconciled jobs"
            );
        }

        self.health.mark_manager_success(now);
        Some(summary)
    }
}
