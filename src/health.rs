//! Job health tracking and the process-wide health aggregate.
//!
//! Each job is either healthy or degraded. A job degrades after
//! `HEALTH_FAILURE_THRESHOLD` consecutive failed cycles and recovers on its
//! first successful cycle. Per-job counters live in the alert state store so
//! they survive restarts; [`RuntimeHealth`] combines them with the manager
//! loop's own counters into the report served on `/health`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_store::AlertStateStore;

/// Health of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
}

/// Persisted health counters of one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobHealth {
    pub consecutive_failures: u32,
    pub is_degraded: bool,
    /// Set once the "job down" mail for the current degradation went out.
    pub last_notified_down: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Side effect a recorded cycle outcome asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Unchanged,
    /// The job just crossed the failure threshold; send a "job down" mail.
    WentDown,
    /// The job recovered; `notify` is set when a "job down" mail was sent.
    Recovered { notify: bool },
}

impl JobHealth {
    pub fn state(&self) -> HealthState {
        if self.is_degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }

    /// Record a successful cycle.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> HealthTransition {
        let was_degraded = self.is_degraded;
        let notify = was_degraded && self.last_notified_down;

        self.consecutive_failures = 0;
        self.is_degraded = false;
        self.last_notified_down = false;
        self.last_success = Some(now);
        self.last_error = None;

        if was_degraded {
            HealthTransition::Recovered { notify }
        } else {
            HealthTransition::Unchanged
        }
    }

    /// Record a failed cycle.
    ///
    /// Only the failure that reaches the threshold reports
    /// [`HealthTransition::WentDown`]; further failures stay `Unchanged`.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        error: &str,
        threshold: u32,
    ) -> HealthTransition {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);
        self.last_error = Some(error.to_string());

        if !self.is_degraded && self.consecutive_failures >= threshold.max(1) {
            self.is_degraded = true;
            HealthTransition::WentDown
        } else {
            HealthTransition::Unchanged
        }
    }
}

/// Overall status reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// The first reconcile has not finished yet.
    Starting,
    Ok,
    Degraded,
}

impl OverallStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, OverallStatus::Ok)
    }
}

/// Manager loop section of the health report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerReport {
    pub status: OverallStatus,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Per-job section of the health report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub name: String,
    pub status: HealthState,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Snapshot served by the health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub started_at: DateTime<Utc>,
    pub startup_complete: bool,
    pub failure_threshold: u32,
    pub manager: ManagerReport,
    pub jobs: BTreeMap<String, JobReport>,
}

#[derive(Debug, Default)]
struct ManagerHealth {
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    startup_complete: bool,
    manager: ManagerHealth,
    /// Currently scheduled jobs: `job_uuid -> name`.
    active_jobs: BTreeMap<String, String>,
}

/// Process-wide health aggregate.
///
/// Written by the manager loop and the reconciler, read by the health
/// endpoint.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    started_at: DateTime<Utc>,
    failure_threshold: u32,
    store: Arc<AlertStateStore>,
    inner: Arc<RwLock<Inner>>,
}

impl RuntimeHealth {
    pub fn new(started_at: DateTime<Utc>, failure_threshold: u32, store: Arc<AlertStateStore>) -> Self {
        Self {
            started_at,
            failure_threshold: failure_threshold.max(1),
            store,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn mark_startup_complete(&self) {
        self.write(|inner| inner.startup_complete = true);
    }

    pub fn mark_manager_success(&self, now: DateTime<Utc>) {
        self.write(|inner| {
            inner.manager.consecutive_failures = 0;
            inner.manager.last_success = Some(now);
            inner.manager.last_error = None;
        });
    }

    pub fn mark_manager_failure(&self, now: DateTime<Utc>, error: &str) {
        self.write(|inner| {
            inner.manager.consecutive_failures = inner.manager.consecutive_failures.saturating_add(1);
            inner.manager.last_failure = Some(now);
            inner.manager.last_error = Some(error.to_string());
        });
    }

    /// Register a job as active, or update its display name.
    pub fn upsert_job(&self, job_uuid: &str, name: &str) {
        self.write(|inner| {
            inner
                .active_jobs
                .insert(job_uuid.to_string(), name.to_string());
        });
    }

    /// Stop reporting a job. Its persisted counters are kept.
    pub fn remove_job(&self, job_uuid: &str) {
        self.write(|inner| {
            inner.active_jobs.remove(job_uuid);
        });
    }

    /// Build the current health report.
    pub fn snapshot(&self) -> HealthReport {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let manager_status = if !inner.startup_complete {
            OverallStatus::Starting
        } else if inner.manager.consecutive_failures >= self.failure_threshold {
            OverallStatus::Degraded
        } else {
            OverallStatus::Ok
        };

        let mut jobs = BTreeMap::new();
        let mut status = manager_status;
        if inner.startup_complete {
            for (job_uuid, name) in &inner.active_jobs {
                let health = self.store.job_health(job_uuid).unwrap_or_default();
                if health.is_degraded {
                    status = OverallStatus::Degraded;
                }
                jobs.insert(
                    job_uuid.clone(),
                    JobReport {
                        name: name.clone(),
                        status: health.state(),
                        consecutive_failures: health.consecutive_failures,
                        last_success: health.last_success,
                        last_failure: health.last_failure,
                        last_error: health.last_error,
                    },
                );
            }
        }

        HealthReport {
            status,
            started_at: self.started_at,
            startup_complete: inner.startup_complete,
            failure_threshold: self.failure_threshold,
            manager: ManagerReport {
                status: manager_status,
                consecutive_failures: inner.manager.consecutive_failures,
                last_success: inner.manager.last_success,
                last_failure: inner.manager.last_failure,
                last_error: inner.manager.last_error.clone(),
            },
            jobs,
        }
    }

    fn write(&self, f: impl FnOnce(&mut Inner)) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut inner);
    }
}
