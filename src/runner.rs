//! One evaluation cycle of one job.
//!
//! fetch → evaluate → dedup claim → send, followed by the job health
//! update and any down/recovered mail it triggers. Nothing in here is
//! retried; the next scheduled tick is the retry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{error, info, instrument, warn};

use crate::config::{EvaluationSettings, Settings};
use crate::data_sources::StationDataSource;
use crate::error::{CycleError, FetchError};
use crate::health::HealthTransition;
use crate::messages::{alert_message, job_down_message, job_recovered_message};
use crate::model::{CrossingEvent, Job};
use crate::notifier::Notifier;
use crate::station_cache::StationDataCache;
use crate::state_store::{AlertStateStore, ClaimOutcome};
use crate::threshold::evaluate_station;

/// Upper bound on sequential requests one station fetch may need.
const MAX_REQUESTS_PER_FETCH: u32 = 7;

/// Settings the runner needs from the global configuration.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub evaluation: EvaluationSettings,
    pub admin_recipients: Vec<String>,
    pub failure_threshold: u32,
    /// Deadline for fetching one station's data.
    pub fetch_deadline: std::time::Duration,
    pub timezone: Tz,
}

impl From<&Settings> for RunnerSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            evaluation: settings.evaluation.clone(),
            admin_recipients: settings.admin_recipients.clone(),
            failure_threshold: settings.failure_threshold,
            fetch_deadline: settings.fetch_timeout * MAX_REQUESTS_PER_FETCH,
            timezone: settings.timezone,
        }
    }
}

/// What a successful cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    NoCrossing,
    /// An alert mail went out.
    Sent,
    /// The crossing was already alerted inside the dedupe window.
    Suppressed,
}

/// Result of a cycle together with the health transition it caused.
#[derive(Debug)]
pub struct CycleReport {
    pub result: Result<CycleOutcome, CycleError>,
    pub transition: HealthTransition,
}

/// Runs job cycles against shared collaborators.
pub struct JobRunner {
    source: Arc<dyn StationDataSource>,
    cache: Arc<StationDataCache>,
    store: Arc<AlertStateStore>,
    notifier: Arc<dyn Notifier>,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        settings: RunnerSettings,
        source: Arc<dyn StationDataSource>,
        store: Arc<AlertStateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            cache: Arc::new(StationDataCache::new()),
            store,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<AlertStateStore> {
        &self.store
    }

    pub fn timezone(&self) -> Tz {
        self.settings.timezone
    }

    /// Evaluate `job` once, sending an alert when a new crossing is found.
    pub async fn run_cycle(&self, job: &Job, now: DateTime<Utc>) -> Result<CycleOutcome, CycleError> {
        let shortname = &self.settings.evaluation.forecast_series_shortname;
        let fetch = self
            .cache
            .get_or_fetch(now, &job.station_uuid, shortname, || {
                self.source.fetch(&job.station_uuid, now)
            });
        let data = tokio::time::timeout(self.settings.fetch_deadline, fetch)
            .await
            .map_err(|_| FetchError::Deadline(self.settings.fetch_deadline))??;

        let decision = evaluate_station(now, &data, job.limit_cm, &self.settings.evaluation);
        let Some(crossing) = decision.crossing() else {
            info!(
                current = data.current.value(),
                limit = job.limit_cm,
                forecast_points = data.forecast.len(),
                "No crossing"
            );
            return Ok(CycleOutcome::NoCrossing);
        };

        let event = CrossingEvent::new(job, crossing);
        let key = event.dedup_key();

        let previous = match self
            .store
            .try_claim(&key, now, self.settings.evaluation.dedupe_window)
        {
            ClaimOutcome::AlreadyClaimed { first_sent_at } => {
                info!(
                    key = %key,
                    crossing_at = %crossing.timestamp,
                    first_sent_at = %first_sent_at,
                    "Alert suppressed, already sent within dedupe window"
                );
                return Ok(CycleOutcome::Suppressed);
            }
            ClaimOutcome::Claimed { previous } => previous,
        };

        let message = alert_message(job, &data, crossing, now, self.settings.timezone);
        if let Err(e) = self.notifier.send(&message).await {
            self.store.release(&key, now, previous);
            return Err(e.into());
        }

        warn!(
            key = %key,
            provenance = crossing.provenance.as_str(),
            crossing_at = %crossing.timestamp,
            value = crossing.value,
            limit = job.limit_cm,
            "Alert sent"
        );
        Ok(CycleOutcome::Sent)
    }

    /// Run one cycle and record its outcome in the job's health.
    #[instrument(skip(self, job, now), fields(job_uuid = %job.job_uuid, job = %job.name))]
    pub async fn run_and_record(&self, job: &Job, now: DateTime<Utc>) -> CycleReport {
        let result = self.run_cycle(job, now).await;
        let finished = Utc::now().max(now);

        let transition = match &result {
            Ok(_) => {
                let transition = self.store.record_job_success(&job.job_uuid, finished);
                if transition == (HealthTransition::Recovered { notify: true }) {
                    info!("Job recovered");
                    let message = job_recovered_message(job, &self.settings.admin_recipients, finished);
                    self.send_status_mail(job, &message).await;
                }
                transition
            }
            Err(e) => {
                error!(error = %e, "Cycle failed");
                let transition = self.store.record_job_failure(
                    &job.job_uuid,
                    finished,
                    &e.to_string(),
                    self.settings.failure_threshold,
                );
                if transition == HealthTransition::WentDown {
                    warn!(threshold = self.settings.failure_threshold, "Job degraded");
                    let message = job_down_message(
                        job,
                        &self.settings.admin_recipients,
                        self.settings.failure_threshold,
                        &e.to_string(),
                    );
                    if self.send_status_mail(job, &message).await {
                        self.store.mark_down_notified(&job.job_uuid);
                    }
                }
                transition
            }
        };

        CycleReport { result, transition }
    }

    async fn send_status_mail(&self, job: &Job, message: &crate::notifier::EmailMessage) -> bool {
        if message.recipients.is_empty() {
            warn!(subject = %message.subject, "No admin recipients, status mail not sent");
            return false;
        }
        match self.notifier.send(message).await {
            Ok(()) => true,
            Err(e) => {
                error!(job = %job.log_tag(), error = %e, subject = %message.subject, "Sending status mail failed");
                false
            }
        }
    }
}
