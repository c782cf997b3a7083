//! End-to-end job cycles against in-memory collaborators.
//!
//! The station data source and the mail transport are replaced by fakes so
//! whole cycles, health transitions and reconciliation can be driven with
//! controlled clocks.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};

use hochwasser::config::{EvaluationSettings, StoreLimits};
use hochwasser::data_sources::StationDataSource;
use hochwasser::error::{ConfigError, CycleError, FetchError, SendError};
use hochwasser::health::{HealthTransition, RuntimeHealth};
use hochwasser::model::{Job, Locale, Reading, StationData, StationInfo, TimeseriesInfo};
use hochwasser::notifier::{EmailMessage, Notifier};
use hochwasser::reconciler::Reconciler;
use hochwasser::runner::{CycleOutcome, JobRunner, RunnerSettings};
use hochwasser::scheduler::{JobScheduler, TokioScheduler};
use hochwasser::state_store::AlertStateStore;

const THRESHOLD: u32 = 3;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 13, 12, 0, 0).unwrap()
}

fn job(limit_cm: f64) -> Job {
    Job {
        job_uuid: "job-koeln".to_string(),
        name: "Köln".to_string(),
        station_uuid: "a6ee8177-107b-47dd-bcfd-30960ccc6e9c".to_string(),
        limit_cm,
        recipients: BTreeSet::from(["b@example.com".to_string(), "a@example.com".to_string()]),
        alert_recipient: Some("owner@example.com".to_string()),
        locale: Locale::De,
        schedule_cron: "0 * * * *".to_string(),
    }
}

fn station_data(current_cm: f64, forecast: &[(i64, f64)]) -> StationData {
    StationData {
        station: StationInfo {
            uuid: "a6ee8177-107b-47dd-bcfd-30960ccc6e9c".to_string(),
            shortname: "KÖLN".to_string(),
            longname: "KÖLN".to_string(),
            water_shortname: "RHEIN".to_string(),
            water_longname: "RHEIN".to_string(),
            unit: "cm".to_string(),
            timeseries: vec![TimeseriesInfo {
                shortname: "WV".to_string(),
                unit: Some("cm".to_string()),
                start: Some(t0()),
                end: Some(t0() + Duration::hours(96)),
            }],
        },
        current: Reading::current(t0() - Duration::minutes(15), current_cm),
        history: Vec::new(),
        forecast: forecast
            .iter()
            .map(|(hours, value)| Reading::forecast(t0() + Duration::hours(*hours), *value))
            .collect(),
        forecast_horizon: None,
    }
}

/// Station data source returning whatever it was last given.
struct FakeSource {
    data: Mutex<Option<StationData>>,
    fetches: AtomicUsize,
    delay: Option<std::time::Duration>,
}

impl FakeSource {
    fn new(data: StationData) -> Self {
        Self {
            data: Mutex::new(Some(data)),
            fetches: AtomicUsize::new(0),
            delay: None,
        }
    }

    fn set(&self, data: Option<StationData>) {
        *self.data.lock().unwrap() = data;
    }
}

#[async_trait]
impl StationDataSource for FakeSource {
    async fn fetch(&self, station_uuid: &str, _now: DateTime<Utc>) -> Result<StationData, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let data = self.data.lock().unwrap().clone();
        data.ok_or_else(|| FetchError::Network {
            url: format!("https://example.test/stations/{station_uuid}"),
            message: "connection reset".to_string(),
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<EmailMessage>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<(), SendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SendError::Transport("454 temporary failure".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Scheduler that only records what it was asked to do.
#[derive(Default)]
struct RecordingScheduler {
    registered: Mutex<Vec<String>>,
    unregistered: Mutex<Vec<String>>,
}

impl JobScheduler for RecordingScheduler {
    fn register(&self, job: &Job) -> Result<(), ConfigError> {
        self.registered.lock().unwrap().push(job.job_uuid.clone());
        Ok(())
    }

    fn unregister(&self, job_uuid: &str) {
        self.unregistered.lock().unwrap().push(job_uuid.to_string());
    }
}

fn settings() -> RunnerSettings {
    RunnerSettings {
        evaluation: EvaluationSettings {
            forecast_series_shortname: "WV".to_string(),
            horizon: Some(Duration::hours(72)),
            dedupe_window: Duration::hours(24),
            trend: None,
        },
        admin_recipients: vec!["admin@example.com".to_string()],
        failure_threshold: THRESHOLD,
        fetch_deadline: std::time::Duration::from_secs(5),
        timezone: chrono_tz::Europe::Berlin,
    }
}

fn store() -> Arc<AlertStateStore> {
    Arc::new(AlertStateStore::in_memory(StoreLimits {
        retention: Duration::hours(48),
        max_keys: 500,
    }))
}

fn runner_with(
    settings: RunnerSettings,
    source: Arc<FakeSource>,
    store: Arc<AlertStateStore>,
    notifier: Arc<RecordingNotifier>,
) -> JobRunner {
    JobRunner::new(settings, source, store, notifier)
}

#[tokio::test]
async fn test_crossing_is_alerted_once_per_window() {
    let source = Arc::new(FakeSource::new(station_data(280.0, &[(1, 290.0), (24, 305.0), (48, 310.0)])));
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = runner_with(settings(), source.clone(), store(), notifier.clone());
    let job = job(300.0);

    let first = assert_ok!(runner.run_cycle(&job, t0()).await);
    let second = assert_ok!(runner.run_cycle(&job, t0() + Duration::hours(1)).await);

    assert_eq!(first, CycleOutcome::Sent);
    assert_eq!(second, CycleOutcome::Suppressed);
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipients, vec!["a@example.com", "b@example.com"]);
    assert!(sent[0].body.contains("305"));
}

#[tokio::test]
async fn test_crossing_is_alerted_again_after_window() {
    let source = Arc::new(FakeSource::new(station_data(350.0, &[])));
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = runner_with(settings(), source, store(), notifier.clone());
    let job = job(300.0);

    assert_eq!(runner.run_cycle(&job, t0()).await.unwrap(), CycleOutcome::Sent);
    assert_eq!(
        runner.run_cycle(&job, t0() + Duration::hours(23)).await.unwrap(),
        CycleOutcome::Suppressed
    );
    assert_eq!(
        runner.run_cycle(&job, t0() + Duration::hours(24)).await.unwrap(),
        CycleOutcome::Sent
    );
    assert_eq!(notifier.sent().len(), 2);
}

#[tokio::test]
async fn test_no_crossing_sends_nothing() {
    let source = Arc::new(FakeSource::new(station_data(200.0, &[(1, 210.0)])));
    let notifier = Arc::new(RecordingNotifier::default());
    let store = store();
    let runner = runner_with(settings(), source, store.clone(), notifier.clone());

    let report = runner.run_and_record(&job(300.0), t0()).await;

    assert_eq!(report.result.unwrap(), CycleOutcome::NoCrossing);
    assert_eq!(report.transition, HealthTransition::Unchanged);
    assert!(notifier.sent().is_empty());
    assert_eq!(store.key_count(), 0);
}

#[tokio::test]
async fn test_send_failure_releases_claim_and_counts_as_failure() {
    let source = Arc::new(FakeSource::new(station_data(350.0, &[])));
    let notifier = Arc::new(RecordingNotifier::default());
    let store = store();
    let runner = runner_with(settings(), source, store.clone(), notifier.clone());
    let job = job(300.0);

    notifier.fail.store(true, Ordering::SeqCst);
    let report = runner.run_and_record(&job, t0()).await;

    assert!(matches!(report.result, Err(CycleError::Send(_))));
    assert_eq!(store.key_count(), 0);
    assert_eq!(store.job_health(&job.job_uuid).unwrap().consecutive_failures, 1);

    notifier.fail.store(false, Ordering::SeqCst);
    let report = runner.run_and_record(&job, t0() + Duration::hours(1)).await;

    assert_eq!(report.result.unwrap(), CycleOutcome::Sent);
    assert_eq!(store.key_count(), 1);
    assert_eq!(store.job_health(&job.job_uuid).unwrap().consecutive_failures, 0);
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_down_and_recovered_mails_are_sent_exactly_once() {
    let source = Arc::new(FakeSource::new(station_data(200.0, &[])));
    let notifier = Arc::new(RecordingNotifier::default());
    let store = store();
    let runner = runner_with(settings(), source.clone(), store.clone(), notifier.clone());
    let job = job(300.0);

    source.set(None);
    let mut transitions = Vec::new();
    for hour in 0..5 {
        let report = runner.run_and_record(&job, t0() + Duration::hours(hour)).await;
        assert!(matches!(report.result, Err(CycleError::Fetch(_))));
        transitions.push(report.transition);
    }

    assert_eq!(
        transitions,
        vec![
            HealthTransition::Unchanged,
            HealthTransition::Unchanged,
            HealthTransition::WentDown,
            HealthTransition::Unchanged,
            HealthTransition::Unchanged,
        ]
    );
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.starts_with("[DOWN]"));
    assert_eq!(sent[0].recipients, vec!["admin@example.com", "owner@example.com"]);
    assert!(sent[0].body.contains("connection reset"));
    let health = store.job_health(&job.job_uuid).unwrap();
    assert!(health.is_degraded);
    assert!(health.last_notified_down);
    assert_eq!(health.consecutive_failures, 5);

    source.set(Some(station_data(200.0, &[])));
    let recovered = runner.run_and_record(&job, t0() + Duration::hours(6)).await;
    let again = runner.run_and_record(&job, t0() + Duration::hours(7)).await;

    assert_eq!(recovered.transition, HealthTransition::Recovered { notify: true });
    assert_eq!(again.transition, HealthTransition::Unchanged);
    let sent = notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].subject.starts_with("[RECOVERED]"));
    assert!(!store.job_health(&job.job_uuid).unwrap().is_degraded);
}

#[tokio::test]
async fn test_recovery_is_silent_when_down_mail_failed() {
    let source = Arc::new(FakeSource::new(station_data(200.0, &[])));
    let notifier = Arc::new(RecordingNotifier::default());
    let store = store();
    let runner = runner_with(settings(), source.clone(), store.clone(), notifier.clone());
    let job = job(300.0);

    source.set(None);
    notifier.fail.store(true, Ordering::SeqCst);
    for hour in 0..THRESHOLD {
        runner.run_and_record(&job, t0() + Duration::hours(hour as i64)).await;
    }
    assert!(!store.job_health(&job.job_uuid).unwrap().last_notified_down);

    notifier.fail.store(false, Ordering::SeqCst);
    source.set(Some(station_data(200.0, &[])));
    let report = runner.run_and_record(&job, t0() + Duration::hours(4)).await;

    assert_eq!(report.transition, HealthTransition::Recovered { notify: false });
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn test_slow_fetch_hits_deadline() {
    let mut source = FakeSource::new(station_data(350.0, &[]));
    source.delay = Some(std::time::Duration::from_secs(5));
    let mut settings = settings();
    settings.fetch_deadline = std::time::Duration::from_millis(50);
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = runner_with(settings, Arc::new(source), store(), notifier.clone());

    let err = assert_err!(runner.run_cycle(&job(300.0), t0()).await);

    assert!(matches!(err, CycleError::Fetch(FetchError::Deadline(_))));
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn test_jobs_on_same_station_share_one_fetch() {
    let source = Arc::new(FakeSource::new(station_data(200.0, &[])));
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = runner_with(settings(), source.clone(), store(), notifier);
    let first = job(300.0);
    let mut second = job(250.0);
    second.job_uuid = "job-koeln-2".to_string();

    runner.run_cycle(&first, t0()).await.unwrap();
    runner.run_cycle(&second, t0()).await.unwrap();
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

    runner.run_cycle(&first, t0() + Duration::minutes(1)).await.unwrap();
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_limit_change_reenables_suppressed_crossing() {
    let source = Arc::new(FakeSource::new(station_data(350.0, &[])));
    let notifier = Arc::new(RecordingNotifier::default());
    let store = store();
    let runner = runner_with(settings(), source, store.clone(), notifier.clone());
    let scheduler = Arc::new(RecordingScheduler::default());
    let health = RuntimeHealth::new(t0(), THRESHOLD, store.clone());
    let mut reconciler = Reconciler::new(scheduler.clone(), store.clone(), health);

    let original = job(300.0);
    reconciler.reconcile(std::slice::from_ref(&original));
    assert_eq!(runner.run_cycle(&original, t0()).await.unwrap(), CycleOutcome::Sent);
    assert_eq!(
        runner.run_cycle(&original, t0() + Duration::hours(1)).await.unwrap(),
        CycleOutcome::Suppressed
    );

    let updated = job(290.0);
    let summary = reconciler.reconcile(std::slice::from_ref(&updated));

    assert_eq!(summary.changed, 1);
    assert_eq!(summary.invalidated_keys, 1);
    assert_eq!(scheduler.registered.lock().unwrap().len(), 2);
    assert_eq!(*scheduler.unregistered.lock().unwrap(), vec![updated.job_uuid.clone()]);
    assert_eq!(reconciler.registry().get(&updated.job_uuid), Some(&updated));
    assert_eq!(
        runner.run_cycle(&updated, t0() + Duration::hours(2)).await.unwrap(),
        CycleOutcome::Sent
    );
    assert_eq!(notifier.sent().len(), 2);
}

#[tokio::test]
async fn test_removed_job_keeps_keys_and_health() {
    let source = Arc::new(FakeSource::new(station_data(350.0, &[])));
    let notifier = Arc::new(RecordingNotifier::default());
    let store = store();
    let runner = runner_with(settings(), source, store.clone(), notifier);
    let scheduler = Arc::new(RecordingScheduler::default());
    let health = RuntimeHealth::new(t0(), THRESHOLD, store.clone());
    health.mark_startup_complete();
    let mut reconciler = Reconciler::new(scheduler.clone(), store.clone(), health.clone());
    let job = job(300.0);

    reconciler.reconcile(std::slice::from_ref(&job));
    runner.run_and_record(&job, t0()).await;
    let summary = reconciler.reconcile(&[]);

    assert_eq!(summary.removed, 1);
    assert_eq!(*scheduler.unregistered.lock().unwrap(), vec![job.job_uuid.clone()]);
    assert_eq!(store.key_count(), 1);
    assert!(store.job_health(&job.job_uuid).is_some());
    assert!(health.snapshot().jobs.is_empty());
}

#[tokio::test]
async fn test_scheduler_runs_new_job_immediately() {
    let source = Arc::new(FakeSource::new(station_data(200.0, &[])));
    let notifier = Arc::new(RecordingNotifier::default());
    let store = store();
    let runner = Arc::new(runner_with(settings(), source.clone(), store.clone(), notifier));
    let scheduler = TokioScheduler::new(runner);
    let job = job(300.0);

    assert_ok!(scheduler.register(&job));
    assert_eq!(scheduler.len(), 1);

    for _ in 0..100 {
        if store.job_health(&job.job_uuid).is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    assert!(store.job_health(&job.job_uuid).unwrap().last_success.is_some());

    scheduler.unregister(&job.job_uuid);
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn test_scheduler_rejects_invalid_cron() {
    let source = Arc::new(FakeSource::new(station_data(200.0, &[])));
    let runner = Arc::new(runner_with(
        settings(),
        source,
        store(),
        Arc::new(RecordingNotifier::default()),
    ));
    let scheduler = TokioScheduler::new(runner);
    let mut job = job(300.0);
    job.schedule_cron = "61 * * * *".to_string();

    let err = assert_err!(scheduler.register(&job));

    assert!(matches!(err, ConfigError::InvalidCron { .. }));
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn test_update_during_slow_run_is_not_suppressed_by_old_run() {
    let mut source = FakeSource::new(station_data(350.0, &[]));
    source.delay = Some(std::time::Duration::from_millis(300));
    let notifier = Arc::new(RecordingNotifier::default());
    let store = store();
    let runner = Arc::new(runner_with(settings(), Arc::new(source), store.clone(), notifier.clone()));
    let scheduler = Arc::new(TokioScheduler::new(runner));
    let health = RuntimeHealth::new(t0(), THRESHOLD, store.clone());
    let mut reconciler = Reconciler::new(scheduler.clone(), store.clone(), health);

    reconciler.reconcile(&[job(300.0)]);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    // The first run is still fetching, so nothing has been claimed yet.
    let summary = reconciler.reconcile(&[job(320.0)]);
    assert_eq!(summary.changed, 1);
    assert_eq!(summary.invalidated_keys, 0);

    for _ in 0..150 {
        if notifier.sent().len() >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let sent = notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|mail| mail.recipients == vec!["a@example.com", "b@example.com"]));
    assert_eq!(store.key_count(), 1);
    scheduler.shutdown();
}
