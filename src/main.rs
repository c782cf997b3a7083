//! Hochwasser - water-level threshold alerting.
//!
//! # Overview
//!
//! Polls gauging stations on per-job cron schedules and mails subscribers
//! when a measured or forecast level reaches the job's limit. The job set
//! is reloaded every manager tick, so jobs can be added, changed and
//! removed without restarting the service.
//!
//! # Endpoints
//!
//! - `GET /health` - Manager and per-job health (200 when ok, 503 otherwise)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hochwasser::api::{AppState, router};
use hochwasser::config::{Settings, load_jobs};
use hochwasser::data_sources::provider_for;
use hochwasser::health::RuntimeHealth;
use hochwasser::notifier::SmtpNotifier;
use hochwasser::reconciler::Reconciler;
use hochwasser::runner::{JobRunner, RunnerSettings};
use hochwasser::scheduler::TokioScheduler;
use hochwasser::state_store::AlertStateStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("hochwasser=info".parse()?))
        .init();

    let settings = Settings::from_env().context("invalid configuration")?;
    info!(
        provider = %settings.provider,
        state_file = %settings.state_file.display(),
        timezone = %settings.timezone,
        failure_threshold = settings.failure_threshold,
        "Starting Hochwasser"
    );

    // An unreadable jobs file at startup leaves nothing safe to run.
    let initial = load_jobs(&settings.jobs).context("could not load jobs")?;
    for rejected in &initial.rejected {
        warn!(error = %rejected, "Rejected job definition");
    }

    let store = Arc::new(AlertStateStore::open(settings.state_file.clone(), settings.store_limits));
    let health = RuntimeHealth::new(Utc::now(), settings.failure_threshold, store.clone());

    let source = provider_for(&settings)?;
    let notifier = Arc::new(SmtpNotifier::new(&settings.smtp).context("invalid SMTP settings")?);
    let runner = Arc::new(JobRunner::new(
        RunnerSettings::from(&settings),
        source,
        store.clone(),
        notifier,
    ));
    let scheduler = Arc::new(TokioScheduler::new(runner));

    let mut reconciler = Reconciler::new(scheduler.clone(), store.clone(), health.clone());
    let summary = reconciler.reconcile(&initial.jobs);
    store.prune(Utc::now(), settings.evaluation.dedupe_window);
    health.mark_manager_success(Utc::now());
    health.mark_startup_complete();
    info!(
        jobs = summary.added,
        failed = summary.failed,
        rejected = initial.rejected.len(),
        "Initial jobs scheduled"
    );

    let addr: SocketAddr = format!("{}:{}", settings.health_host, settings.health_port)
        .parse()
        .with_context(|| format!("invalid health address {}:{}", settings.health_host, settings.health_port))?;
    let listener = TcpListener::bind(addr).await?;
    let app = router(AppState { health: health.clone() });
    info!(%addr, "Health endpoint listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Health server stopped");
        }
    });

    let mut interval = tokio::time::interval(settings.manager_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately and the jobs were just loaded.
    interval.tick().await;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                reconciler.tick(&settings.jobs, Utc::now(), settings.evaluation.dedupe_window);
            }
            _ = sigterm.recv() => {
                info!("caught SIGTERM; stopping");
                break;
            }
            _ = sigint.recv() => {
                info!("caught SIGINT; stopping");
                break;
            }
        }
    }

    info!("Shutting down");
    scheduler.shutdown();
    store.flush()?;

    Ok(())
}
