//! Hochwasser watchdog - mails operators about failing containers.
//!
//! Listens to the local Docker daemon's container events. A container that
//! dies or turns unhealthy triggers a mail, at most one per container per
//! cooldown; unhealthy containers are optionally restarted. Once an alerted
//! container reports healthy again a recovery mail follows.

use std::sync::Arc;

use anyhow::Context;
use bollard::Docker;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hochwasser::config::WatchdogSettings;
use hochwasser::docker::{DockerControl, DockerEvents};
use hochwasser::notifier::SmtpNotifier;
use hochwasser::watchdog::Watchdog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("hochwasser=info".parse()?))
        .init();

    let settings = WatchdogSettings::from_env().context("invalid watchdog configuration")?;
    info!(
        recipients = settings.recipients.len(),
        watch_containers = ?settings.watch_containers,
        cooldown_seconds = settings.cooldown.num_seconds(),
        auto_restart_unhealthy = settings.auto_restart_unhealthy,
        "Starting Hochwasser watchdog"
    );

    let docker = Docker::connect_with_local_defaults().context("could not connect to Docker")?;
    let notifier = Arc::new(SmtpNotifier::new(&settings.smtp).context("invalid SMTP settings")?);
    let control = Arc::new(DockerControl::new(docker.clone()));

    Watchdog::new(&settings, control, notifier)
        .run(DockerEvents::new(docker))
        .await;

    Ok(())
}
