//! Container watchdog.
//!
//! Watches container lifecycle events of sibling services. Failures
//! (`die`, `unhealthy`) are mailed at most once per cooldown per container;
//! unhealthy containers can be restarted automatically, on every event and
//! independent of the mail cooldown. A recovery mail is only sent for a
//! container whose failure was mailed before.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use crate::config::WatchdogSettings;
use crate::error::RestartError;
use crate::messages::watchdog_message;
use crate::notifier::Notifier;

/// Kind of a relevant container event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerEventKind {
    Die,
    Unhealthy,
    HealthRecovered,
}

impl ContainerEventKind {
    /// Map a Docker event action; irrelevant actions yield `None`.
    pub fn from_action(action: &str) -> Option<Self> {
        match action.trim() {
            "die" => Some(ContainerEventKind::Die),
            "health_status: unhealthy" => Some(ContainerEventKind::Unhealthy),
            "health_status: healthy" => Some(ContainerEventKind::HealthRecovered),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerEventKind::Die => "die",
            ContainerEventKind::Unhealthy => "unhealthy",
            ContainerEventKind::HealthRecovered => "health_recovered",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ContainerEventKind::Die | ContainerEventKind::Unhealthy)
    }
}

/// A container event relevant to the watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub container_name: String,
    pub kind: ContainerEventKind,
    /// The raw action string as reported by the runtime.
    pub action: String,
    pub actor_id: Option<String>,
}

/// Endless stream of container events.
///
/// Implementations reconnect on their own; `None` means the stream ended
/// for good.
#[async_trait]
pub trait ContainerEventSource: Send {
    async fn next_event(&mut self) -> Option<ContainerEvent>;
}

/// Restarts containers.
#[async_trait]
pub trait ContainerControl: Send + Sync {
    async fn restart(&self, container_name: &str) -> Result<(), RestartError>;
}

/// What to do about one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchdogDecision {
    pub notify: bool,
    pub restart: bool,
}

#[derive(Debug, Default)]
struct ContainerState {
    last_alert_at: Option<DateTime<Utc>>,
    awaiting_recovery: bool,
}

/// Cooldown and restart bookkeeping, free of any I/O.
#[derive(Debug)]
pub struct WatchdogEngine {
    cooldown: Duration,
    auto_restart_unhealthy: bool,
    containers: HashMap<String, ContainerState>,
}

impl WatchdogEngine {
    pub fn new(cooldown: Duration, auto_restart_unhealthy: bool) -> Self {
        Self {
            cooldown,
            auto_restart_unhealthy,
            containers: HashMap::new(),
        }
    }

    /// Decide whether `event` is mailed and whether the container restarts.
    pub fn decide(&self, event: &ContainerEvent, now: DateTime<Utc>) -> WatchdogDecision {
        let state = self.containers.get(&event.container_name);

        match event.kind {
            ContainerEventKind::Die | ContainerEventKind::Unhealthy => {
                let cooled_down = match state.and_then(|s| s.last_alert_at) {
                    Some(last) => now - last >= self.cooldown,
                    None => true,
                };
                WatchdogDecision {
                    notify: cooled_down,
                    restart: self.auto_restart_unhealthy
                        && event.kind == ContainerEventKind::Unhealthy,
                }
            }
            ContainerEventKind::HealthRecovered => WatchdogDecision {
                notify: state.is_some_and(|s| s.awaiting_recovery),
                restart: false,
            },
        }
    }

    /// Record that the mail for `event` went out.
    pub fn record_sent(&mut self, event: &ContainerEvent, now: DateTime<Utc>) {
        let state = self
            .containers
            .entry(event.container_name.clone())
            .or_default();

        if event.kind.is_failure() {
            state.last_alert_at = Some(now);
            state.awaiting_recovery = true;
        } else {
            state.awaiting_recovery = false;
        }
    }

    pub fn last_alert_at(&self, container_name: &str) -> Option<DateTime<Utc>> {
        self.containers
            .get(container_name)
            .and_then(|s| s.last_alert_at)
    }
}

/// What the watchdog did with one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOutcome {
    pub ignored: bool,
    pub notified: bool,
    pub restart_attempted: bool,
    pub restart_note: Option<String>,
}

/// Event loop tying the engine to mail and container control.
pub struct Watchdog {
    engine: WatchdogEngine,
    recipients: Vec<String>,
    watch_containers: Vec<String>,
    control: Arc<dyn ContainerControl>,
    notifier: Arc<dyn Notifier>,
}

impl Watchdog {
    pub fn new(
        settings: &WatchdogSettings,
        control: Arc<dyn ContainerControl>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            engine: WatchdogEngine::new(settings.cooldown, settings.auto_restart_unhealthy),
            recipients: settings.recipients.clone(),
            watch_containers: settings.watch_containers.clone(),
            control,
            notifier,
        }
    }

    pub fn engine(&self) -> &WatchdogEngine {
        &self.engine
    }

    fn is_watched(&self, container_name: &str) -> bool {
        self.watch_containers.is_empty()
            || self.watch_containers.iter().any(|name| name == container_name)
    }

    /// Consume events until the source ends.
    pub async fn run<S: ContainerEventSource>(mut self, mut source: S) {
        while let Some(event) = source.next_event().await {
            self.handle_event(&event, Utc::now()).await;
        }
        warn!("Container event stream ended");
    }

    /// Apply restart and mail decisions for one event.
    pub async fn handle_event(&mut self, event: &ContainerEvent, now: DateTime<Utc>) -> EventOutcome {
        if !self.is_watched(&event.container_name) {
            return EventOutcome {
                ignored: true,
                ..Default::default()
            };
        }

        let decision = self.engine.decide(event, now);
        let mut outcome = EventOutcome::default();

        if decision.restart {
            outcome.restart_attempted = true;
            let note = match self.control.restart(&event.container_name).await {
                Ok(()) => {
                    info!(container = %event.container_name, "Restart requested");
                    "restart requested".to_string()
                }
                Err(RestartError::NotFound(_)) => {
                    warn!(container = %event.container_name, "Restart skipped, container not found");
                    "container not found".to_string()
                }
                Err(e) => {
                    error!(container = %event.container_name, error = %e, "Restart failed");
                    format!("restart failed: {e}")
                }
            };
            outcome.restart_note = Some(note);
        }

        if !decision.notify {
            info!(
                container = %event.container_name,
                event = event.kind.as_str(),
                "Suppressed watchdog alert"
            );
            return outcome;
        }

        let message = watchdog_message(&self.recipients, event, now, outcome.restart_note.as_deref());
        match self.notifier.send(&message).await {
            Ok(()) => {
                self.engine.record_sent(event, now);
                outcome.notified = true;
                warn!(
                    container = %event.container_name,
                    event = event.kind.as_str(),
                    "Watchdog alert sent"
                );
            }
            Err(e) => {
                error!(
                    container = %event.container_name,
                    event = event.kind.as_str(),
                    error = %e,
                    "Failed to send watchdog alert"
                );
            }
        }

        outcome
    }
}
