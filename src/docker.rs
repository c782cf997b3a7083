//! Docker plumbing for the watchdog.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::RestartContainerOptions;
use bollard::models::{EventMessage, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{error, info};

use crate::error::RestartError;
use crate::watchdog::{ContainerControl, ContainerEvent, ContainerEventKind, ContainerEventSource};

/// Pause before re-subscribing after the event stream failed.
const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

/// Seconds Docker waits for a container to stop before killing it.
const RESTART_TIMEOUT_SECONDS: isize = 10;

type EventStream = BoxStream<'static, Result<EventMessage, bollard::errors::Error>>;

/// Container events from the local Docker daemon, reconnecting on errors.
pub struct DockerEvents {
    docker: Docker,
    stream: Option<EventStream>,
}

impl DockerEvents {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            stream: None,
        }
    }

    fn subscribe(&self) -> EventStream {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);

        self.docker
            .events(Some(EventsOptions::<String> {
                filters,
                ..Default::default()
            }))
            .boxed()
    }
}

#[async_trait]
impl ContainerEventSource for DockerEvents {
    async fn next_event(&mut self) -> Option<ContainerEvent> {
        loop {
            if self.stream.is_none() {
                info!("Subscribing to Docker events");
                self.stream = Some(self.subscribe());
            }
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };

            match stream.next().await {
                Some(Ok(message)) => {
                    if let Some(event) = to_container_event(&message) {
                        return Some(event);
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Docker event stream error");
                    self.stream = None;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
                None => {
                    error!("Docker event stream closed");
                    self.stream = None;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

/// Convert a raw Docker event; events the watchdog does not act on yield `None`.
fn to_container_event(message: &EventMessage) -> Option<ContainerEvent> {
    if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
        return None;
    }

    let action = message.action.as_deref()?;
    let kind = ContainerEventKind::from_action(action)?;

    let actor = message.actor.as_ref()?;
    let container_name = actor
        .attributes
        .as_ref()
        .and_then(|attributes| attributes.get("name"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())?;

    Some(ContainerEvent {
        container_name,
        kind,
        action: action.to_string(),
        actor_id: actor.id.clone(),
    })
}

/// Restarts containers through the Docker API.
#[derive(Clone)]
pub struct DockerControl {
    docker: Docker,
}

impl DockerControl {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerControl for DockerControl {
    async fn restart(&self, container_name: &str) -> Result<(), RestartError> {
        self.docker
            .restart_container(
                container_name,
                Some(RestartContainerOptions {
                    t: RESTART_TIMEOUT_SECONDS,
                }),
            )
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => RestartError::NotFound(container_name.to_string()),
                other => RestartError::Api {
                    container: container_name.to_string(),
                    message: other.to_string(),
                },
            })
    }
}
