use super::{collect_container, ContainerRuntime};
use crate::error::Result;
use crate::trigger;
use crate::types::DesiredState;
use anyhow::anyhow;
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Container events that can change the set of published ports.
const WATCHED_EVENTS: &[&str] = &["start", "die", "kill", "stop", "destroy"];

pub struct DockerRuntime {
    socket: Option<String>,
}

impl DockerRuntime {
    pub fn new(socket: Option<String>) -> Self {
        Self { socket }
    }

    fn connect(&self) -> Result<Docker> {
        let docker = match &self.socket {
            Some(path) => Docker::connect_with_socket(path, 120, API_DEFAULT_VERSION)?,
            // Unix socket on Linux, honours DOCKER_HOST.
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(docker)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_desired_endpoints(&self) -> Result<DesiredState> {
        let docker = self.connect()?;
        let opts = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = docker.list_containers(Some(opts)).await?;
        debug!("Runtime reports {} containers", containers.len());

        let mut desired = DesiredState::new();
        for c in containers {
            let Some(id) = c.id.as_deref() else {
                continue;
            };
            let detail = docker.inspect_container(id, None).await?;
            let name = detail
                .name
                .as_deref()
                .map(|n| n.trim_start_matches('/'))
                .unwrap_or(id);
            collect_container(&mut desired, name, &detail);
        }
        Ok(desired)
    }

    async fn watch(&self, trigger_tx: mpsc::Sender<()>) -> anyhow::Result<()> {
        loop {
            let docker = match self.connect() {
                Ok(d) => d,
                Err(e) => {
                    error!("Failed to connect to Docker: {}. Retrying in 5s...", e);
                    sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let opts = EventsOptions::<String> {
                filters: [
                    ("type", ["container"].as_slice()),
                    ("event", WATCHED_EVENTS),
                ]
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect(),
                ..Default::default()
            };

            let mut stream = docker.events(Some(opts));

            info!("Listening for Docker events...");
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(event) => {
                        let action = event.action.unwrap_or_default();
                        let id = event.actor.and_then(|a| a.id).unwrap_or_default();
                        debug!("Container event: {} for {}", action, id);

                        if !trigger::notify(&trigger_tx) {
                            return Err(anyhow!("Trigger channel closed"));
                        }
                    }
                    Err(e) => {
                        error!("Error in Docker event stream: {}", e);
                        break; // Break inner loop to reconnect
                    }
                }
            }

            warn!("Docker event stream ended. Reconnecting in 2s...");
            sleep(Duration::from_secs(2)).await;
        }
    }
}
