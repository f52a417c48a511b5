use std::collections::BTreeSet;

use async_trait::async_trait;
use bollard::models::ContainerInspectResponse;
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{is_valid_vhost, DesiredState};

pub mod docker;
#[cfg(test)]
pub mod fake;

pub use docker::DockerRuntime;

/// Environment variable a container sets to join a virtual host.
pub const VHOST_ENV: &str = "VHOST";

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Inspect every container, stopped ones included, and collect the
    /// host-published ports of each one that declares a vhost.
    ///
    /// Containers are inspected one at a time.  Any failure aborts the
    /// whole listing.
    async fn list_desired_endpoints(&self) -> Result<DesiredState>;

    /// Send a trigger on the channel whenever a container starts or stops.
    /// Returns only when the channel is closed.
    async fn watch(&self, trigger_tx: mpsc::Sender<()>) -> anyhow::Result<()>;
}

/// Outcome of looking for `VHOST` in a container environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VhostDeclaration {
    Absent,
    Empty,
    Invalid(String),
    Declared(String),
}

/// Finds the `VHOST` entry in a Docker-style `KEY=VALUE` list.  Entries
/// without `=` are skipped.  The last `VHOST` entry wins.
pub fn declared_vhost<S: AsRef<str>>(env: &[S]) -> VhostDeclaration {
    let value = env
        .iter()
        .filter_map(|entry| entry.as_ref().split_once('='))
        .filter(|(key, _)| *key == VHOST_ENV)
        .map(|(_, value)| value)
        .last();

    match value {
        None => VhostDeclaration::Absent,
        Some(v) if v.trim().is_empty() => VhostDeclaration::Empty,
        Some(v) if !is_valid_vhost(v) => VhostDeclaration::Invalid(v.to_string()),
        Some(v) => VhostDeclaration::Declared(v.to_string()),
    }
}

/// Every host port bound in the container's port map.  Bindings without a
/// numeric host port, or bound to port 0, are ignored.
pub fn published_ports(detail: &ContainerInspectResponse) -> BTreeSet<u16> {
    detail
        .network_settings
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .into_iter()
        .flat_map(|ports| ports.values())
        .flatten()
        .flatten()
        .filter_map(|binding| binding.host_port.as_deref())
        .filter_map(|port| port.trim().parse::<u16>().ok())
        .filter(|port| *port != 0)
        .collect()
}

/// Merges one inspected container into the desired state.
pub(crate) fn collect_container(
    desired: &mut DesiredState,
    name: &str,
    detail: &ContainerInspectResponse,
) {
    let env = detail
        .config
        .as_ref()
        .and_then(|c| c.env.as_deref())
        .unwrap_or_default();

    match declared_vhost(env) {
        VhostDeclaration::Declared(vhost) => {
            let ports = published_ports(detail);
            debug!("Container {} declares {} with ports {:?}", name, vhost, ports);
            desired.entry(vhost).or_default().extend(ports);
        }
        VhostDeclaration::Empty => {
            debug!("Container {} has an empty {}", name, VHOST_ENV);
        }
        VhostDeclaration::Invalid(value) => {
            warn!("Container {} declares invalid vhost {:?}", name, value);
        }
        VhostDeclaration::Absent => {}
    }
}
