//! Reconciliation engine.
//!
//! A pass compares the ports local containers publish for each vhost with
//! the endpoints this node has registered, then writes the difference.
//! Ordering contract for a pass:
//!
//! * passes never overlap; a trigger arriving mid-pass waits for it,
//! * vhosts are visited one at a time, each diff read fresh,
//! * within a vhost every add is applied before any remove, so a port
//!   reassignment never leaves the vhost without a backend.
//!
//! Only keys carrying this node's address are ever written.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::error::{Result, SyncError, WriteFailure, WriteOp};
use crate::registry::Registry;
use crate::runtime::ContainerRuntime;
use crate::types::{is_valid_vhost, DesiredState, Endpoint, PassReport};

pub struct Reconciler {
    node: Ipv4Addr,
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<dyn Registry>,
    pass_timeout: Option<Duration>,
    pass_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        node: Ipv4Addr,
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            node,
            runtime,
            registry,
            pass_timeout: None,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn with_pass_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pass_timeout = timeout;
        self
    }

    /// Runs one pass.  `forced` adds a vhost to the pass even when nothing
    /// declares it, and makes sure its directory exists in the registry.
    pub async fn reconcile(&self, forced: Option<&str>) -> Result<PassReport> {
        if let Some(vhost) = forced {
            if !is_valid_vhost(vhost) {
                return Err(SyncError::InvalidVhost(vhost.to_string()));
            }
        }

        let _pass = self.pass_lock.lock().await;
        let result = match self.pass_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_pass(forced))
                .await
                .unwrap_or(Err(SyncError::Timeout(limit))),
            None => self.run_pass(forced).await,
        };

        match &result {
            Ok(report) => info!(
                "Reconciled {} vhosts: {} added, {} removed",
                report.vhosts,
                report.added.len(),
                report.removed.len()
            ),
            Err(e) => error!("Reconciliation failed: {}", e),
        }
        result
    }

    async fn run_pass(&self, forced: Option<&str>) -> Result<PassReport> {
        let desired = self.runtime.list_desired_endpoints().await?;
        let mut universe = self.registered_vhosts().await?;
        universe.extend(desired.keys().cloned());

        let mut failures = Vec::new();
        if let Some(vhost) = forced {
            // The directory is one more independent key; the rest of the
            // pass goes ahead if it cannot be created.
            if let Err(e) = self.registry.ensure_vhost(vhost).await {
                failures.push(self.write_failure(vhost, WriteOp::EnsureVhost, None, e));
            }
            universe.insert(vhost.to_string());
        }

        let mut report = PassReport {
            vhosts: universe.len(),
            ..Default::default()
        };
        for vhost in &universe {
            self.reconcile_vhost(vhost, &desired, &mut report, &mut failures)
                .await?;
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(SyncError::PartialApply(failures))
        }
    }

    /// Vhosts where this node already has at least one endpoint.  A vhost
    /// whose endpoints cannot be read is treated as not served here.
    async fn registered_vhosts(&self) -> Result<BTreeSet<String>> {
        let mut served = BTreeSet::new();
        for vhost in self.registry.list_vhosts().await? {
            match self.registry.list_endpoints(&vhost).await {
                Ok(endpoints) if endpoints.iter().any(|e| e.address == self.node) => {
                    served.insert(vhost);
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping vhost {} during discovery: {}", vhost, e),
            }
        }
        Ok(served)
    }

    async fn reconcile_vhost(
        &self,
        vhost: &str,
        desired: &DesiredState,
        report: &mut PassReport,
        failures: &mut Vec<WriteFailure>,
    ) -> Result<()> {
        let wanted = desired.get(vhost).cloned().unwrap_or_default();
        let active: BTreeSet<u16> = self
            .registry
            .list_endpoints(vhost)
            .await?
            .into_iter()
            .filter(|e| e.address == self.node)
            .map(|e| e.port)
            .collect();

        let (to_add, to_remove) = diff(&wanted, &active);
        if to_add.is_empty() && to_remove.is_empty() {
            debug!("{} is up to date", vhost);
            return Ok(());
        }
        info!(
            "{}: will add {:?}, will remove {:?}",
            vhost, to_add, to_remove
        );

        for port in to_add {
            let endpoint = Endpoint::new(self.node, port);
            match self.registry.add_endpoint(vhost, &endpoint).await {
                Ok(()) => report.added.push((vhost.to_string(), endpoint)),
                Err(e) => failures.push(self.write_failure(vhost, WriteOp::Add, Some(endpoint), e)),
            }
        }
        for port in to_remove {
            let endpoint = Endpoint::new(self.node, port);
            match self.registry.remove_endpoint(vhost, &endpoint).await {
                Ok(()) => report.removed.push((vhost.to_string(), endpoint)),
                Err(e) => {
                    failures.push(self.write_failure(vhost, WriteOp::Remove, Some(endpoint), e))
                }
            }
        }
        Ok(())
    }

    fn write_failure(
        &self,
        vhost: &str,
        op: WriteOp,
        endpoint: Option<Endpoint>,
        err: SyncError,
    ) -> WriteFailure {
        let failure = WriteFailure {
            vhost: vhost.to_string(),
            op,
            endpoint,
            reason: err.to_string(),
        };
        error!("Failed to {}", failure);
        failure
    }
}

/// Ports to add and ports to remove, both ascending.
pub fn diff(desired: &BTreeSet<u16>, active: &BTreeSet<u16>) -> (Vec<u16>, Vec<u16>) {
    (
        desired.difference(active).copied().collect(),
        active.difference(desired).copied().collect(),
    )
}
