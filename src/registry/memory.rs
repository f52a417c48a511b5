//! In-memory registry used by the engine tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::Registry;
use crate::error::{Result, SyncError};
use crate::types::Endpoint;

#[derive(Default)]
pub struct MemoryRegistry {
    /// vhost -> endpoint -> stored url
    vhosts: Mutex<BTreeMap<String, BTreeMap<Endpoint, String>>>,
    writes: Mutex<Vec<String>>,
    failing_writes: Mutex<HashSet<(String, Endpoint)>>,
    failing_reads: Mutex<HashSet<String>>,
    failing_ensures: Mutex<HashSet<String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, vhost: &str, endpoint: Endpoint) {
        self.vhosts
            .lock()
            .unwrap()
            .entry(vhost.to_string())
            .or_default()
            .insert(endpoint, endpoint.url());
    }

    pub fn endpoints(&self, vhost: &str) -> BTreeMap<Endpoint, String> {
        self.vhosts
            .lock()
            .unwrap()
            .get(vhost)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_vhost(&self, vhost: &str) -> bool {
        self.vhosts.lock().unwrap().contains_key(vhost)
    }

    /// Mutations applied so far, as `add <vhost> <key>` / `remove <vhost> <key>`.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub fn fail_write(&self, vhost: &str, endpoint: Endpoint) {
        self.failing_writes
            .lock()
            .unwrap()
            .insert((vhost.to_string(), endpoint));
    }

    pub fn fail_ensure(&self, vhost: &str) {
        self.failing_ensures.lock().unwrap().insert(vhost.to_string());
    }

    pub fn fail_read(&self, vhost: &str) {
        self.failing_reads.lock().unwrap().insert(vhost.to_string());
    }

    fn check_write(&self, vhost: &str, endpoint: &Endpoint) -> Result<()> {
        if self
            .failing_writes
            .lock()
            .unwrap()
            .contains(&(vhost.to_string(), *endpoint))
        {
            return Err(SyncError::RegistryWrite("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn list_vhosts(&self) -> Result<BTreeSet<String>> {
        Ok(self.vhosts.lock().unwrap().keys().cloned().collect())
    }

    async fn list_endpoints(&self, vhost: &str) -> Result<BTreeSet<Endpoint>> {
        if self.failing_reads.lock().unwrap().contains(vhost) {
            return Err(SyncError::RegistryRead("injected failure".into()));
        }
        Ok(self.endpoints(vhost).into_keys().collect())
    }

    async fn add_endpoint(&self, vhost: &str, endpoint: &Endpoint) -> Result<()> {
        self.check_write(vhost, endpoint)?;
        self.insert(vhost, *endpoint);
        self.writes
            .lock()
            .unwrap()
            .push(format!("add {} {}", vhost, endpoint.key()));
        Ok(())
    }

    async fn remove_endpoint(&self, vhost: &str, endpoint: &Endpoint) -> Result<()> {
        self.check_write(vhost, endpoint)?;
        if let Some(endpoints) = self.vhosts.lock().unwrap().get_mut(vhost) {
            endpoints.remove(endpoint);
        }
        self.writes
            .lock()
            .unwrap()
            .push(format!("remove {} {}", vhost, endpoint.key()));
        Ok(())
    }

    async fn ensure_vhost(&self, vhost: &str) -> Result<()> {
        if self.failing_ensures.lock().unwrap().contains(vhost) {
            return Err(SyncError::RegistryWrite("injected failure".into()));
        }
        self.vhosts
            .lock()
            .unwrap()
            .entry(vhost.to_string())
            .or_default();
        Ok(())
    }
}
