//! Scriptable runtime for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::ContainerRuntime;
use crate::error::{Result, SyncError};
use crate::types::DesiredState;

#[derive(Default)]
pub struct FakeRuntime {
    desired: Mutex<DesiredState>,
    failing: Mutex<bool>,
    delay: Option<Duration>,
    listings: AtomicUsize,
}

impl FakeRuntime {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// Replaces the ports published for `vhost`.
    pub fn set(&self, vhost: &str, ports: &[u16]) {
        self.desired
            .lock()
            .unwrap()
            .insert(vhost.to_string(), ports.iter().copied().collect());
    }

    pub fn clear(&self) {
        self.desired.lock().unwrap().clear();
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// How many times the desired state has been listed.
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_desired_endpoints(&self) -> Result<DesiredState> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if *self.failing.lock().unwrap() {
            return Err(SyncError::RuntimeQuery("docker unavailable".into()));
        }
        Ok(self.desired.lock().unwrap().clone())
    }

    async fn watch(&self, trigger_tx: mpsc::Sender<()>) -> anyhow::Result<()> {
        trigger_tx.closed().await;
        Ok(())
    }
}
