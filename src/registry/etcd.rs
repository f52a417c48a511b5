//! Registry backed by the etcd v2 keys API.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;

use super::{endpoint_path, endpoints_path, normalize_root, vhost_path, Registry};
use crate::error::{Result, SyncError};
use crate::types::Endpoint;

const KEY_NOT_FOUND: u64 = 100;
const NOT_A_FILE: u64 = 102;
const NODE_EXIST: u64 = 105;

#[derive(Debug, Deserialize)]
struct KeysResponse {
    node: Option<Node>,
}

#[derive(Debug, Deserialize)]
struct Node {
    key: String,
    #[serde(default)]
    nodes: Vec<Node>,
}

impl Node {
    fn child_names(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .filter_map(|n| n.key.rsplit('/').next())
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct EtcdError {
    #[serde(rename = "errorCode")]
    error_code: u64,
    message: String,
}

pub struct EtcdRegistry {
    client: Client,
    base: Url,
    root: String,
}

impl EtcdRegistry {
    pub fn new(endpoint: &str, root: &str, request_timeout: Duration) -> Result<Self> {
        let base = Url::parse(endpoint)
            .map_err(|e| SyncError::Configuration(format!("invalid etcd endpoint {}: {}", endpoint, e)))?;
        if base.cannot_be_a_base() {
            return Err(SyncError::Configuration(format!(
                "invalid etcd endpoint {}",
                endpoint
            )));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Configuration(e.to_string()))?;
        Ok(Self {
            client,
            base,
            root: normalize_root(root),
        })
    }

    fn key_url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base was rejected in new().
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("v2")
                .push("keys")
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        url
    }

    /// Reads a node.  `Ok(None)` when the key does not exist.
    async fn get(&self, path: &str) -> Result<Option<Node>> {
        trace!("GET {}", path);
        let resp = self
            .client
            .get(self.key_url(path))
            .send()
            .await
            .map_err(|e| SyncError::RegistryRead(format!("GET {}: {}", path, e)))?;

        match etcd_status(resp).await {
            Ok(resp) => {
                let body: KeysResponse = resp
                    .json()
                    .await
                    .map_err(|e| SyncError::RegistryRead(format!("GET {}: {}", path, e)))?;
                Ok(body.node)
            }
            Err(EtcdFailure::Etcd(e)) if e.error_code == KEY_NOT_FOUND => Ok(None),
            Err(e) => Err(SyncError::RegistryRead(format!("GET {}: {}", path, e))),
        }
    }
}

#[async_trait]
impl Registry for EtcdRegistry {
    async fn list_vhosts(&self) -> Result<BTreeSet<String>> {
        let node = self.get(&self.root).await?;
        Ok(node
            .map(|n| n.child_names().map(str::to_string).collect())
            .unwrap_or_default())
    }

    async fn list_endpoints(&self, vhost: &str) -> Result<BTreeSet<Endpoint>> {
        let Some(node) = self.get(&endpoints_path(&self.root, vhost)).await? else {
            return Ok(BTreeSet::new());
        };
        let mut endpoints = BTreeSet::new();
        for name in node.child_names() {
            match Endpoint::parse_key(name) {
                Some(ep) => {
                    endpoints.insert(ep);
                }
                None => debug!("Skipping malformed endpoint key {} under {}", name, vhost),
            }
        }
        Ok(endpoints)
    }

    async fn add_endpoint(&self, vhost: &str, endpoint: &Endpoint) -> Result<()> {
        let path = endpoint_path(&self.root, vhost, endpoint);
        let resp = self
            .client
            .put(self.key_url(&path))
            .form(&[("value", endpoint.url())])
            .send()
            .await
            .map_err(|e| SyncError::RegistryWrite(format!("PUT {}: {}", path, e)))?;
        etcd_status(resp)
            .await
            .map(drop)
            .map_err(|e| SyncError::RegistryWrite(format!("PUT {}: {}", path, e)))
    }

    async fn remove_endpoint(&self, vhost: &str, endpoint: &Endpoint) -> Result<()> {
        let path = endpoint_path(&self.root, vhost, endpoint);
        let resp = self
            .client
            .delete(self.key_url(&path))
            .send()
            .await
            .map_err(|e| SyncError::RegistryWrite(format!("DELETE {}: {}", path, e)))?;
        match etcd_status(resp).await {
            Ok(_) => Ok(()),
            Err(EtcdFailure::Etcd(e)) if e.error_code == KEY_NOT_FOUND => Ok(()),
            Err(e) => Err(SyncError::RegistryWrite(format!("DELETE {}: {}", path, e))),
        }
    }

    async fn ensure_vhost(&self, vhost: &str) -> Result<()> {
        let path = vhost_path(&self.root, vhost);
        let resp = self
            .client
            .put(self.key_url(&path))
            .form(&[("dir", "true"), ("prevExist", "false")])
            .send()
            .await
            .map_err(|e| SyncError::RegistryWrite(format!("PUT {}: {}", path, e)))?;
        match etcd_status(resp).await {
            Ok(_) => Ok(()),
            Err(EtcdFailure::Etcd(e)) if matches!(e.error_code, NODE_EXIST | NOT_A_FILE) => Ok(()),
            Err(e) => Err(SyncError::RegistryWrite(format!("PUT {}: {}", path, e))),
        }
    }
}

enum EtcdFailure {
    Etcd(EtcdError),
    Http(StatusCode, String),
}

impl std::fmt::Display for EtcdFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EtcdFailure::Etcd(e) => write!(f, "etcd error {}: {}", e.error_code, e.message),
            EtcdFailure::Http(status, body) => write!(f, "HTTP {}: {}", status, body),
        }
    }
}

/// Splits a response into success or the etcd error it carries.
async fn etcd_status(resp: Response) -> std::result::Result<Response, EtcdFailure> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<EtcdError>(&body) {
        Ok(e) => Err(EtcdFailure::Etcd(e)),
        Err(_) => Err(EtcdFailure::Http(status, body)),
    }
}
