//! Registry client contract.
//!
//! The registry is a hierarchical key/value store laid out the way vulcand
//! reads it:
//!
//! ```text
//! <root>/<vhost>                                 directory, marks a known vhost
//! <root>/<vhost>/endpoints/<addr>-<port>   ->    http://<addr>:<port>
//! ```
//!
//! Every key is owned by exactly one (vhost, node, port) triple, so all
//! mutations are independent single-key writes.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Endpoint;

pub mod etcd;
#[cfg(test)]
pub mod memory;

pub use etcd::EtcdRegistry;

#[async_trait]
pub trait Registry: Send + Sync {
    /// Child keys directly under the root.  A missing root is an empty set.
    async fn list_vhosts(&self) -> Result<BTreeSet<String>>;

    /// Endpoints under `<root>/<vhost>/endpoints`.  A missing sub-tree is
    /// an empty set; keys that do not parse as `<addr>-<port>` are skipped.
    async fn list_endpoints(&self, vhost: &str) -> Result<BTreeSet<Endpoint>>;

    /// Creates or overwrites the endpoint key.
    async fn add_endpoint(&self, vhost: &str, endpoint: &Endpoint) -> Result<()>;

    /// Deletes the endpoint key.  Deleting an absent key succeeds.
    async fn remove_endpoint(&self, vhost: &str, endpoint: &Endpoint) -> Result<()>;

    /// Creates the vhost directory if it does not exist yet.
    async fn ensure_vhost(&self, vhost: &str) -> Result<()>;
}

/// Normalizes a configured root to `/a/b` form.
pub fn normalize_root(root: &str) -> String {
    let trimmed = root.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

pub(crate) fn vhost_path(root: &str, vhost: &str) -> String {
    format!("{}/{}", root, vhost)
}

pub(crate) fn endpoints_path(root: &str, vhost: &str) -> String {
    format!("{}/{}/endpoints", root, vhost)
}

pub(crate) fn endpoint_path(root: &str, vhost: &str, endpoint: &Endpoint) -> String {
    format!("{}/{}/endpoints/{}", root, vhost, endpoint.key())
}
