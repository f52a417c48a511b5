//! Data structures shared by the runtime inspector, the registry client
//! and the reconciliation engine.
//!
//! An [`Endpoint`] is the unit stored in the registry: one host-published
//! port on one node.  Its registry key segment is `<addr>-<port>` and the
//! stored value is the URL the proxy dials.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;

/// Host-published ports per virtual host, as declared by local containers.
pub type DesiredState = BTreeMap<String, BTreeSet<u16>>;

/// A single backend instance: a port reachable on a node address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    /// Last path segment of the registry key, `<addr>-<port>`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.address, self.port)
    }

    /// Value stored under the key.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// Parses a key segment produced by [`Endpoint::key`].  Returns `None`
    /// for anything that is not exactly `<ipv4>-<port>`.
    pub fn parse_key(segment: &str) -> Option<Self> {
        let (addr, port) = segment.rsplit_once('-')?;
        Some(Self {
            address: addr.parse().ok()?,
            port: port.parse().ok()?,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A vhost is used verbatim as a registry path segment, so it must be
/// non-empty, free of `/`, and not a `.` or `..` segment, which URL path
/// handling would collapse into the parent.
pub fn is_valid_vhost(vhost: &str) -> bool {
    !vhost.is_empty()
        && !vhost.contains('/')
        && vhost != "."
        && vhost != ".."
        && vhost.trim() == vhost
}

/// Endpoints applied to the registry during one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Number of vhosts visited.
    pub vhosts: usize,
    pub added: Vec<(String, Endpoint)>,
    pub removed: Vec<(String, Endpoint)>,
}

impl PassReport {
    pub fn mutations(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}
