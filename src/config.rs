use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::SyncError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub interface: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_address: Option<Ipv4Addr>,
    pub bind_ip: IpAddr,
    pub listen_port: u16,
    pub etcd_endpoint: String,
    pub registry_root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<String>,
    pub watch_events: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resync_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_timeout_secs: Option<u64>,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "eth0".into(),
            node_address: None,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 34567,
            etcd_endpoint: "http://127.0.0.1:2379".into(),
            registry_root: "/vulcand/upstreams".into(),
            docker_socket: None,
            watch_events: true,
            resync_interval_secs: None,
            pass_timeout_secs: None,
            request_timeout_secs: 5,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("vhost-sync.toml"))
            .merge(Json::file("vhost-sync.json"))
            // Plain INTERFACE / PORT, as older deployments set them.
            .merge(Env::raw().only(&["INTERFACE"]))
            .merge(Env::raw().only(&["PORT"]).map(|_| "listen_port".into()))
            .merge(Env::prefixed("VHOST_SYNC_"))
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        if config.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.listen_port)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        self.resync_interval_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    pub fn pass_timeout(&self) -> Option<Duration> {
        self.pass_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The address this node registers its endpoints under: the explicit
    /// `node_address`, or else the first IPv4 address of `interface`.
    pub fn resolve_node_address(&self) -> Result<Ipv4Addr, SyncError> {
        if let Some(addr) = self.node_address {
            return Ok(addr);
        }
        let interfaces = if_addrs::get_if_addrs()
            .map_err(|e| SyncError::Configuration(format!("cannot list interfaces: {}", e)))?;
        first_ipv4(
            interfaces.iter().map(|i| (i.name.as_str(), i.ip())),
            &self.interface,
        )
        .ok_or_else(|| {
            SyncError::Configuration(format!(
                "interface {} not found or has no IPv4 address",
                self.interface
            ))
        })
    }
}

fn first_ipv4<'a>(
    addrs: impl IntoIterator<Item = (&'a str, IpAddr)>,
    interface: &str,
) -> Option<Ipv4Addr> {
    addrs
        .into_iter()
        .filter(|(name, _)| *name == interface)
        .find_map(|(_, ip)| match ip {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
}
