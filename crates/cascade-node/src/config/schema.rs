use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use cascade_core::error::{CascadeError, Result};

/// Path every superior serves registrations under.
pub const REGISTER_PATH: &str = "/erwscascade/wsocket/register";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub version: u32,

    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub cinfo: ClientInfoSection,

    /// Superior nodes this node registers with.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    #[serde(default)]
    pub reconnect: ReconnectSection,

    #[serde(default)]
    pub rpc: RpcSection,

    #[serde(default)]
    pub relay: RelaySection,

    /// streamPath -> relay target url, started at boot.
    #[serde(default)]
    pub push: BTreeMap<String, String>,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(CascadeError::Config(format!(
                "unsupported config version: {}",
                self.version
            )));
        }

        self.node.validate()?;
        for s in &self.servers {
            s.validate()?;
        }
        self.reconnect.validate()?;
        self.rpc.validate()?;
        self.relay.validate()?;

        for (stream, target) in &self.push {
            if stream.is_empty() {
                return Err(CascadeError::Config("push stream path must not be empty".into()));
            }
            let url = Url::parse(target)
                .map_err(|e| CascadeError::Config(format!("push target {target}: {e}")))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(CascadeError::Config(format!(
                    "push target {target} must use ws or wss"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Base endpoint for relative proxy targets.
    #[serde(default = "default_local_api")]
    pub local_api: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            local_api: default_local_api(),
        }
    }
}

impl NodeSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if !(self.local_api.starts_with("http://") || self.local_api.starts_with("https://")) {
            return Err(CascadeError::Config(
                "node.local_api must start with http:// or https://".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|_| CascadeError::Config(format!("node.listen is not a socket address: {}", self.listen)))
    }
}

fn default_listen() -> String {
    "0.0.0.0:8450".into()
}
fn default_local_api() -> String {
    "http://127.0.0.1:8440".into()
}

/// Identity presented upward. An empty `cid` is generated at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientInfoSection {
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub serial: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, alias = "conextpath")]
    pub context_path: String,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.protocol.as_str(), "http" | "https" | "ws" | "wss") {
            return Err(CascadeError::Config(format!(
                "servers.protocol must be one of http/https/ws/wss, got {}",
                self.protocol
            )));
        }
        if self.host.is_empty() {
            return Err(CascadeError::Config("servers.host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(CascadeError::Config("servers.port must not be 0".into()));
        }
        if !self.context_path.is_empty() && !self.context_path.starts_with('/') {
            return Err(CascadeError::Config("servers.context_path must start with '/'".into()));
        }
        Ok(())
    }

    /// Registration url: `<ws|wss>://host[:port]<context_path>/erwscascade/wsocket/register?cid=<cid>`.
    /// The port is left out for 80 and 443.
    pub fn register_url(&self, cid: &str) -> Result<Url> {
        let scheme = match self.protocol.as_str() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        let authority = if self.port == 80 || self.port == 443 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        };
        let context = self.context_path.trim_end_matches('/');

        let mut url = Url::parse(&format!("{scheme}://{authority}{context}{REGISTER_PATH}"))
            .map_err(|e| CascadeError::Config(format!("bad server address {authority}: {e}")))?;
        url.query_pairs_mut().append_pair("cid", cid);
        Ok(url)
    }
}

fn default_protocol() -> String {
    "https".into()
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8440
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectSection {
    #[serde(default = "default_reconnect_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            interval_ms: default_reconnect_interval_ms(),
            jitter_ms: 0,
        }
    }
}

impl ReconnectSection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=600_000).contains(&self.interval_ms) {
            return Err(CascadeError::Config(
                "reconnect.interval_ms must be between 100 and 600000".into(),
            ));
        }
        if self.jitter_ms > self.interval_ms {
            return Err(CascadeError::Config(
                "reconnect.jitter_ms must not exceed interval_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcSection {
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

impl RpcSection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=300_000).contains(&self.timeout_ms) {
            return Err(CascadeError::Config(
                "rpc.timeout_ms must be between 100 and 300000".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            health_interval_ms: default_health_interval_ms(),
        }
    }
}

impl RelaySection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=600_000).contains(&self.health_interval_ms) {
            return Err(CascadeError::Config(
                "relay.health_interval_ms must be between 100 and 600000".into(),
            ));
        }
        Ok(())
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

fn default_health_interval_ms() -> u64 {
    15_000
}
