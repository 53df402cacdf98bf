//! Node config loader (strict parsing).

pub mod schema;

use std::fs;

use cascade_core::error::{CascadeError, Result};

pub use schema::{
    ClientInfoSection, NodeConfig, NodeSection, ReconnectSection, RelaySection, RpcSection,
    ServerConfig,
};

pub fn load_from_file(path: &str) -> Result<NodeConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| CascadeError::Config(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<NodeConfig> {
    let cfg: NodeConfig = serde_yaml::from_str(s)
        .map_err(|e| CascadeError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
