//! Node configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// TCP listen address (host:port, or :port for all interfaces)
    pub listen_addr: Option<String>,

    /// Peers to dial at startup
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,

    /// Node identifier; generated when absent
    pub node_id: Option<String>,

    /// 64-char hex encoding of the 32-byte mesh key
    pub key_hex: Option<String>,

    /// File holding the mesh key (raw 32 bytes, or 64 hex chars)
    pub key_file: Option<String>,

    /// Storage root directory
    pub storage_root: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
