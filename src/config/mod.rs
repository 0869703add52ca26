// ABOUTME: Configuration types and parsing for jumpgate.yml.
// ABOUTME: Handles YAML parsing, defaults, discovery and path resolution.

mod init;
mod outbound;

pub use init::init_config;
pub use outbound::OutboundConfig;

use crate::error::{Error, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "jumpgate.yml";
pub const CONFIG_FILENAME_ALT: &str = "jumpgate.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".jumpgate/config.yml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listen", deserialize_with = "deserialize_listen")]
    pub listen: SocketAddr,

    /// Bastion host key, generated on first start when missing.
    #[serde(default = "default_host_key")]
    pub host_key: PathBuf,

    /// Credentials file with passwords, pinned host keys and the access list.
    pub credentials: PathBuf,

    #[serde(default = "default_inactivity_timeout", with = "humantime_serde")]
    pub inactivity_timeout: Duration,

    #[serde(default = "default_auth_rejection_time", with = "humantime_serde")]
    pub auth_rejection_time: Duration,

    #[serde(default)]
    pub outbound: OutboundConfig,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 2222))
}

fn default_host_key() -> PathBuf {
    PathBuf::from("jumpgate_host_ed25519")
}

fn default_inactivity_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_auth_rejection_time() -> Duration {
    Duration::from_secs(1)
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    /// Load a config file; relative paths inside it are taken relative to
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        match path.parent() {
            Some(base) => Ok(config.relative_to(base)),
            None => Ok(config),
        }
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    fn relative_to(mut self, base: &Path) -> Self {
        if self.host_key.is_relative() {
            self.host_key = base.join(&self.host_key);
        }
        if self.credentials.is_relative() {
            self.credentials = base.join(&self.credentials);
        }
        self
    }

    pub fn template() -> Self {
        Config {
            listen: default_listen(),
            host_key: default_host_key(),
            credentials: PathBuf::from("credentials.yml"),
            inactivity_timeout: default_inactivity_timeout(),
            auth_rejection_time: default_auth_rejection_time(),
            outbound: OutboundConfig::default(),
        }
    }
}

fn deserialize_listen<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse()
        .map_err(|_| serde::de::Error::custom(format!("invalid listen address: {s}")))
}
