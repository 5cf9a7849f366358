//! enginereg.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "enginereg.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// redb database file.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("enginereg.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LivenessConfig {
    /// A binding silent for longer than this is reported stale.
    pub stale_after_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// `tracing` filter directive, used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,enginereg=debug".to_string(),
        }
    }
}

impl RegistryConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RegistryConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat.interval_secs == 0 {
            anyhow::bail!("[heartbeat].interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Load `explicit` if given (it must exist), otherwise the default file
    /// if present, otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path)
                .map_err(|e| anyhow::anyhow!("load config {}: {e}", path.display())),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.liveness.stale_after_secs)
    }
}
