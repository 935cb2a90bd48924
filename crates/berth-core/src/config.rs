//! berth.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or rendering a `berth.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BerthConfig {
    pub state: StateConfig,
    pub docker: DockerConfig,
    pub ssh: SshConfig,
    pub hooks: HooksConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Path of the redb file holding container and node records.
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/berth/berth.redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Image namespace; app images are `{namespace}/{app}:{version}`.
    pub repository_namespace: String,
    /// Command the container runs on start.
    pub run_cmd: String,
    /// Port the application listens on inside the container.
    pub port: u16,
    /// Grace period given to a container before it is killed on stop.
    pub stop_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            repository_namespace: "berth".to_string(),
            run_cmd: "/var/lib/berth/start".to_string(),
            port: 8888,
            stop_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Login used for every remote-shell session into a container.
    pub user: String,
    pub identity_file: Option<PathBuf>,
    pub port: Option<u16>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "ubuntu".to_string(),
            identity_file: None,
            port: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Commands run inside every freshly started container, in order.
    pub post_start: Vec<Vec<String>>,
    /// Command that restarts the application inside a container.
    pub restart: Vec<String>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            post_start: vec![
                vec!["/var/lib/berth/serialize".to_string()],
                vec!["/var/lib/berth/restart".to_string()],
            ],
            restart: vec!["/var/lib/berth/restart".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Seconds between two reconciliation passes in `berthd run`.
    pub interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl BerthConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if it exists, otherwise fall back to the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Image reference for a given application revision.
    pub fn image_name(&self, app: &str, version: &str) -> String {
        format!("{}/{}:{}", self.docker.repository_namespace, app, version)
    }
}
