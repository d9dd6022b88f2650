//! CLI settings.
//!
//! The cluster keys and the CLI's own sections share one file:
//!
//! ```toml
//! feature_gates = ["HyperVLayered"]
//! additional_guest_memory_overhead_ratio = "1.25"
//!
//! [host]
//! proc_root = "/proc"
//! socket_dir = "/var/run/kubevirt/sockets"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Sections can be overridden from the environment with `HVTUNE_` and a
//! double underscore between section and key, e.g. `HVTUNE_HOST__PROC_ROOT`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use hvtune_api::ClusterConfig;
use hvtune_api::config::SYSTEM_CONFIG_PATH;
use hvtune_runtime::isolation::DEFAULT_SOCKET_DIR;
use hvtune_runtime::procfs::PROC_ROOT;
use serde::{Deserialize, Serialize};

/// Everything the CLI reads from configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Settings {
    #[serde(flatten)]
    pub cluster: ClusterConfig,
    #[serde(flatten)]
    pub local: LocalSettings,
}

/// Sections owned by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub host: HostSettings,
    pub logging: LoggingSettings,
}

/// Where host state lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// proc filesystem mount point.
    pub proc_root: PathBuf,
    /// Directory holding launcher command sockets.
    pub socket_dir: PathBuf,
    /// Architecture used for overhead sizing. Defaults to the host's.
    pub arch: Option<String>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from(PROC_ROOT),
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            arch: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, or from the system file when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(SYSTEM_CONFIG_PATH));
        if path.is_some() && !file.exists() {
            anyhow::bail!("config file {} does not exist", file.display());
        }

        let cluster = match path {
            Some(p) => ClusterConfig::load_from(p),
            None => ClusterConfig::load(),
        }
        .context("failed to load cluster configuration")?;

        let local: LocalSettings = Figment::new()
            .merge(Serialized::defaults(LocalSettings::default()))
            .merge(Toml::file(file))
            .merge(
                Env::prefixed("HVTUNE_")
                    .filter(|key| {
                        let key = key.as_str().to_ascii_lowercase();
                        key.starts_with("host__") || key.starts_with("logging__")
                    })
                    .split("__"),
            )
            .extract()
            .context("failed to load host settings")?;

        Ok(Self { cluster, local })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hvtune.toml");
        std::fs::write(
            &path,
            r#"
feature_gates = ["ConfigurableHypervisor"]
hypervisor = "mshv"

[host]
proc_root = "/host/proc"
arch = "arm64"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.cluster.hypervisor.as_deref(), Some("mshv"));
        assert_eq!(settings.local.host.proc_root, PathBuf::from("/host/proc"));
        assert_eq!(settings.local.host.arch.as_deref(), Some("arm64"));
        assert_eq!(
            settings.local.host.socket_dir,
            PathBuf::from(DEFAULT_SOCKET_DIR)
        );
        assert_eq!(settings.local.logging.level, "info");
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
