//! Cluster-wide configuration.
//!
//! The cluster configuration is loaded from multiple sources with the
//! following priority:
//!
//! 1. Environment variables (`HVTUNE_*`)
//! 2. Configuration file (`/etc/hvtune/config.toml` or an explicit path)
//! 3. Default values
//!
//! ## Example Configuration File
//!
//! ```toml
//! feature_gates = ["HyperVLayered"]
//! hypervisor = "kvm"
//! additional_guest_memory_overhead_ratio = "1.25"
//! ```
//!
//! Configuration can change while the process runs. Consumers read it
//! through [`ClusterConfigProvider`] on every call instead of keeping their
//! own copy.

use std::path::Path;
use std::sync::{Arc, RwLock};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Feature gate that switches every guest to the layered backend.
pub const HYPERV_LAYERED_GATE: &str = "HyperVLayered";

/// Feature gate that honours the `hypervisor` override.
pub const CONFIGURABLE_HYPERVISOR_GATE: &str = "ConfigurableHypervisor";

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/hvtune/config.toml";

/// Snapshot of the cluster configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Enabled feature gates.
    pub feature_gates: Vec<String>,
    /// Explicit hypervisor name, honoured with [`CONFIGURABLE_HYPERVISOR_GATE`].
    pub hypervisor: Option<String>,
    /// Decimal multiplier applied to the computed memory overhead.
    pub additional_guest_memory_overhead_ratio: Option<String>,
}

impl ClusterConfig {
    /// Loads configuration from the system file and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source exists but cannot be parsed.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Toml::file(SYSTEM_CONFIG_PATH)).map(Self::normalized)
    }

    /// Loads configuration from a specific file plus environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Self::figment(Toml::file(path)).map(Self::normalized)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(file)
            .merge(Env::prefixed("HVTUNE_").only(&[
                "feature_gates",
                "hypervisor",
                "additional_guest_memory_overhead_ratio",
            ]))
            .extract()
    }

    /// Treats blank optional strings as unset.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
        if blank(&self.hypervisor) {
            self.hypervisor = None;
        }
        if blank(&self.additional_guest_memory_overhead_ratio) {
            self.additional_guest_memory_overhead_ratio = None;
        }
        self
    }

    /// Returns a copy with `gate` enabled.
    #[must_use]
    pub fn with_feature_gate(mut self, gate: impl Into<String>) -> Self {
        let gate = gate.into();
        if !self.feature_gates.contains(&gate) {
            self.feature_gates.push(gate);
        }
        self
    }
}

/// Read access to the current cluster configuration.
pub trait ClusterConfigProvider: Send + Sync {
    /// Returns true if `gate` is enabled.
    fn feature_gate_enabled(&self, gate: &str) -> bool;

    /// Returns the explicit hypervisor name, if configured.
    fn hypervisor_name(&self) -> Option<String>;

    /// Returns the overhead ratio string, if configured.
    fn overhead_ratio(&self) -> Option<String>;
}

impl ClusterConfigProvider for ClusterConfig {
    fn feature_gate_enabled(&self, gate: &str) -> bool {
        self.feature_gates.iter().any(|g| g == gate)
    }

    fn hypervisor_name(&self) -> Option<String> {
        self.hypervisor.clone()
    }

    fn overhead_ratio(&self) -> Option<String> {
        self.additional_guest_memory_overhead_ratio.clone()
    }
}

/// Cluster configuration that can be replaced while readers hold it.
#[derive(Debug, Clone, Default)]
pub struct SharedClusterConfig {
    inner: Arc<RwLock<ClusterConfig>>,
}

impl SharedClusterConfig {
    #[must_use]
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Replaces the configuration. Readers see the new value on their next call.
    ///
    /// Blank optional strings are stored as unset.
    pub fn update(&self, config: ClusterConfig) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = config.normalized();
        tracing::debug!(gates = ?guard.feature_gates, "cluster configuration updated");
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn snapshot(&self) -> ClusterConfig {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ClusterConfigProvider for SharedClusterConfig {
    fn feature_gate_enabled(&self, gate: &str) -> bool {
        self.snapshot().feature_gate_enabled(gate)
    }

    fn hypervisor_name(&self) -> Option<String> {
        self.snapshot().hypervisor_name()
    }

    fn overhead_ratio(&self) -> Option<String> {
        self.snapshot().overhead_ratio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
feature_gates = ["HyperVLayered"]
additional_guest_memory_overhead_ratio = "1.5"
"#,
        )
        .unwrap();

        let config = ClusterConfig::load_from(&path).unwrap();
        assert!(config.feature_gate_enabled(HYPERV_LAYERED_GATE));
        assert_eq!(config.overhead_ratio().as_deref(), Some("1.5"));
        assert_eq!(config.hypervisor_name(), None);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClusterConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert!(config.feature_gates.is_empty());
    }

    #[test]
    fn test_blank_ratio_is_unset() {
        let config = ClusterConfig {
            additional_guest_memory_overhead_ratio: Some("  ".into()),
            hypervisor: Some(String::new()),
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.overhead_ratio(), None);
        assert_eq!(config.hypervisor_name(), None);
    }

    #[test]
    fn test_shared_config_observes_updates() {
        let shared = SharedClusterConfig::default();
        assert!(!shared.feature_gate_enabled(HYPERV_LAYERED_GATE));
        shared.update(ClusterConfig::default().with_feature_gate(HYPERV_LAYERED_GATE));
        assert!(shared.feature_gate_enabled(HYPERV_LAYERED_GATE));
    }
}
