//! # hvtune-api
//!
//! Data model shared by the hvtune crates:
//!
//! - [`VirtualMachine`]: the guest specification read from the orchestration layer
//! - [`Quantity`]: byte quantities parsed from Kubernetes-style strings
//! - [`ClusterConfig`] / [`ClusterConfigProvider`]: feature gates and overrides
//! - [`DomainDescriptor`]: emulator pinning taken from the domain definition

pub mod config;
pub mod domain;
pub mod error;
pub mod quantity;
pub mod vm;

pub use config::{
    CONFIGURABLE_HYPERVISOR_GATE, ClusterConfig, ClusterConfigProvider, HYPERV_LAYERED_GATE,
    SharedClusterConfig,
};
pub use domain::{CpuTune, DomainDescriptor, EmulatorPin};
pub use error::{ApiError, Result};
pub use quantity::Quantity;
pub use vm::{
    Cpu, Devices, DomainSpec, Gpu, HostDevice, Interface, LaunchSecurity, Memory, ObjectMeta,
    Realtime, ResourceList, ResourceRequirements, Sev, Snp, SriovBinding, VirtualMachine,
    VmPhase, VmSpec, VmStatus,
};

/// Reads a JSON document from `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not match `T`.
pub fn read_json<T: serde::de::DeserializeOwned>(path: impl AsRef<std::path::Path>) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
