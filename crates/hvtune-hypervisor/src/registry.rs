//! Hypervisor registry.
//!
//! Maps a hypervisor name to the static facts needed to launch a guest on
//! it: the device node handed to the launcher, the domain type written into
//! the domain definition and the extended resource the scheduler accounts.
//!
//! The registry is an ordinary value built once at process start and shared
//! by reference. Nothing in the request path mutates it.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{HypervisorError, Result};

/// Name of the primary, hardware-accelerated backend.
pub const KVM: &str = "kvm";

/// Name of the secondary, layered backend.
pub const HYPERV_LAYERED: &str = "mshv";

/// Prefix of the extended resources that expose hypervisor devices.
pub const DEVICE_RESOURCE_PREFIX: &str = "devices.kubevirt.io";

/// Process model a backend runs guests with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// QEMU on `/dev/kvm`.
    Kvm,
    /// QEMU on the Microsoft hypervisor root partition (`/dev/mshv`).
    HyperVLayered,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kvm => write!(f, "kvm"),
            Self::HyperVLayered => write!(f, "hyperv-layered"),
        }
    }
}

/// Static description of a hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HypervisorDescriptor {
    /// Registry key, e.g. `kvm`.
    pub name: String,
    /// Device node the launcher needs, e.g. `/dev/kvm`.
    pub device_path: String,
    /// Domain type written into the domain definition.
    pub domain_type: String,
    /// Process model.
    pub backend: Backend,
}

impl HypervisorDescriptor {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        device_path: impl Into<String>,
        domain_type: impl Into<String>,
        backend: Backend,
    ) -> Self {
        Self {
            name: name.into(),
            device_path: device_path.into(),
            domain_type: domain_type.into(),
            backend,
        }
    }

    /// Descriptor of the primary backend.
    #[must_use]
    pub fn kvm() -> Self {
        Self::new(KVM, "/dev/kvm", "kvm", Backend::Kvm)
    }

    /// Descriptor of the layered backend.
    #[must_use]
    pub fn hyperv_layered() -> Self {
        Self::new(HYPERV_LAYERED, "/dev/mshv", "hyperv", Backend::HyperVLayered)
    }

    /// Extended resource name requested by the launcher pod.
    #[must_use]
    pub fn k8s_resource_name(&self) -> String {
        format!("{DEVICE_RESOURCE_PREFIX}/{}", self.name)
    }

    /// Device node name without the `/dev/` directory.
    #[must_use]
    pub fn device_name(&self) -> &str {
        self.device_path
            .rsplit_once('/')
            .map_or(self.device_path.as_str(), |(_, name)| name)
    }
}

/// Name-keyed table of hypervisor descriptors.
#[derive(Debug, Clone, Default)]
pub struct HypervisorRegistry {
    entries: BTreeMap<String, HypervisorDescriptor>,
}

impl HypervisorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in backends.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(HypervisorDescriptor::kvm());
        registry.register(HypervisorDescriptor::hyperv_layered());
        registry
    }

    /// Adds a descriptor.
    ///
    /// # Panics
    ///
    /// Panics if a descriptor with the same name is already registered.
    /// Registration happens once during process initialisation, so a
    /// duplicate is a programming error.
    pub fn register(&mut self, descriptor: HypervisorDescriptor) {
        assert!(
            !self.entries.contains_key(&descriptor.name),
            "hypervisor {} is already registered",
            descriptor.name
        );
        tracing::debug!(
            name = %descriptor.name,
            device = %descriptor.device_path,
            "registered hypervisor"
        );
        self.entries.insert(descriptor.name.clone(), descriptor);
    }

    /// Looks up a descriptor by name.
    pub fn get(&self, name: &str) -> Result<&HypervisorDescriptor> {
        self.entries
            .get(name)
            .ok_or_else(|| HypervisorError::NotFound(name.to_string()))
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterates descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &HypervisorDescriptor> {
        self.entries.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every descriptor. For test harnesses only.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
