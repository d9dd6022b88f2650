//! Per-backend launcher resources.
//!
//! Each backend tells the launcher which device node to request, which
//! domain type to write and how much memory to reserve on top of the guest.

use hvtune_api::{Quantity, VirtualMachine};

use crate::error::Result;
use crate::overhead;
use crate::registry::{Backend, HypervisorDescriptor};

/// Launcher-facing facts that depend on the backend.
pub trait LauncherResources: Send + Sync {
    /// Descriptor of the hypervisor device.
    fn descriptor(&self) -> &HypervisorDescriptor;

    /// Extended resource requested for the hypervisor device.
    fn hypervisor_device(&self) -> String {
        self.descriptor().k8s_resource_name()
    }

    /// Domain type written into the domain definition.
    fn virt_type(&self) -> &str {
        &self.descriptor().domain_type
    }

    /// Memory reserved on top of the guest.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed overhead ratio.
    fn memory_overhead(
        &self,
        vm: &VirtualMachine,
        arch: &str,
        ratio: Option<&str>,
    ) -> Result<Quantity>;
}

/// Resources for guests on `/dev/kvm`.
#[derive(Debug, Clone)]
pub struct KvmResources {
    descriptor: HypervisorDescriptor,
}

impl KvmResources {
    #[must_use]
    pub fn new(descriptor: HypervisorDescriptor) -> Self {
        Self { descriptor }
    }
}

impl Default for KvmResources {
    fn default() -> Self {
        Self::new(HypervisorDescriptor::kvm())
    }
}

impl LauncherResources for KvmResources {
    fn descriptor(&self) -> &HypervisorDescriptor {
        &self.descriptor
    }

    fn memory_overhead(
        &self,
        vm: &VirtualMachine,
        arch: &str,
        ratio: Option<&str>,
    ) -> Result<Quantity> {
        overhead::memory_overhead(vm, arch, ratio)
    }
}

/// Resources for guests on the layered backend.
///
/// The guest runtime is the same QEMU process model, so the overhead is
/// the same as on KVM.
#[derive(Debug, Clone)]
pub struct LayeredResources {
    descriptor: HypervisorDescriptor,
}

impl LayeredResources {
    #[must_use]
    pub fn new(descriptor: HypervisorDescriptor) -> Self {
        Self { descriptor }
    }
}

impl Default for LayeredResources {
    fn default() -> Self {
        Self::new(HypervisorDescriptor::hyperv_layered())
    }
}

impl LauncherResources for LayeredResources {
    fn descriptor(&self) -> &HypervisorDescriptor {
        &self.descriptor
    }

    fn memory_overhead(
        &self,
        vm: &VirtualMachine,
        arch: &str,
        ratio: Option<&str>,
    ) -> Result<Quantity> {
        overhead::memory_overhead(vm, arch, ratio)
    }
}

/// Returns the launcher resources for a selected descriptor.
#[must_use]
pub fn resources_for(descriptor: &HypervisorDescriptor) -> Box<dyn LauncherResources> {
    match descriptor.backend {
        Backend::Kvm => Box::new(KvmResources::new(descriptor.clone())),
        Backend::HyperVLayered => Box::new(LayeredResources::new(descriptor.clone())),
    }
}
