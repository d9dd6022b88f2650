//! Guest specification as handed over by the orchestration layer.
//!
//! Only the fields that influence hypervisor selection, memory overhead and
//! host scheduling are modelled. The orchestration layer owns these objects;
//! hvtune only reads them.

use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;

/// A virtual machine instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualMachine {
    pub metadata: ObjectMeta,
    pub spec: VmSpec,
    pub status: VmStatus,
}

/// Identity of a guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

/// Desired state of a guest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmSpec {
    pub domain: DomainSpec,
    /// Guest architecture (`amd64`, `arm64`, `s390x`). Empty means the host's.
    pub architecture: Option<String>,
}

/// Resources, CPU, memory and devices of a guest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainSpec {
    pub resources: ResourceRequirements,
    pub memory: Option<Memory>,
    pub cpu: Option<Cpu>,
    pub devices: Devices,
    pub launch_security: Option<LaunchSecurity>,
}

/// Pod-level resource requests and limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceRequirements {
    pub requests: ResourceList,
    pub limits: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceList {
    pub memory: Option<Quantity>,
}

/// Guest-visible memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Memory {
    /// Memory presented to the guest at boot.
    pub guest: Option<Quantity>,
    /// Upper bound the guest may grow to through memory hotplug.
    pub max_guest: Option<Quantity>,
}

/// CPU topology and placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cpu {
    pub cores: u32,
    pub sockets: u32,
    pub threads: u32,
    /// Pin every vCPU to a dedicated host CPU.
    pub dedicated_cpu_placement: bool,
    /// Give the emulator thread its own host CPU.
    pub isolate_emulator_thread: bool,
    pub realtime: Option<Realtime>,
}

/// Realtime tuning for vCPU threads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Realtime {
    /// libvirt-style vCPU mask, e.g. `0-3,^2`. Empty selects every vCPU.
    pub mask: Option<String>,
}

/// Devices attached to a guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Devices {
    pub gpus: Vec<Gpu>,
    pub host_devices: Vec<HostDevice>,
    pub interfaces: Vec<Interface>,
    /// `Some(false)` removes the default graphics device.
    pub autoattach_graphics_device: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Gpu {
    pub name: String,
    pub device_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostDevice {
    pub name: String,
    pub device_name: String,
}

/// Guest network interface. Only the SR-IOV binding matters here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Interface {
    pub name: String,
    pub sriov: Option<SriovBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SriovBinding {}

/// Memory encryption applied at guest launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchSecurity {
    pub sev: Option<Sev>,
    pub snp: Option<Snp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sev {
    pub policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snp {}

/// Observed state of a guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmStatus {
    pub phase: VmPhase,
}

/// Lifecycle phase of a guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmPhase {
    #[default]
    Pending,
    Scheduling,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl VmPhase {
    /// Returns true for phases the guest never leaves.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for VmPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Scheduling => "Scheduling",
            Self::Scheduled => "Scheduled",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

impl VirtualMachine {
    /// Creates a pending guest with the given name and a memory request.
    #[must_use]
    pub fn with_memory_request(name: impl Into<String>, memory: Quantity) -> Self {
        let mut vm = Self::default();
        vm.metadata.name = name.into();
        vm.spec.domain.resources.requests.memory = Some(memory);
        vm
    }

    /// `namespace/name`, for logs.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.metadata.namespace.is_empty() {
            self.metadata.name.clone()
        } else {
            format!("{}/{}", self.metadata.namespace, self.metadata.name)
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status.phase == VmPhase::Running
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.status.phase.is_final()
    }

    #[must_use]
    pub fn is_realtime_enabled(&self) -> bool {
        self.realtime().is_some()
    }

    /// Returns the realtime block, if requested.
    #[must_use]
    pub fn realtime(&self) -> Option<&Realtime> {
        self.spec.domain.cpu.as_ref().and_then(|c| c.realtime.as_ref())
    }

    #[must_use]
    pub fn is_cpu_dedicated(&self) -> bool {
        self.spec
            .domain
            .cpu
            .as_ref()
            .is_some_and(|c| c.dedicated_cpu_placement)
    }

    #[must_use]
    pub fn isolates_emulator_thread(&self) -> bool {
        self.spec
            .domain
            .cpu
            .as_ref()
            .is_some_and(|c| c.isolate_emulator_thread)
    }

    /// Returns true if any hardware is passed through to the guest
    /// (GPUs, host devices or SR-IOV interfaces).
    #[must_use]
    pub fn has_isolated_devices(&self) -> bool {
        let devices = &self.spec.domain.devices;
        !devices.gpus.is_empty()
            || !devices.host_devices.is_empty()
            || devices.interfaces.iter().any(|i| i.sriov.is_some())
    }

    /// Returns true if the guest launches with encrypted memory.
    #[must_use]
    pub fn has_encrypted_launch(&self) -> bool {
        self.spec
            .domain
            .launch_security
            .as_ref()
            .is_some_and(|ls| ls.sev.is_some() || ls.snp.is_some())
    }

    /// Returns true unless the default graphics device was switched off.
    #[must_use]
    pub fn has_graphics_device(&self) -> bool {
        self.spec.domain.devices.autoattach_graphics_device != Some(false)
    }

    /// Architecture requested by the guest, if set and not blank.
    #[must_use]
    pub fn architecture(&self) -> Option<&str> {
        self.spec
            .architecture
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }

    /// Number of vCPUs: sockets × cores × threads, each defaulting to 1.
    /// Clamps at `u64::MAX`.
    #[must_use]
    pub fn vcpu_count(&self) -> u64 {
        let Some(cpu) = &self.spec.domain.cpu else {
            return 1;
        };
        let or_one = |v: u32| u64::from(v.max(1));
        or_one(cpu.sockets)
            .saturating_mul(or_one(cpu.cores))
            .saturating_mul(or_one(cpu.threads))
    }

    /// Memory the guest may address.
    ///
    /// Precedence: `memory.maxGuest`, then `memory.guest`, then the memory
    /// resource request.
    #[must_use]
    pub fn guest_base_memory(&self) -> Option<Quantity> {
        let domain = &self.spec.domain;
        let memory = domain.memory.as_ref();
        memory
            .and_then(|m| m.max_guest)
            .or_else(|| memory.and_then(|m| m.guest))
            .or(domain.resources.requests.memory)
    }
}
