//! The slice of the hypervisor domain definition that host tuning reads.

use serde::{Deserialize, Serialize};

/// Domain definition produced by the guest launcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainDescriptor {
    pub name: String,
    pub cpu_tune: Option<CpuTune>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CpuTune {
    pub emulator_pin: Option<EmulatorPin>,
}

/// Host CPUs reserved for emulator and housekeeping threads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmulatorPin {
    /// cpuset list, e.g. `2-3,6`.
    pub cpuset: String,
}

impl DomainDescriptor {
    /// Returns the emulator pin cpuset, if the domain has one.
    #[must_use]
    pub fn emulator_cpuset(&self) -> Option<&str> {
        self.cpu_tune
            .as_ref()
            .and_then(|t| t.emulator_pin.as_ref())
            .map(|p| p.cpuset.as_str())
    }
}
