//! Backend selection from cluster configuration.

use std::sync::Arc;

use hvtune_api::{CONFIGURABLE_HYPERVISOR_GATE, ClusterConfigProvider, HYPERV_LAYERED_GATE};

use crate::error::Result;
use crate::registry::{Backend, HYPERV_LAYERED, HypervisorDescriptor, HypervisorRegistry, KVM};

/// Outcome of a selection: the backend family and its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypervisorSelection {
    pub backend: Backend,
    pub descriptor: HypervisorDescriptor,
}

/// Picks the hypervisor for guest creation and updates.
///
/// The decision is recomputed on every call so that configuration changes
/// take effect without invalidation.
#[derive(Debug, Clone)]
pub struct HypervisorSelector {
    registry: Arc<HypervisorRegistry>,
}

impl HypervisorSelector {
    #[must_use]
    pub fn new(registry: Arc<HypervisorRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &HypervisorRegistry {
        &self.registry
    }

    /// Returns the name the current configuration points at.
    ///
    /// 1. `HyperVLayered` gate enabled: the layered backend.
    /// 2. `ConfigurableHypervisor` gate enabled with a name configured: that name.
    /// 3. Otherwise the primary backend.
    #[must_use]
    pub fn selected_name(config: &dyn ClusterConfigProvider) -> String {
        if config.feature_gate_enabled(HYPERV_LAYERED_GATE) {
            return HYPERV_LAYERED.to_string();
        }
        if config.feature_gate_enabled(CONFIGURABLE_HYPERVISOR_GATE) {
            if let Some(name) = config.hypervisor_name() {
                return name;
            }
        }
        KVM.to_string()
    }

    /// Selects the hypervisor for the current configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HypervisorError::NotFound`](crate::HypervisorError::NotFound)
    /// if the configured name is not registered.
    pub fn select(&self, config: &dyn ClusterConfigProvider) -> Result<HypervisorSelection> {
        let name = Self::selected_name(config);
        let descriptor = self.registry.get(&name)?.clone();
        tracing::debug!(hypervisor = %descriptor.name, backend = %descriptor.backend, "selected hypervisor");
        Ok(HypervisorSelection {
            backend: descriptor.backend,
            descriptor,
        })
    }
}
