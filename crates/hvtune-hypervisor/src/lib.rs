//! # hvtune-hypervisor
//!
//! Hypervisor backends and what they cost.
//!
//! - [`HypervisorRegistry`]: name to descriptor table, built once at startup
//! - [`HypervisorSelector`]: picks the backend from the cluster configuration
//! - [`memory_overhead`]: additional memory a guest needs on the host
//! - [`LauncherResources`]: per-backend launcher facts
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use hvtune_api::{ClusterConfig, Quantity, VirtualMachine};
//! use hvtune_hypervisor::{HypervisorRegistry, HypervisorSelector, memory_overhead};
//!
//! let selector = HypervisorSelector::new(Arc::new(HypervisorRegistry::with_defaults()));
//! let selection = selector.select(&ClusterConfig::default()).unwrap();
//! assert_eq!(selection.descriptor.device_path, "/dev/kvm");
//!
//! let vm = VirtualMachine::with_memory_request("demo", Quantity::gibibytes(1));
//! let overhead = memory_overhead(&vm, "amd64", None).unwrap();
//! assert!(overhead > Quantity::mebibytes(200));
//! ```

pub mod arch;
pub mod error;
pub mod overhead;
pub mod registry;
pub mod resources;
pub mod selector;

pub use arch::host_arch;
pub use error::{HypervisorError, Result};
pub use overhead::{OverheadBreakdown, OverheadRatio, memory_overhead, overhead_breakdown};
pub use registry::{Backend, HypervisorDescriptor, HypervisorRegistry};
pub use resources::{KvmResources, LauncherResources, LayeredResources, resources_for};
pub use selector::{HypervisorSelection, HypervisorSelector};
