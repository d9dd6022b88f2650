//! Backend runtimes.
//!
//! A [`VirtRuntime`] is what the node agent calls on guest lifecycle
//! events. Both backends run the same QEMU process model today, so they
//! share a [`RuntimeCore`] and differ only in the launcher resources they
//! were built with.

use std::sync::Arc;

use hvtune_api::{ClusterConfigProvider, DomainDescriptor, Quantity, VirtualMachine};
use hvtune_hypervisor::arch::normalize_arch;
use hvtune_hypervisor::{
    Backend, HypervisorDescriptor, HypervisorSelection, LauncherResources, host_arch,
    resources_for,
};
use serde::Serialize;

use crate::cgroup::CgroupManager;
use crate::error::{Result, RuntimeError};
use crate::housekeeping;
use crate::isolation::{IsolationDetector, SocketIsolationDetector};
use crate::memlock::{
    MemlockLimiter, PrlimitLimiter, adjust_memory_limit, memlock_limit, needs_memlock_adjustment,
};
use crate::procfs::ProcFs;
use crate::resolver::{ProcessResolver, ResolvedProcess};
use crate::sched::{SystemScheduler, ThreadScheduler};

/// Host facilities a runtime works through.
#[derive(Clone)]
pub struct HostContext {
    pub procfs: ProcFs,
    pub detector: Arc<dyn IsolationDetector>,
    pub limiter: Arc<dyn MemlockLimiter>,
    pub scheduler: Arc<dyn ThreadScheduler>,
    /// Architecture used for overhead calculation when the guest sets none.
    pub arch: String,
}

impl HostContext {
    /// Context backed by the real host.
    #[must_use]
    pub fn system(procfs: ProcFs, socket_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            detector: Arc::new(SocketIsolationDetector::new(socket_dir, procfs.clone())),
            procfs,
            limiter: Arc::new(PrlimitLimiter),
            scheduler: Arc::new(SystemScheduler),
            arch: host_arch().to_string(),
        }
    }

    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn IsolationDetector>) -> Self {
        self.detector = detector;
        self
    }

    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<dyn MemlockLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn ThreadScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    #[must_use]
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("procfs", &self.procfs)
            .field("arch", &self.arch)
            .finish_non_exhaustive()
    }
}

/// Outcome of a resource adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum Adjustment {
    /// The guest does not pin memory.
    NotRequired,
    /// The supervisor has not been forked yet; try again later.
    Deferred { overhead: Quantity, limit: Quantity },
    /// The limit was applied.
    Applied {
        process: ResolvedProcess,
        overhead: Quantity,
        limit: Quantity,
    },
}

/// What a housekeeping pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HousekeepingReport {
    /// The guest was running or finished, nothing was done.
    pub skipped: bool,
    pub housekeeping_threads: Vec<i32>,
    pub realtime_vcpu_threads: Vec<i32>,
    pub pit_thread: Option<i32>,
}

/// Operations the node agent runs for a guest.
pub trait VirtRuntime: Send + Sync {
    /// Backend this runtime serves.
    fn backend(&self) -> Backend;

    /// Raises the memlock limit of the guest's runtime process.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AdjustResources`] wrapping the failing step.
    fn adjust_resources(
        &self,
        vm: &VirtualMachine,
        config: &dyn ClusterConfigProvider,
    ) -> Result<Adjustment>;

    /// Places guest runtime threads for dedicated and realtime guests.
    ///
    /// # Errors
    ///
    /// Returns an error if a cgroup, scheduler or procfs step fails.
    fn handle_housekeeping(
        &self,
        vm: &VirtualMachine,
        cgroups: &dyn CgroupManager,
        domain: Option<&DomainDescriptor>,
    ) -> Result<HousekeepingReport>;
}

/// Logic shared by every backend runtime.
pub struct RuntimeCore {
    host: HostContext,
    resources: Box<dyn LauncherResources>,
    resolver: ProcessResolver,
}

impl RuntimeCore {
    #[must_use]
    pub fn new(host: HostContext, resources: Box<dyn LauncherResources>) -> Self {
        let resolver = ProcessResolver::new(host.procfs.clone());
        Self {
            host,
            resources,
            resolver,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &HypervisorDescriptor {
        self.resources.descriptor()
    }

    /// Memory overhead plus guest memory for `vm`.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed ratio or a guest without memory.
    pub fn memlock_target(
        &self,
        vm: &VirtualMachine,
        ratio: Option<&str>,
    ) -> Result<(Quantity, Quantity)> {
        let base = vm
            .guest_base_memory()
            .ok_or_else(|| RuntimeError::MissingGuestMemory(vm.display_name()))?;
        let arch = vm.architecture().map_or(self.host.arch.as_str(), normalize_arch);
        let overhead = self.resources.memory_overhead(vm, arch, ratio)?;
        Ok((overhead, memlock_limit(overhead, base)))
    }

    /// Computes, resolves and applies, in that order.
    ///
    /// # Errors
    ///
    /// Returns the first failing step, wrapped with the guest name.
    pub fn adjust_resources(
        &self,
        vm: &VirtualMachine,
        config: &dyn ClusterConfigProvider,
    ) -> Result<Adjustment> {
        self.adjust_memlock(vm, config.overhead_ratio().as_deref())
            .map_err(|source| RuntimeError::AdjustResources {
                vm: vm.display_name(),
                source: Box::new(source),
            })
    }

    fn adjust_memlock(&self, vm: &VirtualMachine, ratio: Option<&str>) -> Result<Adjustment> {
        if !needs_memlock_adjustment(vm) {
            tracing::trace!(vm = %vm.display_name(), "memlock adjustment not required");
            return Ok(Adjustment::NotRequired);
        }

        let (overhead, limit) = self.memlock_target(vm, ratio)?;

        let isolation = self.host.detector.detect(vm)?;
        let Some(process) = self.resolver.resolve(&isolation, vm.is_running())? else {
            tracing::info!(
                vm = %vm.display_name(),
                launcher = isolation.pid,
                "supervisor not started, deferring memlock adjustment"
            );
            return Ok(Adjustment::Deferred { overhead, limit });
        };

        adjust_memory_limit(self.host.limiter.as_ref(), process.pid, limit)?;
        tracing::info!(
            vm = %vm.display_name(),
            pid = process.pid,
            executable = %process.executable,
            limit = limit.bytes(),
            "memlock rlimit adjusted"
        );
        Ok(Adjustment::Applied {
            process,
            overhead,
            limit,
        })
    }

    /// Runs the housekeeping steps while the guest is starting.
    ///
    /// # Errors
    ///
    /// Returns the first failing step.
    pub fn handle_housekeeping(
        &self,
        vm: &VirtualMachine,
        cgroups: &dyn CgroupManager,
        domain: Option<&DomainDescriptor>,
    ) -> Result<HousekeepingReport> {
        let mut report = HousekeepingReport::default();
        if vm.is_running() || vm.is_final() {
            tracing::trace!(vm = %vm.display_name(), phase = %vm.status.phase, "housekeeping skipped");
            report.skipped = true;
            return Ok(report);
        }

        let procfs = &self.host.procfs;
        let dedicated = vm.is_cpu_dedicated();

        if dedicated && vm.isolates_emulator_thread() {
            report.housekeeping_threads =
                housekeeping::configure_housekeeping_cgroup(procfs, cgroups, domain)?;
        }

        let realtime = vm.realtime();
        if realtime.is_none() && !dedicated {
            return Ok(report);
        }

        let isolation = self.host.detector.detect(vm)?;
        let guest = self.resolver.guest_runtime_process(&isolation)?;
        let scheduler = self.host.scheduler.as_ref();

        if let Some(realtime) = realtime {
            tracing::info!(vm = %vm.display_name(), "configuring vcpus for realtime workloads");
            let mask = realtime.mask.as_deref().unwrap_or_default();
            report.realtime_vcpu_threads =
                housekeeping::configure_vcpu_scheduler(procfs, scheduler, guest.pid, mask)?;
        }
        if dedicated {
            tracing::debug!(vm = %vm.display_name(), "affining PIT thread");
            report.pit_thread =
                housekeeping::affine_pit_thread(procfs, scheduler, guest.pid, realtime.is_some())?;
        }
        Ok(report)
    }
}

/// Runtime for guests on `/dev/kvm`.
pub struct KvmRuntime {
    core: RuntimeCore,
}

impl KvmRuntime {
    #[must_use]
    pub fn new(core: RuntimeCore) -> Self {
        Self { core }
    }
}

impl VirtRuntime for KvmRuntime {
    fn backend(&self) -> Backend {
        Backend::Kvm
    }

    fn adjust_resources(
        &self,
        vm: &VirtualMachine,
        config: &dyn ClusterConfigProvider,
    ) -> Result<Adjustment> {
        self.core.adjust_resources(vm, config)
    }

    fn handle_housekeeping(
        &self,
        vm: &VirtualMachine,
        cgroups: &dyn CgroupManager,
        domain: Option<&DomainDescriptor>,
    ) -> Result<HousekeepingReport> {
        self.core.handle_housekeeping(vm, cgroups, domain)
    }
}

/// Runtime for guests on the layered backend.
///
/// Memory locking and thread placement match KVM for now.
pub struct LayeredRuntime {
    core: RuntimeCore,
}

impl LayeredRuntime {
    #[must_use]
    pub fn new(core: RuntimeCore) -> Self {
        Self { core }
    }
}

impl VirtRuntime for LayeredRuntime {
    fn backend(&self) -> Backend {
        Backend::HyperVLayered
    }

    fn adjust_resources(
        &self,
        vm: &VirtualMachine,
        config: &dyn ClusterConfigProvider,
    ) -> Result<Adjustment> {
        self.core.adjust_resources(vm, config)
    }

    fn handle_housekeeping(
        &self,
        vm: &VirtualMachine,
        cgroups: &dyn CgroupManager,
        domain: Option<&DomainDescriptor>,
    ) -> Result<HousekeepingReport> {
        self.core.handle_housekeeping(vm, cgroups, domain)
    }
}

/// Builds the runtime for a selected backend.
#[must_use]
pub fn virt_runtime_for(selection: &HypervisorSelection, host: HostContext) -> Box<dyn VirtRuntime> {
    let core = RuntimeCore::new(host, resources_for(&selection.descriptor));
    match selection.backend {
        Backend::Kvm => Box::new(KvmRuntime::new(core)),
        Backend::HyperVLayered => Box::new(LayeredRuntime::new(core)),
    }
}
