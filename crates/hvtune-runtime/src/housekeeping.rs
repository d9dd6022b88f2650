//! Housekeeping and realtime tuning of guest runtime threads.
//!
//! Runs in the window between launcher start and the guest reaching the
//! running phase. Three independent steps:
//!
//! 1. Non-vCPU threads move into a `housekeeping` cpuset cgroup pinned to
//!    the emulator CPUs.
//! 2. vCPU threads selected by the realtime mask get `SCHED_FIFO` priority 1.
//! 3. The timer emulation (PIT) kernel thread gets `SCHED_FIFO` priority 2
//!    for realtime guests and follows vCPU 0's affinity.

use hvtune_api::DomainDescriptor;

use crate::cgroup::{CPUSET_SUBSYSTEM, CgroupManager, HOUSEKEEPING_CGROUP};
use crate::cpumask::{CPUSET_EXPANSION_LIMIT, CpuMask, parse_cpu_set_line};
use crate::error::{Result, RuntimeError};
use crate::procfs::{ProcFs, is_vcpu_thread_name};
use crate::sched::{PIT_FIFO_PRIORITY, ThreadScheduler, VCPU_FIFO_PRIORITY};

/// Kernel thread name prefix of the PIT emulation thread.
pub const PIT_THREAD_PREFIX: &str = "kvm-pit/";

/// Moves the non-vCPU threads of the launcher cgroup into the housekeeping
/// child and pins that child to the emulator CPUs.
///
/// Without an emulator pin in `domain` only the child is created.
/// Threads that exit during the walk are skipped. Returns the attached tids.
///
/// # Errors
///
/// Returns an error if a cgroup operation fails or the emulator cpuset is
/// malformed.
pub fn configure_housekeeping_cgroup(
    procfs: &ProcFs,
    cgroups: &dyn CgroupManager,
    domain: Option<&DomainDescriptor>,
) -> Result<Vec<i32>> {
    cgroups.create_child_cgroup(HOUSEKEEPING_CGROUP, CPUSET_SUBSYSTEM)?;

    let Some(cpuset) = domain.and_then(DomainDescriptor::emulator_cpuset) else {
        tracing::debug!("no emulator pin, leaving housekeeping cgroup empty");
        return Ok(Vec::new());
    };
    let cpus = parse_cpu_set_line(cpuset, CPUSET_EXPANSION_LIMIT)?;
    tracing::debug!(?cpus, "housekeeping cpus");
    cgroups.set_cpuset(HOUSEKEEPING_CGROUP, &cpus)?;

    let mut housekeeping = Vec::new();
    for tid in cgroups.cgroup_threads()? {
        let Some(thread) = procfs.process(tid)? else {
            tracing::debug!(tid, "thread exited before it could be classified");
            continue;
        };
        if is_vcpu_thread_name(&thread.executable) {
            continue;
        }
        housekeeping.push(tid);
    }

    tracing::debug!(tids = ?housekeeping, "housekeeping threads");
    for &tid in &housekeeping {
        cgroups.attach_tid(CPUSET_SUBSYSTEM, HOUSEKEEPING_CGROUP, tid)?;
    }
    Ok(housekeeping)
}

/// Switches the vCPU threads of `guest_pid` selected by `mask` to FIFO.
/// Returns the tids that were changed.
///
/// # Errors
///
/// Returns an error for a malformed mask or a refused scheduler change.
pub fn configure_vcpu_scheduler(
    procfs: &ProcFs,
    scheduler: &dyn ThreadScheduler,
    guest_pid: i32,
    mask: &str,
) -> Result<Vec<i32>> {
    let mask = CpuMask::parse(mask)?;
    let mut changed = Vec::new();
    for (vcpu, tid) in procfs.vcpu_threads(guest_pid)? {
        if !mask.is_enabled(vcpu) {
            continue;
        }
        scheduler
            .set_fifo(tid, VCPU_FIFO_PRIORITY)
            .map_err(|source| RuntimeError::Scheduler {
                tid,
                priority: VCPU_FIFO_PRIORITY,
                source,
            })?;
        tracing::debug!(vcpu, tid, "vcpu thread set to FIFO");
        changed.push(tid);
    }
    Ok(changed)
}

/// Finds the PIT kernel thread serving `guest_pid`.
///
/// The thread is named after the guest runtime's pid inside its namespace.
///
/// # Errors
///
/// Returns an error if procfs cannot be read.
pub fn find_pit_thread(procfs: &ProcFs, guest_pid: i32) -> Result<Option<i32>> {
    let Some(nspid) = procfs.nspid(guest_pid)? else {
        return Ok(None);
    };
    let name = format!("{PIT_THREAD_PREFIX}{nspid}");
    Ok(procfs
        .processes()?
        .into_iter()
        .find(|p| p.executable == name)
        .map(|p| p.pid))
}

/// Raises the PIT thread to FIFO priority 2 for realtime guests and gives
/// it the affinity of vCPU 0. Returns the PIT tid if one was found.
///
/// # Errors
///
/// Returns an error if a scheduler or affinity call is refused.
pub fn affine_pit_thread(
    procfs: &ProcFs,
    scheduler: &dyn ThreadScheduler,
    guest_pid: i32,
    realtime: bool,
) -> Result<Option<i32>> {
    let Some(pit) = find_pit_thread(procfs, guest_pid)? else {
        tracing::debug!(guest_pid, "no PIT thread");
        return Ok(None);
    };

    if realtime {
        scheduler
            .set_fifo(pit, PIT_FIFO_PRIORITY)
            .map_err(|source| RuntimeError::Scheduler {
                tid: pit,
                priority: PIT_FIFO_PRIORITY,
                source,
            })?;
    }

    let vcpus = procfs.vcpu_threads(guest_pid)?;
    let Some(&vcpu0) = vcpus.get(&0) else {
        return Ok(Some(pit));
    };
    let affinity = scheduler
        .affinity(vcpu0)
        .map_err(|source| RuntimeError::Affinity {
            action: "read",
            tid: vcpu0,
            source,
        })?;
    scheduler
        .set_affinity(pit, &affinity)
        .map_err(|source| RuntimeError::Affinity {
            action: "set",
            tid: pit,
            source,
        })?;
    tracing::debug!(pit, vcpu0, "PIT thread follows vcpu 0");
    Ok(Some(pit))
}
