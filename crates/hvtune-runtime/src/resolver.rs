//! Process resolution.
//!
//! Before the guest starts, the runtime management daemon running under
//! the launcher is the process whose limits are inherited by the guest
//! runtime it execs. After the start the guest runtime process itself is
//! the target.

use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;

use crate::error::{Result, RuntimeError};
use crate::isolation::IsolationResult;
use crate::procfs::{ProcFs, ProcessInfo};

/// Executable name prefixes of the guest runtime, in lookup order.
pub const GUEST_RUNTIME_PREFIXES: [&str; 2] = ["qemu-system", "qemu-kvm"];

/// Executable name of the pre-start supervisor.
pub const SUPERVISOR_EXECUTABLE: &str = "virtqemud";

/// A process found by tree search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedProcess {
    pub pid: i32,
    pub executable: String,
}

impl From<&ProcessInfo> for ResolvedProcess {
    fn from(info: &ProcessInfo) -> Self {
        Self {
            pid: info.pid,
            executable: info.executable.clone(),
        }
    }
}

/// Returns the direct and transitive children of `root`, in snapshot order.
#[must_use]
pub fn descendants(processes: &[ProcessInfo], root: i32) -> Vec<&ProcessInfo> {
    let mut members = BTreeSet::new();
    let mut queue = VecDeque::from([root]);
    while let Some(parent) = queue.pop_front() {
        for p in processes {
            // A pid re-parented onto its own subtree must not loop.
            if p.ppid == parent && p.pid != root && members.insert(p.pid) {
                queue.push_back(p.pid);
            }
        }
    }
    processes
        .iter()
        .filter(|p| members.contains(&p.pid))
        .collect()
}

/// Finds the guest runtime process anywhere below `ppid`.
///
/// Prefixes are tried in order; within a prefix the first process in
/// snapshot order wins.
#[must_use]
pub fn find_guest_runtime_process(processes: &[ProcessInfo], ppid: i32) -> Option<&ProcessInfo> {
    let children = descendants(processes, ppid);
    GUEST_RUNTIME_PREFIXES.iter().find_map(|prefix| {
        children
            .iter()
            .copied()
            .find(|p| p.executable.starts_with(prefix))
    })
}

/// Finds the supervisor among the direct children of `pid`.
#[must_use]
pub fn find_supervisor_process(processes: &[ProcessInfo], pid: i32) -> Option<&ProcessInfo> {
    processes
        .iter()
        .find(|p| p.ppid == pid && p.executable == SUPERVISOR_EXECUTABLE)
}

/// Resolves target processes from a live process listing.
#[derive(Debug, Clone, Default)]
pub struct ProcessResolver {
    procfs: ProcFs,
}

impl ProcessResolver {
    #[must_use]
    pub fn new(procfs: ProcFs) -> Self {
        Self { procfs }
    }

    #[must_use]
    pub fn procfs(&self) -> &ProcFs {
        &self.procfs
    }

    /// Returns the process whose memlock limit governs the guest.
    ///
    /// `Ok(None)` means the guest has not started and the supervisor has not
    /// been forked yet; the caller retries on its next pass.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::GuestProcessNotFound`] if the guest has
    /// started but no guest runtime process is below the launcher's parent.
    pub fn resolve(
        &self,
        isolation: &IsolationResult,
        started: bool,
    ) -> Result<Option<ResolvedProcess>> {
        if started {
            return self.guest_runtime_process(isolation).map(Some);
        }
        let processes = self.procfs.processes()?;
        let supervisor = find_supervisor_process(&processes, isolation.pid).map(ResolvedProcess::from);
        if supervisor.is_none() {
            tracing::debug!(launcher = isolation.pid, "supervisor not running yet");
        }
        Ok(supervisor)
    }

    /// Returns the running guest runtime process.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::GuestProcessNotFound`] if there is none.
    pub fn guest_runtime_process(&self, isolation: &IsolationResult) -> Result<ResolvedProcess> {
        let processes = self.procfs.processes()?;
        find_guest_runtime_process(&processes, isolation.ppid)
            .map(ResolvedProcess::from)
            .ok_or(RuntimeError::GuestProcessNotFound {
                ppid: isolation.ppid,
            })
    }

    /// Finds a process by exact executable name.
    ///
    /// # Errors
    ///
    /// Returns an error if the process listing fails.
    pub fn find_by_executable(&self, executable: &str) -> Result<Option<ResolvedProcess>> {
        let processes = self.procfs.processes()?;
        Ok(processes
            .iter()
            .find(|p| p.executable == executable)
            .map(ResolvedProcess::from))
    }
}
