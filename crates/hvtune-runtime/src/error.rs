//! Error types for the runtime crate.

use std::path::PathBuf;

use hvtune_error::CommonError;
use hvtune_hypervisor::HypervisorError;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors raised while inspecting or tuning guest runtime processes.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Common errors (I/O, not found).
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Hypervisor selection or overhead error.
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    /// No guest runtime process below the launcher.
    #[error("no guest runtime process found under process {ppid} child processes")]
    GuestProcessNotFound { ppid: i32 },

    /// Setting the lockable memory limit failed.
    #[error("failed to set process {pid} memlock rlimit to {limit}: {source}")]
    Memlock {
        pid: i32,
        limit: u64,
        #[source]
        source: std::io::Error,
    },

    /// The whole resource adjustment for a guest failed.
    #[error("unable to adjust guest runtime memory limits for {vm}: {source}")]
    AdjustResources {
        vm: String,
        #[source]
        source: Box<RuntimeError>,
    },

    /// The guest sets neither guest memory nor a memory request.
    #[error("guest {0} has no memory size")]
    MissingGuestMemory(String),

    /// A realtime vCPU mask is malformed.
    #[error("invalid vcpu mask '{mask}': {reason}")]
    InvalidCpuMask { mask: String, reason: String },

    /// A cpuset list is malformed or too large.
    #[error("invalid cpuset '{value}': {reason}")]
    InvalidCpuSet { value: String, reason: String },

    /// Changing the scheduling policy of a thread failed.
    #[error("failed to set FIFO scheduling and priority {priority} for thread {tid}: {source}")]
    Scheduler {
        tid: i32,
        priority: i32,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing a thread's CPU affinity failed.
    #[error("failed to {action} CPU affinity of thread {tid}: {source}")]
    Affinity {
        action: &'static str,
        tid: i32,
        #[source]
        source: std::io::Error,
    },

    /// A cgroup file operation failed.
    #[error("cgroup operation on {} failed: {source}", path.display())]
    Cgroup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The launcher of a guest could not be located.
    #[error("isolation detection failed for {target}: {reason}")]
    Isolation { target: String, reason: String },
}

impl RuntimeError {
    pub(crate) fn invalid_cpu_mask(mask: &str, reason: impl Into<String>) -> Self {
        Self::InvalidCpuMask {
            mask: mask.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_cpu_set(value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidCpuSet {
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn isolation(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Isolation {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn cgroup(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Cgroup {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the guest runtime process was not found.
    #[must_use]
    pub fn is_process_not_found(&self) -> bool {
        match self {
            Self::GuestProcessNotFound { .. } => true,
            Self::AdjustResources { source, .. } => source.is_process_not_found(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::Io(err))
    }
}
