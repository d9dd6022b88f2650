//! # hvtune-runtime
//!
//! Host-side tuning of guest runtime processes.
//!
//! Given a guest and the backend it runs on, this crate finds the right
//! host process and adjusts it:
//!
//! - [`ProcessResolver`]: supervisor before start, guest runtime after
//! - [`memlock`]: lockable memory limit for guests that pin memory
//! - [`housekeeping`]: cgroup placement and realtime scheduling of threads
//! - [`VirtRuntime`]: the per-backend entry points, built by [`virt_runtime_for`]
//!
//! Every operation is synchronous and is meant to be called once per
//! lifecycle event by an outer reconcile loop, which also owns retries.
//! Calls for the same guest must not overlap.

pub mod cgroup;
pub mod cpumask;
pub mod error;
pub mod housekeeping;
pub mod isolation;
pub mod memlock;
pub mod procfs;
pub mod resolver;
pub mod runtime;
pub mod sched;

pub use cgroup::{CgroupManager, CgroupV2Manager};
pub use cpumask::{CpuMask, parse_cpu_set_line};
pub use error::{Result, RuntimeError};
pub use isolation::{
    IsolationDetector, IsolationResult, SocketIsolationDetector, StaticIsolationDetector,
};
pub use memlock::{MemlockLimiter, PrlimitLimiter, adjust_memory_limit, memlock_limit};
pub use procfs::{ProcFs, ProcessInfo};
pub use resolver::{ProcessResolver, ResolvedProcess};
pub use runtime::{
    Adjustment, HostContext, HousekeepingReport, KvmRuntime, LayeredRuntime, RuntimeCore,
    VirtRuntime, virt_runtime_for,
};
pub use sched::{CpuAffinity, SystemScheduler, ThreadScheduler};
