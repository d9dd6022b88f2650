//! Thread scheduling policy and CPU affinity.

use std::collections::BTreeSet;
use std::io;

/// Priority given to realtime vCPU threads.
pub const VCPU_FIFO_PRIORITY: i32 = 1;

/// Priority given to the timer emulation thread of realtime guests.
pub const PIT_FIFO_PRIORITY: i32 = 2;

/// Set of host CPU ids a thread may run on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuAffinity(pub BTreeSet<usize>);

impl CpuAffinity {
    #[must_use]
    pub fn contains(&self, cpu: usize) -> bool {
        self.0.contains(&cpu)
    }
}

impl FromIterator<usize> for CpuAffinity {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Changes how host threads are scheduled.
pub trait ThreadScheduler: Send + Sync {
    /// Switches `tid` to `SCHED_FIFO` at `priority`.
    ///
    /// # Errors
    ///
    /// Returns the OS error of the underlying call.
    fn set_fifo(&self, tid: i32, priority: i32) -> io::Result<()>;

    /// Returns the CPU affinity of `tid`.
    ///
    /// # Errors
    ///
    /// Returns the OS error of the underlying call.
    fn affinity(&self, tid: i32) -> io::Result<CpuAffinity>;

    /// Restricts `tid` to `cpus`.
    ///
    /// # Errors
    ///
    /// Returns the OS error of the underlying call.
    fn set_affinity(&self, tid: i32, cpus: &CpuAffinity) -> io::Result<()>;
}

/// [`ThreadScheduler`] backed by the host kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemScheduler;

#[cfg(target_os = "linux")]
impl ThreadScheduler for SystemScheduler {
    fn set_fifo(&self, tid: i32, priority: i32) -> io::Result<()> {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        // SAFETY: `param` is valid for the duration of the call.
        let r = unsafe { libc::sched_setscheduler(tid, libc::SCHED_FIFO, &param) };
        if r != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn affinity(&self, tid: i32) -> io::Result<CpuAffinity> {
        use nix::sched::{CpuSet, sched_getaffinity};
        use nix::unistd::Pid;

        let set = sched_getaffinity(Pid::from_raw(tid)).map_err(io::Error::from)?;
        Ok((0..CpuSet::count())
            .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
            .collect())
    }

    fn set_affinity(&self, tid: i32, cpus: &CpuAffinity) -> io::Result<()> {
        use nix::sched::{CpuSet, sched_setaffinity};
        use nix::unistd::Pid;

        let mut set = CpuSet::new();
        for &cpu in &cpus.0 {
            set.set(cpu).map_err(io::Error::from)?;
        }
        sched_setaffinity(Pid::from_raw(tid), &set).map_err(io::Error::from)
    }
}

#[cfg(not(target_os = "linux"))]
impl ThreadScheduler for SystemScheduler {
    fn set_fifo(&self, _tid: i32, _priority: i32) -> io::Result<()> {
        Err(unsupported())
    }

    fn affinity(&self, _tid: i32) -> io::Result<CpuAffinity> {
        Err(unsupported())
    }

    fn set_affinity(&self, _tid: i32, _cpus: &CpuAffinity) -> io::Result<()> {
        Err(unsupported())
    }
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "thread scheduling is only available on Linux",
    )
}
