//! Lockable memory limits.
//!
//! Guests with passthrough devices, realtime vCPUs or encrypted memory pin
//! all of their memory. The guest runtime process therefore needs a
//! `RLIMIT_MEMLOCK` that covers guest memory plus overhead.
//!
//! Concurrent adjustments of the same pid must be serialised by the caller.

use std::io;

use hvtune_api::{Quantity, VirtualMachine};

use crate::error::{Result, RuntimeError};

/// Sets the lockable memory limit of another process.
pub trait MemlockLimiter: Send + Sync {
    /// Sets both the soft and the hard `RLIMIT_MEMLOCK` of `pid` to `bytes`.
    ///
    /// # Errors
    ///
    /// Returns the OS error of the underlying call.
    fn set_memlock(&self, pid: i32, bytes: u64) -> io::Result<()>;
}

/// [`MemlockLimiter`] backed by `prlimit(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrlimitLimiter;

impl MemlockLimiter for PrlimitLimiter {
    #[cfg(target_os = "linux")]
    fn set_memlock(&self, pid: i32, bytes: u64) -> io::Result<()> {
        let limit = libc::rlimit {
            rlim_cur: bytes,
            rlim_max: bytes,
        };
        // SAFETY: `limit` is a valid rlimit for the duration of the call and
        // the old-limit pointer is null, which prlimit accepts.
        let r = unsafe { libc::prlimit(pid, libc::RLIMIT_MEMLOCK, &limit, std::ptr::null_mut()) };
        if r != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn set_memlock(&self, _pid: i32, _bytes: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "prlimit is only available on Linux",
        ))
    }
}

/// Returns true if `vm` pins its memory and needs a raised limit.
#[must_use]
pub fn needs_memlock_adjustment(vm: &VirtualMachine) -> bool {
    vm.has_isolated_devices() || vm.is_realtime_enabled() || vm.has_encrypted_launch()
}

/// Final limit: overhead plus guest memory rounded up to whole kilo units.
///
/// Guest memory goes through the kilo scale so that binary and decimal
/// spellings of the same amount give the same limit.
#[must_use]
pub fn memlock_limit(overhead: Quantity, guest_memory: Quantity) -> Quantity {
    overhead + guest_memory.round_up_to_kilo()
}

/// Applies `limit` to `pid`.
///
/// # Errors
///
/// Returns [`RuntimeError::Memlock`] carrying the pid and the attempted
/// value. The call is not retried.
pub fn adjust_memory_limit(limiter: &dyn MemlockLimiter, pid: i32, limit: Quantity) -> Result<()> {
    limiter
        .set_memlock(pid, limit.bytes())
        .map_err(|source| RuntimeError::Memlock {
            pid,
            limit: limit.bytes(),
            source,
        })?;
    tracing::debug!(pid, limit = limit.bytes(), "set memlock rlimit");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use hvtune_api::{Cpu, Interface, LaunchSecurity, Realtime, Sev, SriovBinding};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(i32, u64)>>,
        fail: bool,
    }

    impl MemlockLimiter for Recorder {
        fn set_memlock(&self, pid: i32, bytes: u64) -> io::Result<()> {
            self.calls.lock().unwrap().push((pid, bytes));
            if self.fail {
                return Err(io::Error::from_raw_os_error(libc::EPERM));
            }
            Ok(())
        }
    }

    #[test]
    fn test_needs_adjustment() {
        let mut vm = VirtualMachine::with_memory_request("vm", Quantity::gibibytes(1));
        assert!(!needs_memlock_adjustment(&vm));

        vm.spec.domain.cpu = Some(Cpu {
            dedicated_cpu_placement: true,
            ..Default::default()
        });
        assert!(!needs_memlock_adjustment(&vm));

        vm.spec.domain.cpu = Some(Cpu {
            realtime: Some(Realtime::default()),
            ..Default::default()
        });
        assert!(needs_memlock_adjustment(&vm));

        let mut vm = VirtualMachine::with_memory_request("vm", Quantity::gibibytes(1));
        vm.spec.domain.launch_security = Some(LaunchSecurity {
            sev: Some(Sev::default()),
            snp: None,
        });
        assert!(needs_memlock_adjustment(&vm));

        let mut vm = VirtualMachine::with_memory_request("vm", Quantity::gibibytes(1));
        vm.spec.domain.devices.interfaces.push(Interface {
            name: "sriov".into(),
            sriov: Some(SriovBinding {}),
        });
        assert!(needs_memlock_adjustment(&vm));
    }

    #[test]
    fn test_limit_scales_guest_memory_through_kilo() {
        let overhead = Quantity::mebibytes(300);
        let limit = memlock_limit(overhead, Quantity::gibibytes(1));
        assert_eq!(limit.bytes(), Quantity::mebibytes(300).bytes() + 1_073_742_000);

        let decimal = memlock_limit(overhead, Quantity::from_bytes(2_000_000_000));
        assert_eq!(decimal.bytes(), Quantity::mebibytes(300).bytes() + 2_000_000_000);
    }

    #[test]
    fn test_adjust_sets_value() {
        let recorder = Recorder::default();
        adjust_memory_limit(&recorder, 42, Quantity::from_bytes(4096)).unwrap();
        adjust_memory_limit(&recorder, 42, Quantity::from_bytes(4096)).unwrap();
        assert_eq!(*recorder.calls.lock().unwrap(), vec![(42, 4096), (42, 4096)]);
    }

    #[test]
    fn test_adjust_failure_names_pid_and_value() {
        let recorder = Recorder {
            fail: true,
            ..Default::default()
        };
        let err = adjust_memory_limit(&recorder, 77, Quantity::from_bytes(123_456)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("failed to set process 77 memlock rlimit to 123456"), "{msg}");
        assert_eq!(recorder.calls.lock().unwrap().len(), 1);
    }
}
