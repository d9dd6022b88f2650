//! Fakes shared by the runtime integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::Mutex;

use hvtune_api::{Cpu, HostDevice, Quantity, Realtime, VirtualMachine, VmPhase};
use hvtune_runtime::{
    CgroupManager, CpuAffinity, IsolationResult, MemlockLimiter, ProcFs, Result, ThreadScheduler,
};
use tempfile::TempDir;

/// Launcher pid in [`FakeProc::launcher_tree`].
pub const LAUNCHER_PID: i32 = 101;
/// Parent of the launcher.
pub const LAUNCHER_PPID: i32 = 100;
pub const SUPERVISOR_PID: i32 = 102;
pub const GUEST_PID: i32 = 103;
pub const PIT_PID: i32 = 500;

/// A proc tree in a temporary directory.
pub struct FakeProc {
    dir: TempDir,
}

impl FakeProc {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn procfs(&self) -> ProcFs {
        ProcFs::new(self.dir.path())
    }

    pub fn process(&self, pid: i32, ppid: i32, comm: &str) -> &Self {
        let path = self.dir.path().join(pid.to_string());
        fs::create_dir_all(&path).unwrap();
        fs::write(
            path.join("stat"),
            format!("{pid} ({comm}) S {ppid} {pid} {pid} 0 -1 4194560 0 0"),
        )
        .unwrap();
        self
    }

    /// Adds a thread to `pid`; the thread is also visible as `/<tid>`.
    pub fn thread(&self, pid: i32, tid: i32, comm: &str) -> &Self {
        let task = self.dir.path().join(format!("{pid}/task/{tid}"));
        fs::create_dir_all(&task).unwrap();
        fs::write(task.join("comm"), format!("{comm}\n")).unwrap();
        if tid != pid {
            self.process(tid, pid, comm);
        }
        self
    }

    pub fn status(&self, pid: i32, status: &str) -> &Self {
        fs::write(self.dir.path().join(format!("{pid}/status")), status).unwrap();
        self
    }

    pub fn remove(&self, pid: i32) -> &Self {
        fs::remove_dir_all(self.dir.path().join(pid.to_string())).unwrap();
        self
    }

    /// Launcher, supervisor and a started guest runtime with three vCPUs.
    pub fn launcher_tree() -> Self {
        let proc = Self::new();
        proc.process(1, 0, "systemd")
            .process(2, 0, "kthreadd")
            .process(LAUNCHER_PPID, 1, "conmon")
            .process(LAUNCHER_PID, LAUNCHER_PPID, "virt-launcher")
            .process(SUPERVISOR_PID, LAUNCHER_PID, "virtqemud")
            .process(GUEST_PID, SUPERVISOR_PID, "qemu-system-x86")
            .thread(GUEST_PID, GUEST_PID, "qemu-system-x86")
            .thread(GUEST_PID, 104, "CPU 0/KVM")
            .thread(GUEST_PID, 105, "CPU 1/KVM")
            .thread(GUEST_PID, 106, "CPU 2/KVM")
            .thread(GUEST_PID, 107, "IO iothread1")
            .status(GUEST_PID, "Name:\tqemu-system-x86\nNSpid:\t103\t7\n")
            .process(PIT_PID, 2, "kvm-pit/7");
        proc
    }

    /// Launcher only: the supervisor has not been forked yet.
    pub fn launcher_only() -> Self {
        let proc = Self::new();
        proc.process(1, 0, "systemd")
            .process(LAUNCHER_PPID, 1, "conmon")
            .process(LAUNCHER_PID, LAUNCHER_PPID, "virt-launcher");
        proc
    }
}

pub fn isolation() -> IsolationResult {
    IsolationResult::new(LAUNCHER_PID, LAUNCHER_PPID)
}

/// Records every limit set; optionally fails.
#[derive(Default)]
pub struct RecordingLimiter {
    pub calls: Mutex<Vec<(i32, u64)>>,
    pub fail_with: Option<i32>,
}

impl RecordingLimiter {
    pub fn calls(&self) -> Vec<(i32, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

impl MemlockLimiter for RecordingLimiter {
    fn set_memlock(&self, pid: i32, bytes: u64) -> io::Result<()> {
        self.calls.lock().unwrap().push((pid, bytes));
        match self.fail_with {
            Some(errno) => Err(io::Error::from_raw_os_error(errno)),
            None => Ok(()),
        }
    }
}

/// Scheduler that keeps policy and affinity in memory.
#[derive(Default)]
pub struct RecordingScheduler {
    pub fifo: Mutex<Vec<(i32, i32)>>,
    pub affinities: Mutex<HashMap<i32, CpuAffinity>>,
}

impl RecordingScheduler {
    pub fn with_affinity(self, tid: i32, cpus: &[usize]) -> Self {
        self.affinities
            .lock()
            .unwrap()
            .insert(tid, cpus.iter().copied().collect());
        self
    }

    pub fn fifo(&self) -> Vec<(i32, i32)> {
        self.fifo.lock().unwrap().clone()
    }

    pub fn affinity_of(&self, tid: i32) -> Option<CpuAffinity> {
        self.affinities.lock().unwrap().get(&tid).cloned()
    }
}

impl ThreadScheduler for RecordingScheduler {
    fn set_fifo(&self, tid: i32, priority: i32) -> io::Result<()> {
        self.fifo.lock().unwrap().push((tid, priority));
        Ok(())
    }

    fn affinity(&self, tid: i32) -> io::Result<CpuAffinity> {
        self.affinity_of(tid)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ESRCH))
    }

    fn set_affinity(&self, tid: i32, cpus: &CpuAffinity) -> io::Result<()> {
        self.affinities.lock().unwrap().insert(tid, cpus.clone());
        Ok(())
    }
}

/// In-memory cgroup.
#[derive(Default)]
pub struct MemoryCgroups {
    pub threads: Vec<i32>,
    pub created: Mutex<Vec<(String, String)>>,
    pub cpusets: Mutex<HashMap<String, Vec<u32>>>,
    pub attached: Mutex<Vec<(String, i32)>>,
}

impl MemoryCgroups {
    pub fn with_threads(threads: &[i32]) -> Self {
        Self {
            threads: threads.to_vec(),
            ..Default::default()
        }
    }

    pub fn attached(&self) -> Vec<i32> {
        self.attached.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

impl CgroupManager for MemoryCgroups {
    fn create_child_cgroup(&self, name: &str, subsystem: &str) -> Result<()> {
        self.created
            .lock()
            .unwrap()
            .push((name.to_string(), subsystem.to_string()));
        Ok(())
    }

    fn set_cpuset(&self, name: &str, cpus: &[u32]) -> Result<()> {
        self.cpusets
            .lock()
            .unwrap()
            .insert(name.to_string(), cpus.to_vec());
        Ok(())
    }

    fn cgroup_threads(&self) -> Result<Vec<i32>> {
        Ok(self.threads.clone())
    }

    fn attach_tid(&self, _subsystem: &str, name: &str, tid: i32) -> Result<()> {
        self.attached.lock().unwrap().push((name.to_string(), tid));
        Ok(())
    }
}

/// 1Gi guest with two cores.
pub fn plain_vm() -> VirtualMachine {
    let mut vm = VirtualMachine::with_memory_request("testvm", Quantity::gibibytes(1));
    vm.metadata.namespace = "default".into();
    vm.metadata.uid = "0d3b6a5e".into();
    vm.spec.domain.cpu = Some(Cpu {
        cores: 2,
        ..Default::default()
    });
    vm
}

pub fn passthrough_vm(phase: VmPhase) -> VirtualMachine {
    let mut vm = plain_vm();
    vm.spec.domain.devices.host_devices.push(HostDevice {
        name: "gpu".into(),
        device_name: "nvidia.com/GA100".into(),
    });
    vm.status.phase = phase;
    vm
}

pub fn realtime_vm(mask: Option<&str>, phase: VmPhase) -> VirtualMachine {
    let mut vm = plain_vm();
    vm.spec.domain.cpu = Some(Cpu {
        cores: 3,
        dedicated_cpu_placement: true,
        isolate_emulator_thread: true,
        realtime: Some(Realtime {
            mask: mask.map(str::to_string),
        }),
        ..Default::default()
    });
    vm.status.phase = phase;
    vm
}
