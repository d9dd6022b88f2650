//! Read-only access to a proc filesystem.
//!
//! Every reader takes a root directory so tests can point it at a fake tree.
//! Processes and threads can exit between listing and reading; such entries
//! are skipped rather than reported.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Default mount point.
pub const PROC_ROOT: &str = "/proc";

/// One entry of a process listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    pub ppid: i32,
    /// Command name from `stat` (truncated by the kernel to 15 bytes).
    pub executable: String,
}

/// A proc filesystem rooted at a directory.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new(PROC_ROOT)
    }
}

impl ProcFs {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pid_dir(&self, pid: i32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    /// Lists every process, ordered by pid.
    ///
    /// # Errors
    ///
    /// Returns an error only if the root directory itself cannot be read.
    pub fn processes(&self) -> Result<Vec<ProcessInfo>> {
        let mut processes = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<i32>().ok()) else {
                continue;
            };
            match self.process(pid) {
                Ok(Some(info)) => processes.push(info),
                Ok(None) => {}
                Err(e) => tracing::trace!(pid, error = %e, "skipping unreadable process"),
            }
        }
        processes.sort_by_key(|p| p.pid);
        Ok(processes)
    }

    /// Reads one process (or thread) by id. `None` if it is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if `stat` exists but cannot be read or parsed.
    pub fn process(&self, pid: i32) -> Result<Option<ProcessInfo>> {
        let Some(stat) = read_optional(&self.pid_dir(pid).join("stat"))? else {
            tracing::trace!(pid, "process vanished");
            return Ok(None);
        };
        let (executable, ppid) = parse_stat(&stat).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed stat for process {pid}"),
            )
        })?;
        Ok(Some(ProcessInfo {
            pid,
            ppid,
            executable,
        }))
    }

    /// Lists the thread ids of `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the task directory cannot be read.
    pub fn thread_ids(&self, pid: i32) -> Result<Vec<i32>> {
        let mut tids: Vec<i32> = fs::read_dir(self.pid_dir(pid).join("task"))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        tids.sort_unstable();
        Ok(tids)
    }

    /// Reads the raw `comm` of a thread, trailing newline included.
    /// `None` if the thread is gone.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than the thread having exited.
    pub fn thread_comm(&self, pid: i32, tid: i32) -> Result<Option<String>> {
        let path = self
            .pid_dir(pid)
            .join("task")
            .join(tid.to_string())
            .join("comm");
        Ok(read_optional(&path)?)
    }

    /// Maps vCPU index to thread id for a guest runtime process.
    ///
    /// # Errors
    ///
    /// Returns an error if the task directory cannot be read.
    pub fn vcpu_threads(&self, pid: i32) -> Result<BTreeMap<u32, i32>> {
        let mut vcpus = BTreeMap::new();
        for tid in self.thread_ids(pid)? {
            let Some(comm) = self.thread_comm(pid, tid)? else {
                continue;
            };
            if let Some(index) = parse_vcpu_comm(&comm) {
                vcpus.insert(index, tid);
            }
        }
        Ok(vcpus)
    }

    /// Returns the pid of `pid` inside its own pid namespace.
    /// `None` if the process is gone or has no `NSpid` line.
    ///
    /// # Errors
    ///
    /// Returns an error if `status` exists but cannot be read.
    pub fn nspid(&self, pid: i32) -> Result<Option<i32>> {
        let status = read_optional(&self.pid_dir(pid).join("status"))?;
        Ok(status.as_deref().and_then(parse_nspid))
    }

    /// Returns the pid namespace link of `pid`, e.g. `pid:[4026531836]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be read.
    pub fn pid_namespace(&self, pid: i32) -> Result<String> {
        let target = fs::read_link(self.pid_dir(pid).join("ns").join("pid"))?;
        Ok(target.to_string_lossy().into_owned())
    }
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        // ESRCH shows up when the task exits while the file is open.
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Extracts the command name and parent pid from a `stat` line.
///
/// The command name may itself contain spaces and parentheses, so it spans
/// from the first `(` to the last `)`.
#[must_use]
pub fn parse_stat(stat: &str) -> Option<(String, i32)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    if close < open {
        return None;
    }
    let comm = &stat[open + 1..close];
    let mut rest = stat[close + 1..].split_whitespace();
    let _state = rest.next()?;
    let ppid = rest.next()?.parse().ok()?;
    Some((comm.to_string(), ppid))
}

/// Returns the vCPU index encoded in a thread `comm` of the form
/// `CPU <n>/KVM\n`.
#[must_use]
pub fn parse_vcpu_comm(comm: &str) -> Option<u32> {
    let index = comm.strip_suffix("/KVM\n")?.strip_prefix("CPU ")?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    index.parse().ok()
}

/// Returns true if a thread name belongs to a vCPU.
#[must_use]
pub fn is_vcpu_thread_name(comm: &str) -> bool {
    comm.contains("CPU ") && comm.contains("KVM")
}

/// Parses the `NSpid:` line of a `status` file.
///
/// With nested namespaces the line lists the host pid first and the
/// innermost pid after it; the first nested value is returned. A process
/// living in the initial namespace only has one value, which is returned.
#[must_use]
pub fn parse_nspid(status: &str) -> Option<i32> {
    let line = status.lines().find(|l| l.starts_with("NSpid:"))?;
    let fields: Vec<&str> = line.split_whitespace().skip(1).collect();
    let value = fields.get(1).or_else(|| fields.first())?;
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat() {
        let stat = "4242 (qemu-system-x86) S 4200 4242 4242 0 -1 4194560";
        assert_eq!(
            parse_stat(stat),
            Some(("qemu-system-x86".to_string(), 4200))
        );

        let stat = "17 (weird) (name)) R 1 17 17";
        assert_eq!(parse_stat(stat), Some(("weird) (name)".to_string(), 1)));

        assert_eq!(parse_stat("17 weird R 1"), None);
        assert_eq!(parse_stat("17 (short)"), None);
        assert_eq!(parse_stat("17 (bad) R x"), None);
    }

    #[test]
    fn test_parse_vcpu_comm() {
        assert_eq!(parse_vcpu_comm("CPU 0/KVM\n"), Some(0));
        assert_eq!(parse_vcpu_comm("CPU 12/KVM\n"), Some(12));
        assert_eq!(parse_vcpu_comm("CPU 0/KVM"), None);
        assert_eq!(parse_vcpu_comm("CPU /KVM\n"), None);
        assert_eq!(parse_vcpu_comm("CPU x/KVM\n"), None);
        assert_eq!(parse_vcpu_comm("IO mon_iothread\n"), None);
    }

    #[test]
    fn test_vcpu_thread_name() {
        assert!(is_vcpu_thread_name("CPU 1/KVM\n"));
        assert!(!is_vcpu_thread_name("qemu-system-x86\n"));
        assert!(!is_vcpu_thread_name("kvm-nx-lpage-re\n"));
    }

    #[test]
    fn test_parse_nspid() {
        let status = "Name:\tqemu-kvm\nPid:\t4242\nNSpid:\t4242\t87\nNSpgid:\t87\n";
        assert_eq!(parse_nspid(status), Some(87));

        assert_eq!(parse_nspid("NSpid:\t4242\n"), Some(4242));
        assert_eq!(parse_nspid("NSpid:\n"), None);
        assert_eq!(parse_nspid("NSpid"), None);
        assert_eq!(parse_nspid("Name:\tinit\n"), None);
        assert_eq!(parse_nspid("NSpid:\t1\tabc\n"), None);
    }

    #[test]
    fn test_process_listing_skips_vanished_entries() {
        let dir = tempfile::tempdir().unwrap();
        let proc = ProcFs::new(dir.path());

        fs::create_dir_all(dir.path().join("10")).unwrap();
        fs::write(dir.path().join("10/stat"), "10 (virt-launcher) S 1 10 10").unwrap();
        // directory without stat: exited between readdir and open
        fs::create_dir_all(dir.path().join("11")).unwrap();
        fs::create_dir_all(dir.path().join("self")).unwrap();

        let processes = proc.processes().unwrap();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].executable, "virt-launcher");
        assert_eq!(processes[0].ppid, 1);
        assert_eq!(proc.process(11).unwrap(), None);
    }

    #[test]
    fn test_vcpu_threads() {
        let dir = tempfile::tempdir().unwrap();
        let proc = ProcFs::new(dir.path());
        for (tid, comm) in [(50, "qemu-kvm\n"), (51, "CPU 0/KVM\n"), (52, "CPU 1/KVM\n")] {
            let task = dir.path().join(format!("50/task/{tid}"));
            fs::create_dir_all(&task).unwrap();
            fs::write(task.join("comm"), comm).unwrap();
        }
        // thread exited, comm gone
        fs::create_dir_all(dir.path().join("50/task/53")).unwrap();

        let vcpus = proc.vcpu_threads(50).unwrap();
        assert_eq!(vcpus.len(), 2);
        assert_eq!(vcpus[&0], 51);
        assert_eq!(vcpus[&1], 52);
    }
}
