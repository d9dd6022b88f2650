//! Locating a guest's launcher on the host.
//!
//! Each guest is started by a launcher process that listens on a command
//! socket. The peer credentials of that socket give the launcher pid; its
//! parent and pid namespace come from procfs.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use hvtune_api::VirtualMachine;
use hvtune_error::CommonError;
use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use serde::Serialize;

use crate::error::{Result, RuntimeError};
use crate::procfs::ProcFs;

/// Default directory holding one launcher socket directory per guest.
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/kubevirt/sockets";

/// File name of the launcher command socket.
pub const LAUNCHER_SOCKET_NAME: &str = "sock";

/// Where a guest's launcher lives in the host process tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolationResult {
    /// Launcher pid.
    pub pid: i32,
    /// Parent of the launcher.
    pub ppid: i32,
    /// Pid namespace link, if it could be read.
    pub pid_namespace: Option<String>,
}

impl IsolationResult {
    #[must_use]
    pub fn new(pid: i32, ppid: i32) -> Self {
        Self {
            pid,
            ppid,
            pid_namespace: None,
        }
    }
}

/// Finds the launcher of a guest.
pub trait IsolationDetector: Send + Sync {
    /// Detects the launcher of `vm`.
    ///
    /// # Errors
    ///
    /// Returns an error if the launcher cannot be reached.
    fn detect(&self, vm: &VirtualMachine) -> Result<IsolationResult>;

    /// Detects the process serving `socket`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be reached.
    fn detect_for_socket(&self, socket: &Path) -> Result<IsolationResult>;
}

/// Detector that always returns the same result.
#[derive(Debug, Clone)]
pub struct StaticIsolationDetector {
    result: IsolationResult,
}

impl StaticIsolationDetector {
    #[must_use]
    pub fn new(result: IsolationResult) -> Self {
        Self { result }
    }
}

impl IsolationDetector for StaticIsolationDetector {
    fn detect(&self, _vm: &VirtualMachine) -> Result<IsolationResult> {
        Ok(self.result.clone())
    }

    fn detect_for_socket(&self, _socket: &Path) -> Result<IsolationResult> {
        Ok(self.result.clone())
    }
}

/// Detector that asks the kernel who serves the launcher socket.
#[derive(Debug, Clone)]
pub struct SocketIsolationDetector {
    socket_dir: PathBuf,
    procfs: ProcFs,
}

impl SocketIsolationDetector {
    #[must_use]
    pub fn new(socket_dir: impl Into<PathBuf>, procfs: ProcFs) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            procfs,
        }
    }

    /// Path of the command socket of `vm`.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest has no uid.
    pub fn socket_path(&self, vm: &VirtualMachine) -> Result<PathBuf> {
        if vm.metadata.uid.is_empty() {
            return Err(RuntimeError::isolation(vm.display_name(), "guest has no uid"));
        }
        Ok(self
            .socket_dir
            .join(&vm.metadata.uid)
            .join(LAUNCHER_SOCKET_NAME))
    }
}

impl IsolationDetector for SocketIsolationDetector {
    fn detect(&self, vm: &VirtualMachine) -> Result<IsolationResult> {
        let socket = self.socket_path(vm)?;
        self.detect_for_socket(&socket)
    }

    fn detect_for_socket(&self, socket: &Path) -> Result<IsolationResult> {
        let target = socket.display().to_string();
        let stream = UnixStream::connect(socket)
            .map_err(|e| RuntimeError::isolation(&target, format!("connect: {e}")))?;
        let creds = getsockopt(&stream, PeerCredentials)
            .map_err(|e| RuntimeError::isolation(&target, format!("peer credentials: {e}")))?;
        let pid = creds.pid();

        let process = self
            .procfs
            .process(pid)?
            .ok_or_else(|| CommonError::not_found(format!("launcher process {pid}")))?;
        let pid_namespace = match self.procfs.pid_namespace(pid) {
            Ok(ns) => Some(ns),
            Err(e) => {
                tracing::debug!(pid, error = %e, "pid namespace unavailable");
                None
            }
        };

        tracing::debug!(socket = %target, pid, ppid = process.ppid, "detected launcher");
        Ok(IsolationResult {
            pid,
            ppid: process.ppid,
            pid_namespace,
        })
    }
}
