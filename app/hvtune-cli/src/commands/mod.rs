//! CLI command implementations.
//!
//! Commands are organized into:
//!
//! - Backend selection (`select`)
//! - Memory overhead sizing (`overhead`)
//! - Memlock limit adjustment (`adjust`)
//! - Thread placement for dedicated and realtime guests (`housekeeping`)
//! - Host and configuration summary (`info`)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hvtune_api::VirtualMachine;
use hvtune_hypervisor::arch::normalize_arch;
use hvtune_hypervisor::{HypervisorRegistry, HypervisorSelection, HypervisorSelector, host_arch};
use hvtune_runtime::{
    HostContext, IsolationDetector, IsolationResult, ProcFs, SocketIsolationDetector,
    StaticIsolationDetector,
};
use serde::Serialize;

use crate::config::Settings;

pub mod adjust;
pub mod housekeeping;
pub mod info;
pub mod overhead;
pub mod select;

/// hvtune - hypervisor selection and host tuning for guest runtimes
#[derive(Parser)]
#[command(name = "hvtune")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to /etc/hvtune/config.toml)
    #[arg(long, global = true, env = "HVTUNE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show the hypervisor the current configuration selects
    Select,

    /// Compute the memory overhead of a guest
    Overhead(overhead::OverheadArgs),

    /// Raise the memlock limit of a guest's runtime process
    Adjust(adjust::AdjustArgs),

    /// Place guest runtime threads for dedicated and realtime guests
    Housekeeping(housekeeping::HousekeepingArgs),

    /// Display host and configuration information
    Info,
}

/// How to find the guest's launcher.
#[derive(Debug, Args)]
pub struct LauncherArgs {
    /// Launcher command socket (defaults to the guest's socket under the socket dir)
    #[arg(long, conflicts_with = "pid")]
    pub socket: Option<PathBuf>,

    /// Launcher pid, skipping socket detection
    #[arg(long, requires = "ppid")]
    pub pid: Option<i32>,

    /// Parent pid of the launcher
    #[arg(long, requires = "pid")]
    pub ppid: Option<i32>,
}

/// State shared by the command handlers.
pub struct CommandContext {
    pub settings: Settings,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Registry with the built-in backends.
    pub fn selector(&self) -> HypervisorSelector {
        HypervisorSelector::new(Arc::new(HypervisorRegistry::with_defaults()))
    }

    pub fn select(&self) -> Result<HypervisorSelection> {
        self.selector()
            .select(&self.settings.cluster)
            .context("failed to select hypervisor")
    }

    /// Architecture used for sizing: the explicit one, then the guest's,
    /// then the configured one, then the host's.
    pub fn arch(&self, explicit: Option<&str>, vm: Option<&VirtualMachine>) -> String {
        explicit
            .or_else(|| vm.and_then(VirtualMachine::architecture))
            .or(self.settings.local.host.arch.as_deref())
            .map_or_else(|| host_arch(), normalize_arch)
            .to_string()
    }

    pub fn procfs(&self) -> ProcFs {
        ProcFs::new(&self.settings.local.host.proc_root)
    }

    /// Host context whose detector follows `launcher`.
    pub fn host(&self, launcher: &LauncherArgs) -> Result<HostContext> {
        let procfs = self.procfs();
        let socket_dir = &self.settings.local.host.socket_dir;
        let host =
            HostContext::system(procfs.clone(), socket_dir).with_arch(self.arch(None, None));

        let detector: Arc<dyn IsolationDetector> =
            match (launcher.pid, launcher.ppid, &launcher.socket) {
                (Some(pid), Some(ppid), _) => Arc::new(StaticIsolationDetector::new(
                    IsolationResult::new(pid, ppid),
                )),
                (_, _, Some(socket)) => {
                    let result = SocketIsolationDetector::new(socket_dir, procfs)
                        .detect_for_socket(socket)
                        .with_context(|| {
                            format!("failed to detect launcher on {}", socket.display())
                        })?;
                    Arc::new(StaticIsolationDetector::new(result))
                }
                _ => return Ok(host),
            };
        Ok(host.with_detector(detector))
    }

    /// Prints `value` as JSON, or runs `table` otherwise.
    pub fn emit<T: Serialize>(&self, value: &T, table: impl FnOnce(&T)) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(value).context("failed to serialize output")?
                );
            }
            OutputFormat::Table => table(value),
        }
        Ok(())
    }
}

/// Reads a guest specification.
pub fn read_vm(path: &Path) -> Result<VirtualMachine> {
    hvtune_api::read_json(path).with_context(|| format!("failed to read guest {}", path.display()))
}
