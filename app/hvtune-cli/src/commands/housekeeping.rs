//! Thread placement for dedicated and realtime guests.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use hvtune_api::DomainDescriptor;
use hvtune_runtime::{CgroupV2Manager, virt_runtime_for};

use super::{CommandContext, LauncherArgs, read_vm};

/// Arguments for `hvtune housekeeping`.
#[derive(Debug, Args)]
pub struct HousekeepingArgs {
    /// Guest specification (JSON)
    pub vm: PathBuf,

    /// Launcher cgroup directory
    #[arg(long)]
    pub cgroup: PathBuf,

    /// Domain definition (JSON) carrying the emulator cpuset
    #[arg(long)]
    pub domain: Option<PathBuf>,

    #[command(flatten)]
    pub launcher: LauncherArgs,
}

/// Moves housekeeping threads and applies realtime scheduling.
pub fn execute(ctx: &CommandContext, args: HousekeepingArgs) -> Result<()> {
    let vm = read_vm(&args.vm)?;
    let domain: Option<DomainDescriptor> = args
        .domain
        .as_deref()
        .map(|path| {
            hvtune_api::read_json(path)
                .with_context(|| format!("failed to read domain {}", path.display()))
        })
        .transpose()?;

    let selection = ctx.select()?;
    let runtime = virt_runtime_for(&selection, ctx.host(&args.launcher)?);
    let cgroups = CgroupV2Manager::new(&args.cgroup);

    let report = runtime
        .handle_housekeeping(&vm, &cgroups, domain.as_ref())
        .context("failed to place guest threads")?;

    ctx.emit(&report, |report| {
        if report.skipped {
            println!("{}: guest already started, nothing to do", vm.display_name());
            return;
        }
        println!("Guest:              {}", vm.display_name());
        println!("Housekeeping:       {:?}", report.housekeeping_threads);
        println!("Realtime vCPUs:     {:?}", report.realtime_vcpu_threads);
        match report.pit_thread {
            Some(tid) => println!("PIT thread:         {tid}"),
            None => println!("PIT thread:         -"),
        }
    })
}
