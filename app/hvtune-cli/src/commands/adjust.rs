//! Memlock limit adjustment.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use hvtune_runtime::{Adjustment, virt_runtime_for};

use super::{CommandContext, LauncherArgs, read_vm};

/// Arguments for `hvtune adjust`.
#[derive(Debug, Args)]
pub struct AdjustArgs {
    /// Guest specification (JSON)
    pub vm: PathBuf,

    #[command(flatten)]
    pub launcher: LauncherArgs,
}

/// Raises the memlock limit of the guest's runtime process.
pub fn execute(ctx: &CommandContext, args: AdjustArgs) -> Result<()> {
    let vm = read_vm(&args.vm)?;
    let selection = ctx.select()?;
    let runtime = virt_runtime_for(&selection, ctx.host(&args.launcher)?);

    let adjustment = runtime
        .adjust_resources(&vm, &ctx.settings.cluster)
        .context("failed to adjust guest resources")?;

    ctx.emit(&adjustment, |adjustment| match adjustment {
        Adjustment::NotRequired => {
            println!("{}: memlock adjustment not required", vm.display_name());
        }
        Adjustment::Deferred { overhead, limit } => {
            println!(
                "{}: supervisor not started yet, limit {limit} (overhead {overhead}) deferred",
                vm.display_name()
            );
        }
        Adjustment::Applied {
            process,
            overhead,
            limit,
        } => {
            println!(
                "{}: set memlock of {} ({}) to {limit} (overhead {overhead})",
                vm.display_name(),
                process.pid,
                process.executable
            );
        }
    })
}
