//! Memory overhead sizing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use hvtune_api::Quantity;
use hvtune_hypervisor::{OverheadBreakdown, overhead_breakdown, resources_for};
use hvtune_runtime::memlock_limit;
use serde::Serialize;

use super::{CommandContext, read_vm};

/// Arguments for `hvtune overhead`.
#[derive(Debug, Args)]
pub struct OverheadArgs {
    /// Guest specification (JSON)
    pub vm: PathBuf,

    /// Architecture to size for (defaults to the host's)
    #[arg(long)]
    pub arch: Option<String>,

    /// Overhead ratio, overriding the configured one
    #[arg(long)]
    pub ratio: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OverheadReport {
    vm: String,
    hypervisor: String,
    arch: String,
    breakdown: OverheadBreakdown,
    ratio: Option<String>,
    overhead: Quantity,
    /// Absent when the guest has no memory setting.
    memlock_limit: Option<Quantity>,
}

/// Computes and prints the overhead of a guest.
pub fn execute(ctx: &CommandContext, args: OverheadArgs) -> Result<()> {
    let vm = read_vm(&args.vm)?;
    let selection = ctx.select()?;
    let arch = ctx.arch(args.arch.as_deref(), Some(&vm));
    let ratio = args
        .ratio
        .or_else(|| ctx.settings.cluster.additional_guest_memory_overhead_ratio.clone());

    let resources = resources_for(&selection.descriptor);
    let overhead = resources
        .memory_overhead(&vm, &arch, ratio.as_deref())
        .context("failed to compute memory overhead")?;

    let report = OverheadReport {
        vm: vm.display_name(),
        hypervisor: selection.descriptor.name.clone(),
        breakdown: overhead_breakdown(&vm, &arch),
        arch,
        ratio,
        overhead,
        memlock_limit: vm
            .guest_base_memory()
            .map(|base| memlock_limit(overhead, base)),
    };

    ctx.emit(&report, |r| {
        println!("Guest:            {}", r.vm);
        println!("Hypervisor:       {}", r.hypervisor);
        println!("Arch:             {}", r.arch);
        println!();
        println!("{:<18} {:>14}", "TERM", "BYTES");
        let b = &r.breakdown;
        for (term, amount) in [
            ("pagetable", b.pagetable),
            ("processes", b.processes),
            ("vcpus", b.vcpus),
            ("graphics", b.graphics),
            ("firmware", b.firmware),
            ("isolated devices", b.isolated_devices),
            ("encrypted launch", b.encrypted_launch),
        ] {
            println!("{term:<18} {:>14}", amount.bytes());
        }
        println!();
        if let Some(ratio) = &r.ratio {
            println!("Ratio:            {ratio}");
        }
        println!("Overhead:         {}", r.overhead);
        match r.memlock_limit {
            Some(limit) => println!("Memlock limit:    {limit}"),
            None => println!("Memlock limit:    (guest has no memory setting)"),
        }
    })
}
