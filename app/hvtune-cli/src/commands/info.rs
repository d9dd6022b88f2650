//! Host and configuration summary.

use anyhow::{Context, Result};
use hvtune_hypervisor::{HypervisorDescriptor, HypervisorSelector};
use serde::Serialize;

use super::CommandContext;
use crate::config::Settings;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Info<'a> {
    version: &'static str,
    os: &'static str,
    arch: String,
    selected: String,
    hypervisors: Vec<&'a HypervisorDescriptor>,
    settings: &'a Settings,
}

/// Displays version, host and effective configuration.
pub fn execute(ctx: &CommandContext) -> Result<()> {
    let selector = ctx.selector();
    let mut hypervisors: Vec<_> = selector.registry().iter().collect();
    hypervisors.sort_by(|a, b| a.name.cmp(&b.name));

    let info = Info {
        version: env!("CARGO_PKG_VERSION"),
        os: std::env::consts::OS,
        arch: ctx.arch(None, None),
        selected: HypervisorSelector::selected_name(&ctx.settings.cluster),
        hypervisors,
        settings: &ctx.settings,
    };

    let config = toml::to_string_pretty(&ctx.settings).context("failed to render settings")?;
    ctx.emit(&info, |info| {
        println!("hvtune Version: {}", info.version);
        println!("OS: {}", info.os);
        println!("Arch: {}", info.arch);
        println!("Selected hypervisor: {}", info.selected);
        println!();
        println!("{:<8} {:<12} {:<16} {}", "NAME", "DEVICE", "BACKEND", "DOMAIN TYPE");
        for h in &info.hypervisors {
            println!(
                "{:<8} {:<12} {:<16} {}",
                h.name,
                h.device_path,
                h.backend.to_string(),
                h.domain_type
            );
        }
        println!();
        println!("Effective configuration:");
        print!("{config}");
    })
}
