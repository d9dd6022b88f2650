//! Backend selection.

use anyhow::Result;

use super::CommandContext;

/// Prints the hypervisor the current configuration selects.
pub fn execute(ctx: &CommandContext) -> Result<()> {
    let selection = ctx.select()?;
    tracing::debug!(
        hypervisor = %selection.descriptor.name,
        backend = %selection.backend,
        "selected hypervisor"
    );

    ctx.emit(&selection.descriptor, |descriptor| {
        println!("Backend:       {}", descriptor.backend);
        println!("Hypervisor:    {}", descriptor.name);
        println!("Device:        {}", descriptor.device_path);
        println!("Domain type:   {}", descriptor.domain_type);
        println!("Resource name: {}", descriptor.k8s_resource_name());
    })
}
