//! hvtune CLI - hypervisor selection and host tuning for guest runtimes.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{Cli, CommandContext, Commands};
use config::Settings;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    // Initialize logging based on debug flag
    let filter = if cli.debug {
        "hvtune=debug,hvtune_cli=debug,hvtune_hypervisor=debug,hvtune_runtime=debug".to_string()
    } else {
        settings.local.logging.level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.as_str().into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let ctx = CommandContext {
        settings,
        format: cli.format,
    };

    match cli.command {
        Commands::Select => commands::select::execute(&ctx),
        Commands::Overhead(args) => commands::overhead::execute(&ctx, args),
        Commands::Adjust(args) => commands::adjust::execute(&ctx, args),
        Commands::Housekeeping(args) => commands::housekeeping::execute(&ctx, args),
        Commands::Info => commands::info::execute(&ctx),
    }
}
