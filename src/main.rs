//! Thin entry point around [`ultraplan_core`]. The CLI/TUI front-end that
//! drives real sessions is a separate, pluggable concern (the engine only
//! consumes terminal/workspace/PR-driver collaborators through narrow
//! interfaces) — this binary exposes just enough surface to inspect the
//! layered configuration the engine would load for a real run.

use clap::{Parser, Subcommand};
use ultraplan_core::config::SessionConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "ultraplan")]
#[command(about = "Coordination engine for multi-phase, multi-agent ultra-plan execution")]
#[command(version = VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective layered configuration (env > local > global > default)
    Config,

    /// Print version information
    Version,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Config => {
            let config = SessionConfig::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Version => {
            println!("ultraplan {VERSION}");
        }
    }
    Ok(())
}
