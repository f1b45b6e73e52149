//! tensorpack CLI
//!
//! Plans reduce layers against a simulated OpenCL device and prints the
//! chosen kernel, geometry and bound arguments.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tensorpack_common::{init_logging, LogFormat, ReduceAccelConfig};
use tracing::{debug, error};

mod commands;

use commands::PlanCommand;

/// tensorpack - OpenCL reduce planner
#[derive(Parser)]
#[command(name = "tensorpack")]
#[command(about = "Inspect OpenCL reduce-layer execution plans")]
#[command(long_about = r#"
Plans a reduce layer for the packed NC4HW4 image layout and shows the kernel
variant, work sizes and argument list it would launch with.

Examples:
  # Channel reduction of a 512-channel vector
  tensorpack plan --shape 1,512,1,1 --axes 1

  # Drop the reduced axes and emit JSON
  tensorpack plan --shape 2,4,3,3 --axes 0,2 --drop-dims --json
"#)]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML with a [reduce] table)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, value_name = "FORMAT", global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a reduce layer and print the result
    Plan(PlanCommand),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration as TOML
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_configuration(cli.config.as_deref())?;
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.to_string());
    init_logging(&level, cli.log_format).map_err(|e| anyhow::anyhow!(e))?;

    let result = match cli.command {
        Some(Commands::Plan(cmd)) => cmd.execute(&config),
        Some(Commands::Config { action: ConfigAction::Show }) => show_config(&config),
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        for cause in e.chain().skip(1) {
            error!("  Caused by: {}", cause);
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Defaults, then the config file, then `TENSORPACK_*` overrides.
fn load_configuration(path: Option<&Path>) -> Result<ReduceAccelConfig> {
    let config = match path {
        Some(path) => ReduceAccelConfig::from_toml(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ReduceAccelConfig::default(),
    };
    let config = config.merge_env().context("Invalid TENSORPACK_* environment override")?;
    config.validate().context("Invalid configuration")?;
    debug!(?config, "configuration loaded");
    Ok(config)
}

fn show_config(config: &ReduceAccelConfig) -> Result<()> {
    print!("{}", config.to_toml().context("Failed to serialize configuration")?);
    Ok(())
}
