///! zreplica CLI
///!
///! Replicates a VM's ZFS datasets to a secondary host over SSH

mod commands;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use zreplica_engine::logging::LoggingConfig;
use zreplica_engine::ZreplicaConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "ZREPLICA_CONFIG")]
    config: Option<PathBuf>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot a VM and replicate its datasets
    Run(RunArgs),
    /// List the VM's replication snapshots
    List {
        /// VM ID
        vm_id: String,
    },
    /// Delete every replication snapshot of a VM locally
    Delete {
        /// VM ID
        vm_id: String,
    },
    /// Destroy replication snapshots on every local dataset, for all VMs
    Purge {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Print a sample configuration file
    ConfigSample,
    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// VM ID
    pub vm_id: String,
    /// Replica host, overrides the configured one
    #[arg(short, long)]
    pub remote: Option<String>,
    /// Force a full snapshot
    #[arg(long, conflicts_with = "incremental")]
    pub full: bool,
    /// Force an incremental snapshot
    #[arg(long)]
    pub incremental: bool,
    /// Snapshots to keep locally
    #[arg(long)]
    pub retention: Option<u32>,
    /// Do not push the VM configuration to the replica
    #[arg(long)]
    pub no_config_sync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that need no configuration
    match &cli.command {
        Commands::ConfigSample => {
            print!("{}", ZreplicaConfig::generate_sample());
            return Ok(());
        }
        Commands::Completions { shell } => {
            generate_completions(*shell);
            return Ok(());
        }
        _ => {}
    }

    let mut config = ZreplicaConfig::load(cli.config.as_ref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    let _guard = LoggingConfig::from(&config.logging)
        .init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Run(args) => commands::run::handle_run_command(args, config, format).await?,
        Commands::List { vm_id } => {
            commands::list::handle_list_command(&vm_id, &config, format).await?
        }
        Commands::Delete { vm_id } => {
            commands::admin::handle_delete_command(&vm_id, &config, format).await?
        }
        Commands::Purge { yes } => {
            commands::admin::handle_purge_command(yes, &config, format).await?
        }
        Commands::ConfigSample | Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Generate shell completions
fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    generate(shell, &mut cmd, name, &mut io::stdout());
}
