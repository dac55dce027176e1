//! Network element driver
//!
//! Validates node plans, renders monitoring configuration, compiles NAT
//! rules and drives every node of a plan through its lifecycle.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{cmd_check, cmd_compile, cmd_render, cmd_up};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a plan and list its nodes
    Check {
        /// Plan file (JSON)
        plan: PathBuf,
    },

    /// Print the snmpd configuration a node would use
    Render {
        /// Plan file (JSON)
        plan: PathBuf,

        /// Node name
        node: String,
    },

    /// Compile a JSON list of NAT rules into iptables commands
    Compile {
        /// Rules file (JSON array)
        rules: PathBuf,
    },

    /// Configure and start every node, stop and terminate on exit
    Up {
        /// Plan file (JSON)
        plan: PathBuf,

        /// Seconds to keep the nodes running (0 = until Ctrl-C)
        #[arg(long, default_value_t = 0)]
        duration: u64,

        /// Record commands instead of executing them. Overlays and
        /// snmpd.conf are still written under the plan's overlay_base.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check { plan } => cmd_check(plan).await?,
        Commands::Render { plan, node } => cmd_render(plan, node).await?,
        Commands::Compile { rules } => cmd_compile(rules).await?,
        Commands::Up {
            plan,
            duration,
            dry_run,
        } => cmd_up(plan, duration, dry_run).await?,
    }

    Ok(())
}
