//! vzdriver CLI entry point.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;

/// vzdriver - lifecycle supervisor for Virtualization.framework machines
#[derive(Parser, Debug)]
#[command(name = "vzdriver")]
#[command(about = "Lifecycle supervisor for Virtualization.framework machines")]
#[command(version)]
struct Cli {
    /// Directory holding machine state (default: ~/.vzdriver/machines).
    #[arg(long, global = true, env = "VZDRIVER_STORAGE_PATH")]
    storage_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a machine and start it.
    Create(cli::create::CreateCmd),

    /// Start a stopped machine.
    Start(cli::start::StartCmd),

    /// Stop a running machine gracefully.
    Stop(cli::stop::StopCmd),

    /// Stop a running machine forcefully.
    Kill(cli::stop::KillCmd),

    /// Stop, then start a machine.
    Restart(cli::start::RestartCmd),

    /// Stop a machine and delete it.
    #[command(alias = "remove")]
    Rm(cli::delete::DeleteCmd),

    /// Print the machine state (stopped, running or error).
    State(cli::inspect::StateCmd),

    /// Print the guest IP address.
    Ip(cli::inspect::IpCmd),

    /// Print the Docker URL of the guest.
    Url(cli::inspect::UrlCmd),

    /// Print the VM configuration passed to the runner.
    Config(cli::inspect::ConfigCmd),
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on RUST_LOG or default to warn
    init_logging();

    tracing::debug!(version = vzdriver::VERSION, "starting vzdriver");

    let result = cli::Storage::new(cli.storage_path).and_then(|storage| match cli.command {
        Commands::Create(cmd) => cmd.run(&storage),
        Commands::Start(cmd) => cmd.run(&storage),
        Commands::Stop(cmd) => cmd.run(&storage),
        Commands::Kill(cmd) => cmd.run(&storage),
        Commands::Restart(cmd) => cmd.run(&storage),
        Commands::Rm(cmd) => cmd.run(&storage),
        Commands::State(cmd) => cmd.run(&storage),
        Commands::Ip(cmd) => cmd.run(&storage),
        Commands::Url(cmd) => cmd.run(&storage),
        Commands::Config(cmd) => cmd.run(&storage),
    });

    // Handle errors
    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vzdriver=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
