//! vz runner entry point.
//!
//! Spawned by the driver with a serialized VM configuration; owns the VM
//! until it receives SIGTERM or SIGINT.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vzdriver::runner::{self, HypervisorKind, RunnerOptions};

/// vz - run one virtual machine until signalled
#[derive(Parser, Debug)]
#[command(name = "vz")]
#[command(version)]
struct Args {
    /// (Optional) PID file location.
    #[arg(long = "pid", value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Hypervisor backend.
    #[arg(long, value_enum, default_value_t = HypervisorKind::Vfkit)]
    hypervisor: HypervisorKind,

    /// Path to the vfkit binary (searched in PATH by default).
    #[arg(long, value_name = "PATH")]
    vfkit: Option<PathBuf>,

    /// Virtual machine configuration as JSON.
    config: String,
}

fn main() {
    let args = Args::parse();

    init_logging();

    tracing::debug!(version = vzdriver::VERSION, "starting vz runner");

    let options = RunnerOptions {
        config: args.config,
        pid_file: args.pid_file,
        hypervisor: args.hypervisor,
        vfkit: args.vfkit,
    };

    // The PID file guard lives inside run(), so it is gone before we exit
    if let Err(e) = runner::run(options) {
        tracing::error!(error = %e, "runner failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber.
///
/// `VZ_LOG_FORMAT=json` switches to one JSON object per line.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vzdriver=info,vz=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if std::env::var("VZ_LOG_FORMAT").is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
