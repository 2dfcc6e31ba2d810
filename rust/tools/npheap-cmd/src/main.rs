use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod utils;

use commands::DeviceArgs;

#[derive(Parser)]
#[command(name = "npheap-cmd")]
#[command(about = "Command-line driver for the npheap shared memory heap")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script of heap requests against a fresh device
    Run {
        #[command(flatten)]
        device: DeviceArgs,

        /// Script file, one request per line
        script: String,
    },

    /// Issue random concurrent requests and check the registry afterwards
    Stress {
        #[command(flatten)]
        device: DeviceArgs,

        /// Number of worker threads
        #[arg(long, default_value_t = 4)]
        threads: usize,

        /// Number of distinct keys the workers draw from
        #[arg(long, default_value_t = 32)]
        keys: u64,

        /// Requests issued by each worker
        #[arg(long, default_value_t = 10_000)]
        ops: usize,

        /// Seed for the random workload (random when omitted)
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_logging(cli.verbose);

    match cli.command {
        Commands::Run { device, script } => commands::run::run(device, script),
        Commands::Stress {
            device,
            threads,
            keys,
            ops,
            seed,
        } => commands::stress::run(device, threads, keys, ops, seed),
    }
}
