//! Liveness probe: exits 0 while the operator's timestamp is fresh.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use cfs_operator::liveness::{DEFAULT_MAX_AGE, Timestamp};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "cfs-operator-liveness", version, about = "Check operator liveness")]
struct Cli {
    /// Timestamp file written by the operator
    #[arg(long, env = "CFS_OPERATOR_TIMESTAMP", default_value = "/var/timestamp")]
    timestamp_path: PathBuf,

    /// Maximum tolerated timestamp age, in seconds
    #[arg(long, default_value_t = DEFAULT_MAX_AGE.as_secs())]
    max_age: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let timestamp = Timestamp::new(cli.timestamp_path);
    match timestamp.age() {
        Some(age) if age <= Duration::from_secs(cli.max_age) => {
            println!("alive: last beat {:.1}s ago", age.as_secs_f64());
            ExitCode::SUCCESS
        }
        Some(age) => {
            eprintln!("stale: last beat {:.1}s ago", age.as_secs_f64());
            ExitCode::FAILURE
        }
        None => {
            eprintln!("no timestamp at {}", timestamp.path().display());
            ExitCode::FAILURE
        }
    }
}
