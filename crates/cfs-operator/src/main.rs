use anyhow::{Context, Result};
use cfs_operator::liveness::Timestamp;
use cfs_operator::logging::LogHandle;
use cfs_operator::operator;
use cfs_operator::shutdown::Shutdown;
use cfs_operator::{OperatorArgs, OperatorConfig};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "cfs-operator", version, about = "Configuration session operator")]
struct Cli {
    #[command(flatten)]
    args: OperatorArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    Timestamp::new(&cli.args.timestamp_path).beat();
    let log = LogHandle::init(&cli.args.log_level);
    let config = OperatorConfig::try_from(cli.args).context("invalid operator configuration")?;

    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    tokio::spawn(async move {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down");
            }
            _ = async {
                if let Some(ref mut t) = term { t.recv().await; }
            } => {
                tracing::info!("SIGTERM received, shutting down");
            }
        }
        shutdown.trigger();
    });

    operator::run(config, log, signal).await
}
