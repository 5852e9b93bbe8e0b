//! Inventory generation for one session's execution unit. Runs as an init
//! container and always leaves the `complete` marker behind so the ansible
//! container never blocks on it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cfs_client::cfs::DEFAULT_CFS_URL;
use cfs_client::hsm::DEFAULT_HSM_URL;
use cfs_client::ims::DEFAULT_IMS_URL;
use cfs_client::{CfsClient, HsmClient, ImsClient, RetryPolicy};
use cfs_operator::inventory::{
    DynamicInventory, ExplicitInventory, ImageInventory, InventoryPaths, RepositoryInventory,
    TargetDefinition, mark_complete, produce_inventory,
};
use cfs_operator::logging::LogHandle;
use cfs_protocol::TargetDefinitionKind;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "cfs-inventory", version, about = "Generate a session inventory")]
struct Cli {
    /// Session to generate the inventory for
    #[arg(long, env = "SESSION_NAME")]
    session_name: String,

    #[arg(long, env = "RESOURCE_NAMESPACE")]
    namespace: String,

    #[arg(long, env = "CFS_API_URL", default_value = DEFAULT_CFS_URL)]
    cfs_api_url: String,

    #[arg(long, env = "IMS_API_URL", default_value = DEFAULT_IMS_URL)]
    ims_api_url: String,

    #[arg(long, env = "HSM_API_URL", default_value = DEFAULT_HSM_URL)]
    hsm_api_url: String,

    /// Directory shared with the ansible container
    #[arg(long, env = "CFS_INVENTORY_DIR", default_value = "/inventory")]
    inventory_dir: PathBuf,

    #[arg(long, env = "CFS_OPERATOR_LOG_LEVEL", default_value = "INFO")]
    log_level: String,

    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log = LogHandle::init(&cli.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = %cli.namespace,
        "starting inventory generation"
    );

    let paths = InventoryPaths::under(&cli.inventory_dir);
    let timeout = Duration::from_secs(cli.request_timeout_secs);
    let cfs = CfsClient::new(&cli.cfs_api_url, timeout, RetryPolicy::default())?;

    let session = match cfs.get_session(&cli.session_name).await {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(session = %cli.session_name, %err, "unable to read session");
            mark_complete(&paths).await?;
            return Err(err).context("reading session");
        }
    };

    let definition = session.target.definition;
    tracing::info!(session = %session.name, target = ?definition, "inventory target");
    let target = match definition {
        TargetDefinitionKind::Dynamic => TargetDefinition::Dynamic(DynamicInventory::new(
            HsmClient::new(&cli.hsm_api_url, timeout, RetryPolicy::default())?,
        )),
        TargetDefinitionKind::Spec => TargetDefinition::Spec(ExplicitInventory),
        TargetDefinitionKind::Repo => TargetDefinition::Repo(RepositoryInventory),
        TargetDefinitionKind::Image => {
            let ims = ImsClient::new(&cli.ims_api_url, timeout, RetryPolicy::default())?;
            if let Err(err) = ims.ping().await {
                tracing::warn!(%err, "image management service not answering yet");
            }
            TargetDefinition::Image(ImageInventory::new(
                Arc::new(ims),
                Arc::new(cfs.clone()),
                paths.public_key.clone(),
            ))
        }
    };

    // Generation failures are already logged and the marker is written.
    let _ = produce_inventory(&target, &session, &paths).await;
    Ok(())
}
