//! Image customization inventories.
//!
//! Each target image gets an IMS customization job with a jailed ssh
//! container. Jobs are requested concurrently by a bounded set of workers; a
//! failing worker does not cancel its siblings, but the inventory fails if any
//! launched image did not come back with connection details.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cfs_protocol::session::ImageMapping;
use cfs_protocol::{CustomizeJobRequest, ImsJobStatus, Session};
use serde_json::{Map, Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

use super::{Inventory, InventoryGenerator, groups_members, members_groups};
use crate::adapters::{ConfigurationStore, ImageService};
use crate::error::OperatorError;

pub const IMAGE_HOST_GROUP: &str = "cfs_image";
const PRIVATE_KEY_FILE: &str = "/etc/ansible/ssh/id_image";

/// Where the jail for one image can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAccess {
    pub image_id: String,
    pub job_id: String,
    pub image_name: String,
    pub host: String,
    pub port: u16,
}

pub struct ImageInventory {
    ims: Arc<dyn ImageService>,
    configurations: Arc<dyn ConfigurationStore>,
    public_key: PathBuf,
    poll: Duration,
    ssh_settle: Duration,
    max_workers: usize,
}

impl ImageInventory {
    pub fn new(
        ims: Arc<dyn ImageService>,
        configurations: Arc<dyn ConfigurationStore>,
        public_key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ims,
            configurations,
            public_key: public_key.into(),
            poll: Duration::from_secs(5),
            ssh_settle: Duration::from_secs(2),
            max_workers: 16,
        }
    }

    /// Override the status poll interval and the pause between ssh probes.
    pub fn with_polling(mut self, poll: Duration, ssh_settle: Duration) -> Self {
        self.poll = poll;
        self.ssh_settle = ssh_settle;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    async fn requires_dkms(&self, configuration: &str) -> bool {
        match self.configurations.get_configuration(configuration).await {
            Ok(configuration) => configuration.requires_dkms(),
            Err(err) => {
                tracing::error!(configuration, %err, "unable to check dkms requirements");
                false
            }
        }
    }

    async fn upload_public_key(&self, session: &str) -> Result<String, OperatorError> {
        let key = tokio::fs::read_to_string(&self.public_key).await.map_err(|err| {
            OperatorError::Inventory(format!(
                "unable to read public key {}: {err}",
                self.public_key.display()
            ))
        })?;
        tracing::info!("uploading public key for ssh container access");
        let uploaded = self
            .ims
            .create_public_key(&format!("cfs_{session}"), &key)
            .await
            .map_err(|err| OperatorError::Inventory(format!("unable to upload public key: {err}")))?;
        Ok(uploaded.id)
    }

    /// Request one jail per image and collect those that became reachable.
    async fn launch(
        &self,
        session: &Session,
        key_id: &str,
        require_dkms: bool,
        images: BTreeSet<String>,
    ) -> Result<BTreeMap<String, ImageAccess>, OperatorError> {
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();

        for image_id in &images {
            tracing::info!(image = %image_id, "requesting access to image");
            let request = JailRequest {
                ims: self.ims.clone(),
                image_id: image_id.clone(),
                session: session.name.clone(),
                key_id: key_id.to_string(),
                image_map: session.target.image_map.clone(),
                require_dkms,
                poll: self.poll,
                ssh_settle: self.ssh_settle,
            };
            let tx = tx.clone();
            let permits = permits.clone();
            workers.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                match request.run().await {
                    Ok(access) => {
                        let _ = tx.send(access);
                    }
                    Err(err) => {
                        tracing::error!(image = %request.image_id, %err, "ssh container request failed");
                    }
                }
            });
        }
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(%err, "ssh container worker aborted");
            }
        }

        let mut completed = BTreeMap::new();
        while let Ok(access) = rx.try_recv() {
            tracing::info!(image = %access.image_id, job = %access.job_id, "ssh container ready");
            completed.insert(access.image_id.clone(), access);
        }
        if completed.keys().ne(images.iter()) {
            return Err(OperatorError::Inventory(
                "one or more IMS jobs failed to launch".into(),
            ));
        }
        Ok(completed)
    }
}

#[async_trait]
impl InventoryGenerator for ImageInventory {
    async fn generate(&self, session: &Session) -> Result<Option<Inventory>, OperatorError> {
        let images: BTreeSet<String> = members_groups(&session.target).into_keys().collect();
        let key_id = self.upload_public_key(&session.name).await?;
        let require_dkms = self.requires_dkms(&session.configuration.name).await;

        let launched = self.launch(session, &key_id, require_dkms, images).await;
        tracing::info!("removing public key");
        if let Err(err) = self.ims.delete_public_key(&key_id).await {
            tracing::warn!(%err, "unable to delete public key");
        }
        let access = launched?;

        let mut image_hosts = Map::new();
        let mut inventory = Map::new();
        let mut image_to_job = Map::new();
        for (group, images) in groups_members(&session.target) {
            let mut hosts = Map::new();
            for image in images {
                let Some(jail) = access.get(&image) else {
                    continue;
                };
                image_to_job.insert(
                    jail.image_name.clone(),
                    json!({"job_id": jail.job_id, "image_id": image}),
                );
                image_hosts.insert(
                    image.clone(),
                    json!({
                        "ansible_host": jail.host,
                        "ansible_port": jail.port,
                        "cray_cfs_image": true,
                        "ansible_python_interpreter": "/usr/bin/env python3",
                        "ansible_ssh_private_key_file": PRIVATE_KEY_FILE,
                    }),
                );
                hosts.insert(image, json!({}));
            }
            inventory.insert(group, json!({ "hosts": hosts }));
        }
        inventory.insert(IMAGE_HOST_GROUP.to_string(), json!({ "hosts": image_hosts }));

        Ok(Some(Inventory {
            hosts: Value::Object(inventory),
            image_to_job: Some(Value::Object(image_to_job)),
        }))
    }
}

struct JailRequest {
    ims: Arc<dyn ImageService>,
    image_id: String,
    session: String,
    key_id: String,
    image_map: Vec<ImageMapping>,
    require_dkms: bool,
    poll: Duration,
    ssh_settle: Duration,
}

impl JailRequest {
    async fn run(&self) -> Result<ImageAccess, OperatorError> {
        let archive_name = self.archive_name().await?;
        let request = CustomizeJobRequest::new(
            &self.image_id,
            archive_name,
            &self.key_id,
            &self.session,
            self.require_dkms,
        );
        tracing::debug!(image = %self.image_id, ?request, "submitting customization job");
        let job = self.ims.create_job(&request).await.map_err(|err| {
            OperatorError::Inventory(format!(
                "unable to create a customization job for image {}: {err}",
                self.image_id
            ))
        })?;
        let access = self.wait_for_container(&job.id).await?;
        wait_for_ssh(&access.host, access.port, self.ssh_settle, self.poll).await;
        Ok(access)
    }

    /// The mapped result name, else `<image name>_cfs_<session>`.
    async fn archive_name(&self) -> Result<String, OperatorError> {
        if let Some(mapping) = self
            .image_map
            .iter()
            .find(|mapping| mapping.source_id == self.image_id)
        {
            return Ok(mapping.result_name.clone());
        }
        let image = self.ims.get_image(&self.image_id).await.map_err(|err| {
            OperatorError::Inventory(format!(
                "unable to determine the name of image {}: {err}",
                self.image_id
            ))
        })?;
        Ok(format!("{}_cfs_{}", image.name, self.session))
    }

    async fn wait_for_container(&self, job_id: &str) -> Result<ImageAccess, OperatorError> {
        let started = tokio::time::Instant::now();
        loop {
            let job = self.ims.get_job(job_id).await.map_err(|err| {
                OperatorError::Inventory(format!("unable to get status of job {job_id}: {err}"))
            })?;
            match job.status {
                ImsJobStatus::WaitingOnUser => {
                    let container = job.ssh_container(&self.session).ok_or_else(|| {
                        OperatorError::Inventory(format!(
                            "job {job_id} is waiting on user but has no ssh container"
                        ))
                    })?;
                    let (host, port) = container.cluster_endpoint().ok_or_else(|| {
                        OperatorError::Inventory(format!(
                            "ssh container of job {job_id} has no connection information"
                        ))
                    })?;
                    return Ok(ImageAccess {
                        image_id: self.image_id.clone(),
                        job_id: job_id.to_string(),
                        image_name: job.image_root_archive_name.clone(),
                        host,
                        port,
                    });
                }
                ImsJobStatus::Error => {
                    return Err(OperatorError::Inventory(format!(
                        "job {job_id} for image {} failed before its ssh container was created",
                        self.image_id
                    )));
                }
                ImsJobStatus::Success => {
                    return Err(OperatorError::Inventory(format!(
                        "job {job_id} for image {} finished without waiting on user",
                        self.image_id
                    )));
                }
                status => {
                    tracing::info!(
                        image = %self.image_id,
                        job = job_id,
                        ?status,
                        elapsed_secs = started.elapsed().as_secs(),
                        "waiting for ssh container"
                    );
                }
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

/// Block until the jail accepts tcp connections.
async fn wait_for_ssh(host: &str, port: u16, settle: Duration, connect_timeout: Duration) {
    let started = tokio::time::Instant::now();
    loop {
        tokio::time::sleep(settle).await;
        match tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => return,
            Ok(Err(err)) => {
                tracing::info!(host, port, %err, elapsed_secs = started.elapsed().as_secs(), "ssh not available yet");
            }
            Err(_) => {
                tracing::info!(host, port, elapsed_secs = started.elapsed().as_secs(), "ssh connection timed out");
            }
        }
    }
}
