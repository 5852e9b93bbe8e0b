//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use cfs_protocol::job::{COMPONENT_LABEL, COMPONENT_LABEL_VALUE, SESSION_LABEL};
use cfs_protocol::{
    CfsOptions, Configuration, CustomizeJobRequest, ExecutionUnit, ImsImage, ImsJob, ImsJobStatus,
    JobCondition, JobMetadata, JobStatus, Layer, PublicKey, Session, SessionFilter, SessionState,
    SessionStatusPatch, SshContainer, label_value,
};
use serde_json::{Map, Value};
use tokio::sync::Notify;

use crate::adapters::{
    ConfigurationStore, Delivery, EventBus, ImageService, JobScheduler, OptionsStore,
    SecondaryJobs, SessionStore,
};
use crate::error::OperatorError;

pub fn session(name: &str) -> Session {
    let mut session = Session::new(name);
    session.configuration.name = "cfg".into();
    session
}

pub fn session_with_job(name: &str, job: &str, state: SessionState) -> Session {
    let mut session = session(name);
    session.status.session.job = Some(job.into());
    session.status.session.status = state;
    session
}

pub fn unit(name: &str, session: &str) -> ExecutionUnit {
    let mut labels = BTreeMap::new();
    labels.insert(COMPONENT_LABEL.to_string(), COMPONENT_LABEL_VALUE.to_string());
    labels.insert(SESSION_LABEL.to_string(), label_value(session));
    ExecutionUnit {
        metadata: JobMetadata {
            name: name.into(),
            labels,
        },
        status: JobStatus::default(),
    }
}

pub fn failed_unit(name: &str, session: &str, at: &str) -> ExecutionUnit {
    let mut unit = unit(name, session);
    unit.status.failed = Some(1);
    unit.status.conditions = vec![JobCondition {
        condition_type: "Failed".into(),
        last_transition_time: Some(at.into()),
    }];
    unit
}

pub fn layer(name: &str) -> Layer {
    Layer {
        name: Some(name.into()),
        clone_url: format!("https://vcs/{name}.git"),
        playbook: "site.yml".into(),
        ..Layer::default()
    }
}

fn not_found(what: &str) -> OperatorError {
    OperatorError::NotFound(format!("404 {what}"))
}

#[derive(Default)]
pub struct FakeSessions {
    pub sessions: Mutex<BTreeMap<String, Session>>,
    pub patches: Mutex<Vec<(String, SessionStatusPatch)>>,
    pub deletes: Mutex<Vec<(SessionState, String)>>,
    pub fail_list: AtomicBool,
    pub fail_patch: AtomicBool,
}

impl FakeSessions {
    pub fn with(sessions: impl IntoIterator<Item = Session>) -> Self {
        let fake = Self::default();
        for session in sessions {
            fake.insert(session);
        }
        fake
    }

    pub fn insert(&self, session: Session) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.name.clone(), session);
    }

    pub fn remove(&self, name: &str) {
        self.sessions.lock().unwrap().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(name).cloned()
    }

    pub fn patches_for(&self, name: &str) -> Vec<SessionStatusPatch> {
        self.patches
            .lock()
            .unwrap()
            .iter()
            .filter(|(session, _)| session == name)
            .map(|(_, patch)| patch.clone())
            .collect()
    }
}

#[async_trait]
impl SessionStore for FakeSessions {
    async fn get_session(&self, name: &str) -> Result<Session, OperatorError> {
        self.get(name).ok_or_else(|| not_found(name))
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, OperatorError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(OperatorError::Cfs("503 unavailable".into()));
        }
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|session| filter.status.is_none_or(|status| session.state() == status))
            .cloned()
            .collect())
    }

    async fn patch_session_status(
        &self,
        name: &str,
        patch: &SessionStatusPatch,
    ) -> Result<Session, OperatorError> {
        if self.fail_patch.load(Ordering::SeqCst) {
            return Err(OperatorError::Cfs("500 patch failed".into()));
        }
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(name).ok_or_else(|| not_found(name))?;
        patch.apply_to(&mut session.status.session);
        self.patches
            .lock()
            .unwrap()
            .push((name.to_string(), patch.clone()));
        Ok(session.clone())
    }

    async fn delete_sessions(
        &self,
        status: SessionState,
        min_age: &str,
    ) -> Result<(), OperatorError> {
        self.deletes
            .lock()
            .unwrap()
            .push((status, min_age.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConfigurations {
    pub configurations: Mutex<HashMap<String, Configuration>>,
    pub unavailable: AtomicBool,
}

impl FakeConfigurations {
    pub fn with(name: &str, layers: Vec<Layer>) -> Self {
        let fake = Self::default();
        fake.configurations.lock().unwrap().insert(
            name.to_string(),
            Configuration {
                name: name.to_string(),
                layers,
                additional_inventory: None,
            },
        );
        fake
    }
}

#[async_trait]
impl ConfigurationStore for FakeConfigurations {
    async fn get_configuration(&self, name: &str) -> Result<Configuration, OperatorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OperatorError::Cfs("503 unavailable".into()));
        }
        self.configurations
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }
}

#[derive(Default)]
pub struct FakeOptions {
    pub served: Mutex<Map<String, Value>>,
    pub patches: Mutex<Vec<Map<String, Value>>>,
}

impl FakeOptions {
    pub fn with(served: Value) -> Self {
        let fake = Self::default();
        if let Value::Object(map) = served {
            *fake.served.lock().unwrap() = map;
        }
        fake
    }

    pub fn patched(&self) -> Vec<Map<String, Value>> {
        self.patches.lock().unwrap().clone()
    }
}

#[async_trait]
impl OptionsStore for FakeOptions {
    async fn get_options(&self) -> Result<Map<String, Value>, OperatorError> {
        Ok(self.served.lock().unwrap().clone())
    }

    async fn patch_options(&self, options: &Map<String, Value>) -> Result<CfsOptions, OperatorError> {
        self.patches.lock().unwrap().push(options.clone());
        let mut served = self.served.lock().unwrap();
        served.extend(options.clone());
        let mut merged = CfsOptions::defaults();
        merged.extend(served.clone());
        serde_json::from_value(Value::Object(merged))
            .map_err(|err| OperatorError::Cfs(err.to_string()))
    }
}

#[derive(Default)]
pub struct FakeScheduler {
    pub jobs: Mutex<BTreeMap<String, ExecutionUnit>>,
    pub manifests: Mutex<Vec<Value>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_create: AtomicBool,
    pub fail_list: AtomicBool,
    pub fail_delete: Mutex<HashSet<String>>,
    pub unreachable: AtomicBool,
}

impl FakeScheduler {
    pub fn with(units: impl IntoIterator<Item = ExecutionUnit>) -> Self {
        let fake = Self::default();
        for unit in units {
            fake.insert(unit);
        }
        fake
    }

    pub fn insert(&self, unit: ExecutionUnit) {
        self.jobs
            .lock()
            .unwrap()
            .insert(unit.metadata.name.clone(), unit);
    }

    pub fn remove(&self, name: &str) {
        self.jobs.lock().unwrap().remove(name);
    }

    pub fn update(&self, name: &str, change: impl FnOnce(&mut JobStatus)) {
        if let Some(unit) = self.jobs.lock().unwrap().get_mut(name) {
            change(&mut unit.status);
        }
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn manifests(&self) -> Vec<Value> {
        self.manifests.lock().unwrap().clone()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.lock().unwrap().keys().cloned().collect()
    }
}

fn matches_selector(unit: &ExecutionUnit, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => unit.metadata.labels.get(key).map(String::as_str) == Some(value),
            None => unit.metadata.labels.contains_key(term),
        })
}

#[async_trait]
impl JobScheduler for FakeScheduler {
    async fn create_job(&self, manifest: &Value) -> Result<(), OperatorError> {
        self.manifests.lock().unwrap().push(manifest.clone());
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(OperatorError::Scheduler("422 rejected".into()));
        }
        let metadata: JobMetadata = serde_json::from_value(manifest["metadata"].clone())
            .map_err(|err| OperatorError::Scheduler(err.to_string()))?;
        self.insert(ExecutionUnit {
            metadata,
            status: JobStatus::default(),
        });
        Ok(())
    }

    async fn get_job(&self, name: &str) -> Result<ExecutionUnit, OperatorError> {
        self.jobs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn list_jobs(&self, label_selector: &str) -> Result<Vec<ExecutionUnit>, OperatorError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(OperatorError::Scheduler("503 unavailable".into()));
        }
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|unit| matches_selector(unit, label_selector))
            .cloned()
            .collect())
    }

    async fn delete_job(&self, name: &str) -> Result<(), OperatorError> {
        self.deleted.lock().unwrap().push(name.to_string());
        if self.fail_delete.lock().unwrap().contains(name) {
            return Err(OperatorError::Scheduler(format!("500 delete {name}")));
        }
        self.jobs
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn ping(&self) -> Result<(), OperatorError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(OperatorError::Scheduler("connection refused".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSecondaryJobs {
    pub jobs: Mutex<Vec<ImsJob>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_delete: Mutex<HashSet<String>>,
}

impl FakeSecondaryJobs {
    pub fn with(jobs: impl IntoIterator<Item = (&'static str, ImsJobStatus)>) -> Self {
        let fake = Self::default();
        *fake.jobs.lock().unwrap() = jobs
            .into_iter()
            .map(|(id, status)| ImsJob {
                id: id.into(),
                status,
                ..ImsJob::default()
            })
            .collect();
        fake
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecondaryJobs for FakeSecondaryJobs {
    async fn list_jobs(&self) -> Result<Vec<ImsJob>, OperatorError> {
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn delete_job(&self, id: &str) -> Result<(), OperatorError> {
        self.deleted.lock().unwrap().push(id.to_string());
        if self.fail_delete.lock().unwrap().contains(id) {
            return Err(OperatorError::Ims(format!("500 delete {id}")));
        }
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|job| job.id != id);
        if jobs.len() == before {
            return Err(not_found(id));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeBus {
    pub pending: Mutex<VecDeque<Delivery>>,
    pub commits: Mutex<Vec<i64>>,
    pub published: Mutex<Vec<Vec<u8>>>,
    pub fail_publish: AtomicBool,
    arrived: Notify,
    next_offset: Mutex<i64>,
}

impl FakeBus {
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> Delivery {
        let mut offset = self.next_offset.lock().unwrap();
        let delivery = Delivery {
            topic: "cfs-session-events".into(),
            partition: 0,
            offset: *offset,
            payload: payload.into(),
        };
        *offset += 1;
        self.pending.lock().unwrap().push_back(delivery.clone());
        self.arrived.notify_one();
        delivery
    }

    pub fn commits(&self) -> Vec<i64> {
        self.commits.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<Value> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|payload| serde_json::from_slice(payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl EventBus for FakeBus {
    async fn next(&self) -> Result<Delivery, OperatorError> {
        loop {
            let next = self.pending.lock().unwrap().pop_front();
            if let Some(delivery) = next {
                return Ok(delivery);
            }
            self.arrived.notified().await;
        }
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), OperatorError> {
        self.commits.lock().unwrap().push(delivery.offset);
        Ok(())
    }

    async fn publish(&self, payload: &[u8]) -> Result<(), OperatorError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(OperatorError::Bus("broker down".into()));
        }
        self.published.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

/// Image service whose customization jobs reach `waiting_on_user` after
/// `polls_before_ready` status reads, exposing `endpoint` as the jail.
#[derive(Default)]
pub struct FakeImages {
    pub images: Mutex<HashMap<String, String>>,
    pub jobs: Mutex<HashMap<String, (ImsJob, usize)>>,
    pub requests: Mutex<Vec<CustomizeJobRequest>>,
    pub keys_created: Mutex<Vec<(String, String)>>,
    pub keys_deleted: Mutex<Vec<String>>,
    pub reject: Mutex<HashSet<String>>,
    pub error_status: Mutex<HashSet<String>>,
    pub endpoint: Mutex<Option<(String, u16)>>,
    pub polls_before_ready: usize,
}

impl FakeImages {
    pub fn with_images(images: &[(&str, &str)], endpoint: (String, u16)) -> Self {
        let fake = Self {
            polls_before_ready: 2,
            ..Self::default()
        };
        *fake.images.lock().unwrap() = images
            .iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect();
        *fake.endpoint.lock().unwrap() = Some(endpoint);
        fake
    }

    pub fn requests(&self) -> Vec<CustomizeJobRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn keys_deleted(&self) -> Vec<String> {
        self.keys_deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageService for FakeImages {
    async fn get_image(&self, id: &str) -> Result<ImsImage, OperatorError> {
        let name = self.images.lock().unwrap().get(id).cloned();
        name.map(|name| ImsImage {
            id: id.to_string(),
            name,
        })
        .ok_or_else(|| not_found(id))
    }

    async fn create_job(&self, request: &CustomizeJobRequest) -> Result<ImsJob, OperatorError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.reject.lock().unwrap().contains(&request.artifact_id) {
            return Err(OperatorError::Ims(format!("400 bad image {}", request.artifact_id)));
        }
        let container = request.ssh_containers[0]["name"].as_str().unwrap_or_default();
        let job = ImsJob {
            id: format!("job-{}", request.artifact_id),
            job_type: request.job_type.clone(),
            artifact_id: request.artifact_id.clone(),
            image_root_archive_name: request.image_root_archive_name.clone(),
            ssh_containers: vec![SshContainer {
                name: container.to_string(),
                ..SshContainer::default()
            }],
            ..ImsJob::default()
        };
        self.jobs
            .lock()
            .unwrap()
            .insert(job.id.clone(), (job.clone(), 0));
        Ok(job)
    }

    async fn get_job(&self, id: &str) -> Result<ImsJob, OperatorError> {
        let mut jobs = self.jobs.lock().unwrap();
        let (job, polls) = jobs.get_mut(id).ok_or_else(|| not_found(id))?;
        *polls += 1;
        if self.error_status.lock().unwrap().contains(&job.artifact_id) {
            job.status = ImsJobStatus::Error;
        } else if *polls >= self.polls_before_ready {
            job.status = ImsJobStatus::WaitingOnUser;
            if let Some((host, port)) = self.endpoint.lock().unwrap().clone() {
                for container in &mut job.ssh_containers {
                    container.connection_info.insert(
                        "cluster.local".into(),
                        serde_json::json!({"host": host, "port": port}),
                    );
                }
            }
        } else {
            job.status = ImsJobStatus::FetchingImage;
        }
        Ok(job.clone())
    }

    async fn create_public_key(&self, name: &str, key: &str) -> Result<PublicKey, OperatorError> {
        self.keys_created
            .lock()
            .unwrap()
            .push((name.to_string(), key.to_string()));
        Ok(PublicKey {
            id: format!("key-{name}"),
            name: name.to_string(),
        })
    }

    async fn delete_public_key(&self, id: &str) -> Result<(), OperatorError> {
        self.keys_deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}
