//! Daemon configuration: command line and environment, resolved once and
//! shared by reference with every component.

use std::path::PathBuf;
use std::time::Duration;

use cfs_client::cfs::DEFAULT_CFS_URL;
use cfs_client::ims::DEFAULT_IMS_URL;
use clap::Args;
use serde_json::{Map, Value};

use crate::error::OperatorError;

#[derive(Args, Debug, Clone)]
pub struct OperatorArgs {
    /// Namespace execution units are created in
    #[arg(long, env = "CRAY_CFS_NAMESPACE", default_value = "services")]
    pub namespace: String,

    /// Configuration API base url
    #[arg(long, env = "CFS_API_URL", default_value = DEFAULT_CFS_URL)]
    pub cfs_api_url: String,

    /// Image-management service base url
    #[arg(long, env = "IMS_API_URL", default_value = DEFAULT_IMS_URL)]
    pub ims_api_url: String,

    /// Kubernetes API server
    #[arg(long, env = "KUBERNETES_API_URL", default_value = "https://kubernetes.default.svc")]
    pub kubernetes_api_url: String,

    #[arg(
        long,
        env = "KUBERNETES_TOKEN_PATH",
        default_value = "/var/run/secrets/kubernetes.io/serviceaccount/token"
    )]
    pub kubernetes_token_path: PathBuf,

    #[arg(
        long,
        env = "KUBERNETES_CA_PATH",
        default_value = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt"
    )]
    pub kubernetes_ca_path: PathBuf,

    /// Kafka bootstrap servers
    #[arg(
        long,
        env = "CFS_KAFKA_BOOTSTRAP",
        default_value = "cray-shared-kafka-kafka-bootstrap.services.svc.cluster.local:9092"
    )]
    pub kafka_bootstrap: String,

    #[arg(long, env = "CFS_KAFKA_TOPIC", default_value = "cfs-session-events")]
    pub kafka_topic: String,

    #[arg(long, env = "CFS_KAFKA_GROUP", default_value = "cfs-operator")]
    pub kafka_group: String,

    /// Initial log level (DEBUG, INFO, WARNING, ERROR, CRITICAL)
    #[arg(long, env = "CFS_OPERATOR_LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Liveness timestamp file
    #[arg(long, env = "CFS_OPERATOR_TIMESTAMP", default_value = "/var/timestamp")]
    pub timestamp_path: PathBuf,

    /// While this file exists the log level is forced to DEBUG
    #[arg(long, env = "CFS_OPERATOR_DEBUG_FILE", default_value = "/tmp/debug")]
    pub debug_watch_file: PathBuf,

    /// Per-request timeout for outbound HTTP calls, in seconds
    #[arg(long, env = "CFS_OPERATOR_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "CRAY_CFS_UTIL_IMAGE", default_value = "cray-cfs-utils:latest")]
    pub util_image: String,

    #[arg(long, env = "CRAY_CFS_AEE_IMAGE", default_value = "cray-aee:latest")]
    pub aee_image: String,

    #[arg(long, env = "CRAY_CFS_SERVICE_ACCOUNT", default_value = "cray-cfs")]
    pub service_account: String,

    #[arg(long, env = "CRAY_CFS_CONFIGMAP_PUBLIC_KEY", default_value = "cray-configmap-ca-public-key")]
    pub configmap_public_key: String,

    #[arg(long, env = "CRAY_CFS_CA_PUBLIC_KEY", default_value = "certificate_authority.crt")]
    pub ca_public_key: String,

    #[arg(long, env = "CRAY_CFS_TRUST_KEY_SECRET", default_value = "cfstrustkeys")]
    pub trust_key_secret: String,

    #[arg(long, env = "CRAY_CFS_TRUST_CERT_SECRET", default_value = "cfstrustcertificate")]
    pub trust_cert_secret: String,

    /// JSON resource limits for the ansible container
    #[arg(long, env = "CRAY_CFS_ANSIBLE_CONTAINER_LIMITS", default_value = "{}")]
    pub ansible_container_limits: String,

    /// JSON resource requests for the ansible container
    #[arg(long, env = "CRAY_CFS_ANSIBLE_CONTAINER_REQUESTS", default_value = "{}")]
    pub ansible_container_requests: String,

    #[arg(long, env = "VCS_USER_CREDENTIALS", default_value = "vcs-user-credentials")]
    pub vcs_user_credentials: String,

    #[arg(long, env = "CFS_GIT_RETRY_MAX", default_value_t = 60)]
    pub git_retry_max: u32,

    #[arg(long, env = "CFS_GIT_RETRY_DELAY", default_value_t = 10)]
    pub git_retry_delay: u32,

    #[arg(long, env = "VAULT_ADDR", default_value = "")]
    pub vault_addr: String,
}

/// Settings consumed when assembling an execution unit.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplateConfig {
    pub namespace: String,
    pub util_image: String,
    pub aee_image: String,
    pub service_account: String,
    pub configmap_public_key: String,
    pub ca_public_key: String,
    pub trust_key_secret: String,
    pub trust_cert_secret: String,
    pub ansible_limits: Map<String, Value>,
    pub ansible_requests: Map<String, Value>,
    pub vcs_user_credentials: String,
    pub git_retry_max: u32,
    pub git_retry_delay: u32,
    pub vault_addr: String,
    pub log_level: String,
}

impl Default for JobTemplateConfig {
    fn default() -> Self {
        Self {
            namespace: "services".into(),
            util_image: "cray-cfs-utils:latest".into(),
            aee_image: "cray-aee:latest".into(),
            service_account: "cray-cfs".into(),
            configmap_public_key: "cray-configmap-ca-public-key".into(),
            ca_public_key: "certificate_authority.crt".into(),
            trust_key_secret: "cfstrustkeys".into(),
            trust_cert_secret: "cfstrustcertificate".into(),
            ansible_limits: Map::new(),
            ansible_requests: Map::new(),
            vcs_user_credentials: "vcs-user-credentials".into(),
            git_retry_max: 60,
            git_retry_delay: 10,
            vault_addr: String::new(),
            log_level: "INFO".into(),
        }
    }
}

/// Cadences of the long-running loops.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopTimings {
    pub poll_interval: Duration,
    /// Resync the tracked set every this many polls.
    pub resync_every: u32,
    pub orphan_sweep_interval: Duration,
    pub ims_sweep_interval: Duration,
    pub reconcile_interval: Duration,
    pub heartbeat_interval: Duration,
    pub janitor_interval: Duration,
    pub debug_watch_interval: Duration,
    pub network_wait_interval: Duration,
    pub initial_sync_retry: Duration,
    pub event_retry_pause: Duration,
    pub restart_delay: Duration,
}

impl Default for LoopTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            resync_every: 10,
            orphan_sweep_interval: Duration::from_secs(60 * 60),
            ims_sweep_interval: Duration::from_secs(60),
            reconcile_interval: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(10),
            janitor_interval: Duration::from_secs(5 * 60),
            debug_watch_interval: Duration::from_secs(1),
            network_wait_interval: Duration::from_secs(1),
            initial_sync_retry: Duration::from_secs(30),
            event_retry_pause: Duration::from_secs(1),
            restart_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub cfs_api_url: String,
    pub ims_api_url: String,
    pub kubernetes_api_url: String,
    pub kubernetes_token_path: PathBuf,
    pub kubernetes_ca_path: PathBuf,
    pub kafka_bootstrap: String,
    pub kafka_topic: String,
    pub kafka_group: String,
    pub log_level: String,
    pub timestamp_path: PathBuf,
    pub debug_watch_file: PathBuf,
    pub request_timeout: Duration,
    pub template: JobTemplateConfig,
    pub timings: LoopTimings,
}

impl TryFrom<OperatorArgs> for OperatorConfig {
    type Error = OperatorError;

    fn try_from(args: OperatorArgs) -> Result<Self, Self::Error> {
        let template = JobTemplateConfig {
            namespace: args.namespace,
            util_image: args.util_image,
            aee_image: args.aee_image,
            service_account: args.service_account,
            configmap_public_key: args.configmap_public_key,
            ca_public_key: args.ca_public_key,
            trust_key_secret: args.trust_key_secret,
            trust_cert_secret: args.trust_cert_secret,
            ansible_limits: parse_resources("CRAY_CFS_ANSIBLE_CONTAINER_LIMITS", &args.ansible_container_limits)?,
            ansible_requests: parse_resources(
                "CRAY_CFS_ANSIBLE_CONTAINER_REQUESTS",
                &args.ansible_container_requests,
            )?,
            vcs_user_credentials: args.vcs_user_credentials,
            git_retry_max: args.git_retry_max,
            git_retry_delay: args.git_retry_delay,
            vault_addr: args.vault_addr,
            log_level: args.log_level.clone(),
        };
        Ok(Self {
            cfs_api_url: args.cfs_api_url,
            ims_api_url: args.ims_api_url,
            kubernetes_api_url: args.kubernetes_api_url,
            kubernetes_token_path: args.kubernetes_token_path,
            kubernetes_ca_path: args.kubernetes_ca_path,
            kafka_bootstrap: args.kafka_bootstrap,
            kafka_topic: args.kafka_topic,
            kafka_group: args.kafka_group,
            log_level: args.log_level,
            timestamp_path: args.timestamp_path,
            debug_watch_file: args.debug_watch_file,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            template,
            timings: LoopTimings::default(),
        })
    }
}

fn parse_resources(name: &str, raw: &str) -> Result<Map<String, Value>, OperatorError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(OperatorError::Configuration(format!(
            "{name} must be a JSON object, got {other}"
        ))),
        Err(err) => Err(OperatorError::Configuration(format!("{name}: {err}"))),
    }
}
