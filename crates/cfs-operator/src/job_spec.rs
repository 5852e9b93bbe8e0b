//! Execution-unit manifest assembly.

use cfs_protocol::job::{COMPONENT_LABEL, COMPONENT_LABEL_VALUE, SESSION_LABEL};
use cfs_protocol::{CfsOptions, Session, TargetDefinitionKind, label_value};
use serde_json::{Value, json};

use crate::config::JobTemplateConfig;
use crate::layers::ResolvedLayers;

const SHARED_DIRECTORY: &str = "/inventory";
const CA_CERT_PATH: &str = "/etc/cray/ca/certificate_authority.crt";
const WAIT_FOR_SIDECAR: &str = "until curl --head localhost:15000; do echo Waiting for Sidecar; sleep 3; done; echo Sidecar available";

#[derive(Debug, Clone)]
pub struct JobTemplate {
    config: JobTemplateConfig,
}

impl JobTemplate {
    pub fn new(config: JobTemplateConfig) -> Self {
        Self { config }
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Build the `batch/v1` Job for `session`.
    pub fn build(
        &self,
        session: &Session,
        job_id: &str,
        resolved: &ResolvedLayers,
        options: &CfsOptions,
    ) -> Value {
        let is_image = session.target.definition == TargetDefinitionKind::Image;
        let ansible_config = session
            .ansible
            .as_ref()
            .and_then(|spec| spec.config.clone())
            .unwrap_or_else(|| options.default_ansible_config.clone());

        let labels = json!({
            SESSION_LABEL: label_value(&session.name),
            "cfsversion": "v3",
            COMPONENT_LABEL: COMPONENT_LABEL_VALUE,
            "aee": label_value(&session.name),
            "configuration": label_value(&session.configuration.name),
        });

        let mut containers = vec![
            self.inventory_container(session, is_image),
            self.ansible_container(session, resolved, options, is_image),
        ];
        if is_image {
            containers.push(self.teardown_container(session));
        }

        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": job_id,
                "namespace": self.config.namespace,
                "labels": labels,
            },
            "spec": {
                "backoffLimit": 0,
                "template": {
                    "metadata": {"name": job_id, "labels": labels},
                    "spec": {
                        "serviceAccountName": self.config.service_account,
                        "restartPolicy": "Never",
                        "volumes": self.volumes(&ansible_config),
                        "initContainers": [self.clone_container(session)],
                        "containers": containers,
                    }
                }
            }
        })
    }

    fn env_common(&self, session: &Session) -> Vec<Value> {
        vec![
            json!({"name": "CFS_OPERATOR_LOG_LEVEL", "value": self.config.log_level}),
            json!({"name": "SESSION_NAME", "value": session.name}),
            json!({"name": "RESOURCE_NAMESPACE", "value": self.config.namespace}),
        ]
    }

    fn clone_container(&self, session: &Session) -> Value {
        let secret = &self.config.vcs_user_credentials;
        json!({
            "name": "git-clone",
            "image": self.config.util_image,
            "volumeMounts": [mount("config-vol", SHARED_DIRECTORY, false), mount("ca-pubkey", "/etc/cray/ca", true)],
            "env": [
                {"name": "GIT_SSL_CAINFO", "value": CA_CERT_PATH},
                {"name": "VCS_USERNAME", "valueFrom": {"secretKeyRef": {"key": "vcs_username", "name": secret, "optional": false}}},
                {"name": "VCS_PASSWORD", "valueFrom": {"secretKeyRef": {"key": "vcs_password", "name": secret, "optional": false}}},
                {"name": "SESSION_CONFIGURATION_NAME", "value": session.configuration.name},
                {"name": "SESSION_CONFIGURATION_LIMIT", "value": session.configuration.limit},
                {"name": "GIT_RETRY_MAX", "value": self.config.git_retry_max.to_string()},
                {"name": "GIT_RETRY_DELAY", "value": self.config.git_retry_delay.to_string()},
                {"name": "VAULT_ADDR", "value": self.config.vault_addr},
            ],
            "command": ["/bin/sh", "-c"],
            "args": ["python3 -m cray.cfs.clone"],
        })
    }

    fn inventory_container(&self, session: &Session, is_image: bool) -> Value {
        let mut keys = format!(
            "cp /secret-keys/* {SHARED_DIRECTORY}/ssh/ && chmod 600 {SHARED_DIRECTORY}/ssh/id_ecdsa && cp /secret-certs/* {SHARED_DIRECTORY}/ssh/"
        );
        if is_image {
            keys.push_str(&format!(
                " && ssh-keygen -t ecdsa -N \"\" -f {SHARED_DIRECTORY}/ssh/id_image"
            ));
        }
        let script = [
            format!("mkdir -p {SHARED_DIRECTORY}/ssh"),
            keys,
            format!("cp /tmp/ansible/ansible.cfg {SHARED_DIRECTORY}/"),
            WAIT_FOR_SIDECAR.to_string(),
            "cfs-inventory".to_string(),
        ]
        .join(" && ");

        let mut env = self.env_common(session);
        env.push(json!({"name": "SSL_CAINFO", "value": CA_CERT_PATH}));
        json!({
            "name": "inventory",
            "image": self.config.util_image,
            "volumeMounts": [
                mount("config-vol", SHARED_DIRECTORY, false),
                mount("ansible-config", "/tmp/ansible", false),
                mount("ca-pubkey", "/etc/cray/ca", true),
                mount("cfs-trust-keys", "/secret-keys", true),
                mount("cfs-trust-certificate", "/secret-certs", true),
            ],
            "env": env,
            "command": ["/bin/bash", "-c"],
            "securityContext": {"runAsUser": 0},
            "args": [script],
        })
    }

    fn ansible_container(
        &self,
        session: &Session,
        resolved: &ResolvedLayers,
        options: &CfsOptions,
        is_image: bool,
    ) -> Value {
        let args = ansible_args(session);
        let disable_state_recording = is_image
            || resolved.debug
            || session
                .ansible
                .as_ref()
                .and_then(|spec| spec.passthrough.as_deref())
                .is_some_and(|raw| !raw.trim().is_empty());
        let debug_wait_time = if session.debug_on_failure {
            options.debug_wait_time
        } else {
            0
        };
        let layers = serde_json::to_string(&resolved.layers).unwrap_or_else(|_| "[]".into());

        json!({
            "name": "ansible",
            "image": self.config.aee_image,
            "resources": {
                "limits": self.config.ansible_limits,
                "requests": self.config.ansible_requests,
            },
            "env": [
                {"name": "SESSION_NAME", "value": session.name},
                {"name": "ANSIBLE_ARGS", "value": args.join(" ")},
                {"name": "INVENTORY_TYPE", "value": session.target.definition},
                {"name": "DISABLE_STATE_RECORDING", "value": if disable_state_recording { "True" } else { "False" }},
                {"name": "DEBUG_WAIT_TIME", "value": debug_wait_time.to_string()},
            ],
            "volumeMounts": [mount("config-vol", SHARED_DIRECTORY, false)],
            "args": [layers],
        })
    }

    fn teardown_container(&self, session: &Session) -> Value {
        json!({
            "name": "teardown",
            "image": self.config.util_image,
            "volumeMounts": [mount("config-vol", SHARED_DIRECTORY, false)],
            "env": self.env_common(session),
            "command": ["/bin/bash", "-c"],
            "securityContext": {"runAsUser": 0},
            "args": [format!("{WAIT_FOR_SIDECAR} && python3 -m cray.cfs.teardown")],
        })
    }

    fn volumes(&self, ansible_config: &str) -> Value {
        json!([
            {"name": "ca-pubkey", "configMap": {
                "name": self.config.configmap_public_key,
                "items": [{"key": self.config.ca_public_key, "path": "certificate_authority.crt"}],
            }},
            {"name": "config-vol", "emptyDir": {"medium": "Memory"}},
            {"name": "ansible-config", "configMap": {
                "name": ansible_config,
                "items": [{"key": "ansible.cfg", "path": "ansible.cfg"}],
            }},
            {"name": "cfs-trust-keys", "secret": {
                "secretName": self.config.trust_key_secret,
                "items": [{"key": "public", "path": "id_ecdsa.pub"}, {"key": "private", "path": "id_ecdsa"}],
            }},
            {"name": "cfs-trust-certificate", "secret": {
                "secretName": self.config.trust_cert_secret,
                "items": [{"key": "certificate", "path": "id_ecdsa-cert.pub"}],
            }},
        ])
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> Value {
    if read_only {
        json!({"name": name, "mountPath": path, "readOnly": true})
    } else {
        json!({"name": name, "mountPath": path})
    }
}

/// Arguments handed to `ansible-playbook`.
pub fn ansible_args(session: &Session) -> Vec<String> {
    let Some(spec) = &session.ansible else {
        return Vec::new();
    };
    let mut args = Vec::new();
    if spec.verbosity > 0 {
        args.push(format!("-{}", "v".repeat(spec.verbosity as usize)));
    }

    let mut limit = spec.limit.clone().filter(|limit| !limit.is_empty());
    if limit.is_none() && session.target.definition == TargetDefinitionKind::Image {
        let members: Vec<&str> = session.target.members().collect();
        if !members.is_empty() {
            limit = Some(members.join(","));
        }
    }
    if let Some(limit) = limit {
        args.push("--limit".into());
        args.push(limit);
    }

    if let Some(raw) = &spec.passthrough {
        args.extend(split_passthrough(raw));
    }
    args
}

/// Split on whitespace outside quotes; quote characters are kept.
pub fn split_passthrough(raw: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in raw.chars() {
        match quote {
            Some(open) => {
                current.push(ch);
                if ch == open {
                    quote = None;
                }
            }
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            None => {
                if ch == '"' || ch == '\'' {
                    quote = Some(ch);
                }
                current.push(ch);
            }
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
