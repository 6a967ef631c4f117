//! Pod command execution for `redis-cli` invocations.
//!
//! Multi-node operations (cluster create, reshard, rebalance) are driven
//! through `redis-cli --cluster` inside a member pod, since those subcommands
//! orchestrate several nodes at once and have no single-command equivalent.

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

/// Errors from in-pod command execution.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Pod {pod} has no IP address")]
    NoPodIp { pod: String },

    #[error("Command in pod {pod} failed: {reason}")]
    CommandFailed { pod: String, reason: String },

    #[error("I/O error reading command output: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes commands inside member pods of a single namespace.
#[derive(Clone)]
pub struct PodExecutor {
    pods: Api<Pod>,
}

impl PodExecutor {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
        }
    }

    /// Run a command inside a pod and return its combined stdout.
    ///
    /// Stderr is captured separately and surfaced as an error when the
    /// process reports a non-success status.
    #[instrument(skip(self, command), fields(pod = %pod_name))]
    pub async fn exec<I, S>(&self, pod_name: &str, command: I) -> Result<String, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command: Vec<String> = command.into_iter().map(Into::into).collect();
        debug!(command = ?command, "Executing in pod");

        let params = AttachParams::default().stdout(true).stderr(true);
        let mut attached = self.pods.exec(pod_name, command, &params).await?;

        let mut stdout = String::new();
        if let Some(mut reader) = attached.stdout() {
            reader.read_to_string(&mut stdout).await?;
        }

        let mut stderr = String::new();
        if let Some(mut reader) = attached.stderr() {
            reader.read_to_string(&mut stderr).await?;
        }

        let status = attached.take_status();
        attached.join().await.map_err(|e| ExecError::CommandFailed {
            pod: pod_name.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(status) = status
            && let Some(status) = status.await
            && status.status.as_deref() == Some("Failure")
        {
            return Err(ExecError::CommandFailed {
                pod: pod_name.to_string(),
                reason: status
                    .message
                    .unwrap_or_else(|| stderr.trim().to_string()),
            });
        }

        Ok(stdout)
    }

    /// Look up the IP address of a pod.
    #[instrument(skip(self), fields(pod = %pod_name))]
    pub async fn pod_ip(&self, pod_name: &str) -> Result<String, ExecError> {
        let pod = self.pods.get(pod_name).await?;
        pod.status
            .and_then(|s| s.pod_ip)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| ExecError::NoPodIp {
                pod: pod_name.to_string(),
            })
    }
}
