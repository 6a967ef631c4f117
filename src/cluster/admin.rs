//! Production [`MemberAdmin`] backed by live pods.
//!
//! RESP commands go through a short-lived fred connection to the pod IP;
//! `redis-cli` invocations run inside the pod via the exec subresource.

use fred::types::InfoKind;

use crate::client::exec::PodExecutor;
use crate::client::redis_client::{RedisClient, TlsCertData};
use crate::cluster::topology::{MemberAdmin, TopologyError};

/// Member access for pods of a single resource instance.
pub struct PodMemberAdmin {
    executor: PodExecutor,
    port: u16,
    password: Option<String>,
    tls_certs: Option<TlsCertData>,
}

impl PodMemberAdmin {
    pub fn new(
        executor: PodExecutor,
        port: u16,
        password: Option<String>,
        tls_certs: Option<TlsCertData>,
    ) -> Self {
        Self {
            executor,
            port,
            password,
            tls_certs,
        }
    }

    pub(crate) fn member_err(pod: &str, e: impl std::fmt::Display) -> TopologyError {
        TopologyError::Member {
            pod: pod.to_string(),
            reason: e.to_string(),
        }
    }

    async fn connect(&self, pod: &str) -> Result<RedisClient, TopologyError> {
        let ip = self
            .executor
            .pod_ip(pod)
            .await
            .map_err(|e| Self::member_err(pod, e))?;
        RedisClient::connect(
            &ip,
            self.port,
            self.password.as_deref(),
            self.tls_certs.as_ref(),
        )
        .await
        .map_err(|e| Self::member_err(pod, e))
    }

    /// Run one command against a fresh connection, closing it afterwards.
    pub(crate) async fn with_client<T, F>(&self, pod: &str, op: F) -> Result<T, TopologyError>
    where
        F: AsyncFnOnce(&RedisClient) -> Result<T, crate::client::redis_client::RedisError>,
    {
        let client = self.connect(pod).await?;
        let result = op(&client).await.map_err(|e| Self::member_err(pod, e));
        let _ = client.close().await;
        result
    }
}

impl MemberAdmin for PodMemberAdmin {
    async fn ping(&self, pod: &str) -> Result<bool, TopologyError> {
        self.with_client(pod, async |c| Ok(c.ping().await? == "PONG"))
            .await
    }

    async fn node_id(&self, pod: &str) -> Result<String, TopologyError> {
        self.with_client(pod, async |c| c.cluster_myid().await).await
    }

    async fn cluster_nodes(&self, pod: &str) -> Result<String, TopologyError> {
        self.with_client(pod, async |c| c.cluster_nodes().await)
            .await
    }

    async fn cluster_meet(&self, pod: &str, ip: &str, port: u16) -> Result<(), TopologyError> {
        self.with_client(pod, async |c| c.cluster_meet(ip, port).await)
            .await
    }

    async fn cluster_reset(&self, pod: &str) -> Result<(), TopologyError> {
        self.with_client(pod, async |c| c.cluster_reset(false).await)
            .await
    }

    async fn flushall(&self, pod: &str) -> Result<(), TopologyError> {
        self.with_client(pod, async |c| c.flushall().await).await
    }

    async fn replication_info(&self, pod: &str) -> Result<String, TopologyError> {
        self.with_client(pod, async |c| c.info(Some(InfoKind::Replication)).await)
            .await
    }

    async fn config_set(
        &self,
        pod: &str,
        parameter: &str,
        value: &str,
    ) -> Result<(), TopologyError> {
        self.with_client(pod, async |c| c.config_set(parameter, value).await)
            .await
    }

    async fn run_cli(&self, pod: &str, args: Vec<String>) -> Result<String, TopologyError> {
        self.executor
            .exec(pod, args)
            .await
            .map_err(|e| Self::member_err(pod, e))
    }

    async fn pod_ip(&self, pod: &str) -> Result<String, TopologyError> {
        self.executor
            .pod_ip(pod)
            .await
            .map_err(|e| Self::member_err(pod, e))
    }
}
