//! Recording fakes for member administration.
//!
//! The fakes answer queries from canned fixtures and record every mutating
//! operation, so tests can assert the exact commands a convergence pass
//! would issue against live pods.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use redis_operator::cluster::{MemberAdmin, TopologyError};
use redis_operator::replication::{FailoverError, ReplicaAdmin};

/// Recording [`MemberAdmin`] for cluster topology tests.
///
/// `CLUSTER NODES` output is a scripted queue: each call pops the front
/// entry, and the last entry repeats once the queue is down to one. This
/// lets a test show the manager a different node table before and after a
/// reshard within a single operation.
#[derive(Default)]
pub struct RecordingMemberAdmin {
    nodes_outputs: Mutex<VecDeque<String>>,
    node_ids: Mutex<HashMap<String, String>>,
    pod_ips: Mutex<HashMap<String, String>>,
    ping_down: Mutex<HashSet<String>>,
    replication_infos: Mutex<HashMap<String, String>>,
    cli_output: Mutex<String>,
    reset_fail_once: Mutex<HashSet<String>>,
    config_set_fail: Mutex<HashSet<String>>,
    pod_ip_fail: Mutex<HashSet<String>>,

    /// `redis-cli` invocations, in issue order: (pod, args).
    cli_log: Mutex<Vec<(String, Vec<String>)>>,
    /// Direct member operations (meet, reset, flushall, config set).
    ops_log: Mutex<Vec<String>>,
}

impl RecordingMemberAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a `CLUSTER NODES` fixture; `times` controls how many pops it
    /// serves before the next entry takes over.
    pub fn queue_nodes(&self, output: &str, times: usize) {
        let mut queue = self.nodes_outputs.lock().unwrap();
        for _ in 0..times {
            queue.push_back(output.to_string());
        }
    }

    pub fn set_node_id(&self, pod: &str, id: &str) {
        self.node_ids
            .lock()
            .unwrap()
            .insert(pod.to_string(), id.to_string());
    }

    pub fn set_pod_ip(&self, pod: &str, ip: &str) {
        self.pod_ips
            .lock()
            .unwrap()
            .insert(pod.to_string(), ip.to_string());
    }

    pub fn set_ping_down(&self, pod: &str) {
        self.ping_down.lock().unwrap().insert(pod.to_string());
    }

    pub fn set_replication_info(&self, pod: &str, raw: &str) {
        self.replication_infos
            .lock()
            .unwrap()
            .insert(pod.to_string(), raw.to_string());
    }

    pub fn set_cli_output(&self, output: &str) {
        *self.cli_output.lock().unwrap() = output.to_string();
    }

    pub fn fail_next_reset(&self, pod: &str) {
        self.reset_fail_once.lock().unwrap().insert(pod.to_string());
    }

    pub fn fail_config_set(&self, pod: &str) {
        self.config_set_fail.lock().unwrap().insert(pod.to_string());
    }

    pub fn fail_pod_ip(&self, pod: &str) {
        self.pod_ip_fail.lock().unwrap().insert(pod.to_string());
    }

    pub fn cli(&self) -> Vec<(String, Vec<String>)> {
        self.cli_log.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops_log.lock().unwrap().clone()
    }

    fn member_err(pod: &str, reason: &str) -> TopologyError {
        TopologyError::Member {
            pod: pod.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl MemberAdmin for RecordingMemberAdmin {
    async fn ping(&self, pod: &str) -> Result<bool, TopologyError> {
        Ok(!self.ping_down.lock().unwrap().contains(pod))
    }

    async fn node_id(&self, pod: &str) -> Result<String, TopologyError> {
        self.node_ids
            .lock()
            .unwrap()
            .get(pod)
            .cloned()
            .ok_or_else(|| Self::member_err(pod, "no node id fixture"))
    }

    async fn cluster_nodes(&self, pod: &str) -> Result<String, TopologyError> {
        let mut queue = self.nodes_outputs.lock().unwrap();
        match queue.len() {
            0 => Err(Self::member_err(pod, "no cluster nodes fixture")),
            1 => Ok(queue[0].clone()),
            _ => Ok(queue.pop_front().unwrap()),
        }
    }

    async fn cluster_meet(&self, pod: &str, ip: &str, port: u16) -> Result<(), TopologyError> {
        self.ops_log
            .lock()
            .unwrap()
            .push(format!("cluster_meet {} {}:{}", pod, ip, port));
        Ok(())
    }

    async fn cluster_reset(&self, pod: &str) -> Result<(), TopologyError> {
        if self.reset_fail_once.lock().unwrap().remove(pod) {
            return Err(Self::member_err(pod, "reset refused"));
        }
        self.ops_log
            .lock()
            .unwrap()
            .push(format!("cluster_reset {}", pod));
        Ok(())
    }

    async fn flushall(&self, pod: &str) -> Result<(), TopologyError> {
        self.ops_log.lock().unwrap().push(format!("flushall {}", pod));
        Ok(())
    }

    async fn replication_info(&self, pod: &str) -> Result<String, TopologyError> {
        self.replication_infos
            .lock()
            .unwrap()
            .get(pod)
            .cloned()
            .ok_or_else(|| Self::member_err(pod, "no replication info fixture"))
    }

    async fn config_set(
        &self,
        pod: &str,
        parameter: &str,
        value: &str,
    ) -> Result<(), TopologyError> {
        if self.config_set_fail.lock().unwrap().contains(pod) {
            return Err(Self::member_err(pod, "config set refused"));
        }
        self.ops_log
            .lock()
            .unwrap()
            .push(format!("config_set {} {}={}", pod, parameter, value));
        Ok(())
    }

    async fn run_cli(&self, pod: &str, args: Vec<String>) -> Result<String, TopologyError> {
        self.cli_log.lock().unwrap().push((pod.to_string(), args));
        Ok(self.cli_output.lock().unwrap().clone())
    }

    async fn pod_ip(&self, pod: &str) -> Result<String, TopologyError> {
        if self.pod_ip_fail.lock().unwrap().contains(pod) {
            return Err(Self::member_err(pod, "pod has no IP"));
        }
        self.pod_ips
            .lock()
            .unwrap()
            .get(pod)
            .cloned()
            .ok_or_else(|| Self::member_err(pod, "no pod ip fixture"))
    }
}

/// Recording [`ReplicaAdmin`] for replication failover tests.
///
/// INFO REPLICATION answers come from a per-pod scripted queue with the same
/// last-entry-repeats semantics, so a promoted replica can start reporting
/// the master role after the PROMOTE call.
#[derive(Default)]
pub struct RecordingReplicaAdmin {
    infos: Mutex<HashMap<String, VecDeque<String>>>,
    pod_ips: Mutex<HashMap<String, String>>,
    info_fail: Mutex<HashSet<String>>,

    /// PROMOTE and REPLICAOF operations, in issue order.
    ops_log: Mutex<Vec<String>>,
}

impl RecordingReplicaAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_info(&self, pod: &str, raw: &str) {
        self.infos
            .lock()
            .unwrap()
            .entry(pod.to_string())
            .or_default()
            .push_back(raw.to_string());
    }

    pub fn set_pod_ip(&self, pod: &str, ip: &str) {
        self.pod_ips
            .lock()
            .unwrap()
            .insert(pod.to_string(), ip.to_string());
    }

    pub fn fail_info(&self, pod: &str) {
        self.info_fail.lock().unwrap().insert(pod.to_string());
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops_log.lock().unwrap().clone()
    }

    fn member_err(pod: &str, reason: &str) -> FailoverError {
        FailoverError::Member {
            pod: pod.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl ReplicaAdmin for RecordingReplicaAdmin {
    async fn replication_info(&self, pod: &str) -> Result<String, FailoverError> {
        if self.info_fail.lock().unwrap().contains(pod) {
            return Err(Self::member_err(pod, "connection refused"));
        }
        let mut infos = self.infos.lock().unwrap();
        let queue = infos
            .get_mut(pod)
            .ok_or_else(|| Self::member_err(pod, "no replication info fixture"))?;
        match queue.len() {
            0 => Err(Self::member_err(pod, "no replication info fixture")),
            1 => Ok(queue[0].clone()),
            _ => Ok(queue.pop_front().unwrap()),
        }
    }

    async fn replica_of(&self, pod: &str, host: &str, port: u16) -> Result<(), FailoverError> {
        self.ops_log
            .lock()
            .unwrap()
            .push(format!("replica_of {} {}:{}", pod, host, port));
        Ok(())
    }

    async fn promote(&self, pod: &str) -> Result<(), FailoverError> {
        self.ops_log.lock().unwrap().push(format!("promote {}", pod));
        Ok(())
    }

    async fn pod_ip(&self, pod: &str) -> Result<String, FailoverError> {
        self.pod_ips
            .lock()
            .unwrap()
            .get(pod)
            .cloned()
            .ok_or_else(|| Self::member_err(pod, "no pod ip fixture"))
    }
}
