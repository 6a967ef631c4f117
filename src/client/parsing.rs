//! Parsing of Redis textual command output.
//!
//! Regex-based, pure functions so the reconcilers and managers can be
//! exercised against canned fixtures.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static KV_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // key:value lines; section headers start with '#'
    #[allow(clippy::expect_used)]
    Regex::new(r"^([\w-]+):(.+)$").expect("static regex")
});

static REPLICA_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // slave0:ip=10.0.0.4,port=6379,state=online,offset=12345,lag=0
    #[allow(clippy::expect_used)]
    Regex::new(r"ip=([^,]+),port=(\d+),state=([^,]+),offset=(-?\d+)").expect("static regex")
});

/// Parse key-value pairs from INFO command output.
///
/// INFO output is `key:value` per line with `#` section headers.
pub fn parse_info_output(info: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();

    for line in info.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(caps) = KV_REGEX.captures(line)
            && let (Some(key), Some(value)) = (caps.get(1), caps.get(2))
        {
            result.insert(key.as_str().to_string(), value.as_str().trim().to_string());
        }
    }

    result
}

/// One `slaveN:` row from a master's INFO REPLICATION output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedReplica {
    pub host: String,
    pub port: i32,
    pub state: String,
    pub offset: i64,
}

/// Parsed INFO REPLICATION block for a single member.
#[derive(Debug, Clone, Default)]
pub struct ReplicationInfo {
    /// "master" or "slave".
    pub role: Option<String>,
    /// Number of replicas this master sees as connected.
    pub connected_slaves: i64,
    /// Master's replication offset.
    pub master_repl_offset: Option<i64>,
    /// Replica's replication offset.
    pub slave_repl_offset: Option<i64>,
    /// Replica failover priority; 0 means never promote.
    pub slave_priority: Option<i64>,
    /// Master host, present on replicas.
    pub master_host: Option<String>,
    /// Master port, present on replicas.
    pub master_port: Option<i32>,
    /// Master link status ("up" or "down"), present on replicas.
    pub master_link_status: Option<String>,
    /// Per-replica rows (`slaveN:`), present on masters.
    pub replicas: Vec<ConnectedReplica>,
}

impl ReplicationInfo {
    /// Parse from INFO REPLICATION output text.
    pub fn parse(info: &str) -> Self {
        let parsed = parse_info_output(info);

        let mut replicas = Vec::new();
        let mut n = 0;
        while let Some(value) = parsed.get(&format!("slave{}", n)) {
            if let Some(caps) = REPLICA_LINE_REGEX.captures(value) {
                let (host, port, state, offset) = (
                    caps.get(1).map(|m| m.as_str().to_string()),
                    caps.get(2).and_then(|m| m.as_str().parse().ok()),
                    caps.get(3).map(|m| m.as_str().to_string()),
                    caps.get(4).and_then(|m| m.as_str().parse().ok()),
                );
                if let (Some(host), Some(port), Some(state), Some(offset)) =
                    (host, port, state, offset)
                {
                    replicas.push(ConnectedReplica {
                        host,
                        port,
                        state,
                        offset,
                    });
                }
            }
            n += 1;
        }

        ReplicationInfo {
            role: parsed.get("role").cloned(),
            connected_slaves: parsed
                .get("connected_slaves")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            master_repl_offset: parsed.get("master_repl_offset").and_then(|v| v.parse().ok()),
            slave_repl_offset: parsed.get("slave_repl_offset").and_then(|v| v.parse().ok()),
            slave_priority: parsed.get("slave_priority").and_then(|v| v.parse().ok()),
            master_host: parsed.get("master_host").cloned(),
            master_port: parsed.get("master_port").and_then(|v| v.parse().ok()),
            master_link_status: parsed.get("master_link_status").cloned(),
            replicas,
        }
    }

    pub fn is_master(&self) -> bool {
        self.role.as_deref() == Some("master")
    }

    pub fn is_replica(&self) -> bool {
        self.role.as_deref() == Some("slave")
    }

    /// Replication offset relevant for failover ordering: the replica-side
    /// offset for replicas, the master offset otherwise.
    pub fn replication_offset(&self) -> i64 {
        if self.is_replica() {
            self.slave_repl_offset.unwrap_or(0)
        } else {
            self.master_repl_offset.unwrap_or(0)
        }
    }

    /// Failover priority, defaulting to the Redis default of 100 when the
    /// field is absent.
    pub fn priority(&self) -> i64 {
        self.slave_priority.unwrap_or(100)
    }
}

/// Count the `[OK]` assertions in `redis-cli --cluster check` output.
///
/// A healthy check prints exactly three: key-coverage agreement, slot
/// configuration agreement, and full 16384-slot coverage.
pub fn count_cluster_check_ok(output: &str) -> usize {
    output.matches("[OK]").count()
}

/// True iff the cluster self-check reports exactly three `[OK]` assertions.
pub fn cluster_check_healthy(output: &str) -> bool {
    count_cluster_check_ok(output) == 3
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const MASTER_INFO: &str = "# Replication\n\
role:master\n\
connected_slaves:2\n\
slave0:ip=10.0.0.4,port=6379,state=online,offset=12345,lag=0\n\
slave1:ip=10.0.0.5,port=6379,state=online,offset=12300,lag=1\n\
master_failover_state:no-failover\n\
master_repl_offset:12345\n";

    const REPLICA_INFO: &str = "# Replication\n\
role:slave\n\
master_host:10.0.0.2\n\
master_port:6379\n\
master_link_status:up\n\
slave_repl_offset:12300\n\
slave_priority:100\n\
slave_read_only:1\n\
connected_slaves:0\n\
master_repl_offset:12300\n";

    #[test]
    fn test_parse_info_output_skips_headers() {
        let parsed = parse_info_output(MASTER_INFO);
        assert_eq!(parsed.get("role"), Some(&"master".to_string()));
        assert!(!parsed.contains_key("Replication"));
    }

    #[test]
    fn test_parse_master_replication_info() {
        let info = ReplicationInfo::parse(MASTER_INFO);
        assert!(info.is_master());
        assert_eq!(info.connected_slaves, 2);
        assert_eq!(info.master_repl_offset, Some(12345));
        assert_eq!(info.replication_offset(), 12345);
        assert_eq!(info.replicas.len(), 2);
        assert_eq!(info.replicas[0].host, "10.0.0.4");
        assert_eq!(info.replicas[0].port, 6379);
        assert_eq!(info.replicas[0].offset, 12345);
        assert_eq!(info.replicas[1].offset, 12300);
    }

    #[test]
    fn test_parse_replica_replication_info() {
        let info = ReplicationInfo::parse(REPLICA_INFO);
        assert!(info.is_replica());
        assert_eq!(info.master_host.as_deref(), Some("10.0.0.2"));
        assert_eq!(info.master_port, Some(6379));
        assert_eq!(info.master_link_status.as_deref(), Some("up"));
        assert_eq!(info.replication_offset(), 12300);
        assert_eq!(info.priority(), 100);
        assert!(info.replicas.is_empty());
    }

    #[test]
    fn test_priority_defaults_to_100() {
        let info = ReplicationInfo::parse("role:slave\nslave_repl_offset:5\n");
        assert_eq!(info.priority(), 100);

        let info = ReplicationInfo::parse("role:slave\nslave_priority:0\n");
        assert_eq!(info.priority(), 0);
    }

    #[test]
    fn test_cluster_check_ok_counting() {
        let healthy = "\
10.0.0.1:6379 (07c37dfe...) -> 0 keys | 5461 slots | 1 slaves.\n\
[OK] 0 keys in 3 masters.\n\
0.00 keys per slot on average.\n\
[OK] All nodes agree about slots configuration.\n\
>>> Check for open slots...\n\
>>> Check slots coverage...\n\
[OK] All 16384 slots covered.\n";
        assert_eq!(count_cluster_check_ok(healthy), 3);
        assert!(cluster_check_healthy(healthy));

        let unhealthy = "\
[OK] 0 keys in 3 masters.\n\
[ERR] Nodes don't agree about configuration!\n\
[OK] All 16384 slots covered.\n";
        assert_eq!(count_cluster_check_ok(unhealthy), 2);
        assert!(!cluster_check_healthy(unhealthy));
    }
}
