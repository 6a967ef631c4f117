//! Command-sequence tests for replication group failover.
//!
//! Each test drives the real [`FailoverManager`] against a
//! [`RecordingReplicaAdmin`] and asserts which members get promoted or
//! re-pointed, and in what order.

use std::time::Duration;

use redis_operator::client::ReplicationInfo;
use redis_operator::replication::{
    FailoverError, FailoverManager, MemberState, PromotionPoll, ReplicationTarget,
};

use crate::mock_admin::RecordingReplicaAdmin;

fn target(size: i32) -> ReplicationTarget {
    ReplicationTarget {
        name: "my-repl".to_string(),
        namespace: "default".to_string(),
        port: 6379,
        size,
    }
}

fn master_info(replica_ips: &[&str]) -> String {
    let mut out = format!("role:master\nconnected_slaves:{}\n", replica_ips.len());
    for (n, ip) in replica_ips.iter().enumerate() {
        out.push_str(&format!(
            "slave{}:ip={},port=6379,state=online,offset=1000,lag=0\n",
            n, ip
        ));
    }
    out.push_str("master_repl_offset:1000\n");
    out
}

fn replica_info(master_host: &str, link: &str, priority: i64, offset: i64) -> String {
    format!(
        "role:slave\nmaster_host:{}\nmaster_port:6379\nmaster_link_status:{}\n\
         slave_repl_offset:{}\nslave_priority:{}\nconnected_slaves:0\n",
        master_host, link, offset, priority
    )
}

fn member(pod: &str, address: &str, info: &str) -> MemberState {
    MemberState {
        pod: pod.to_string(),
        address: address.to_string(),
        info: ReplicationInfo::parse(info),
    }
}

#[tokio::test]
async fn test_healthy_group_is_left_alone() {
    let admin = RecordingReplicaAdmin::new();
    let target = target(3);

    admin.set_pod_ip("my-repl-0", "10.0.0.1");
    admin.set_pod_ip("my-repl-1", "10.0.0.2");
    admin.set_pod_ip("my-repl-2", "10.0.0.3");
    admin.queue_info("my-repl-0", &master_info(&["10.0.0.2", "10.0.0.3"]));
    admin.queue_info("my-repl-1", &replica_info("10.0.0.1", "up", 100, 900));
    admin.queue_info("my-repl-2", &replica_info("10.0.0.1", "up", 100, 850));

    let manager = FailoverManager::new(&admin, &target);
    let master = manager
        .reconfigure()
        .await
        .expect("reconfigure should succeed")
        .expect("group has a master");

    assert_eq!(master.pod, "my-repl-0");
    assert!(admin.ops().is_empty(), "converged group gets no commands");
}

#[tokio::test]
async fn test_lost_master_promotes_highest_offset_replica() {
    let admin = RecordingReplicaAdmin::new();
    let target = target(3);

    // The master pod was rescheduled; everyone is a replica of a dead
    // address now. my-repl-1 has replicated the furthest.
    admin.set_pod_ip("my-repl-0", "10.0.0.1");
    admin.set_pod_ip("my-repl-1", "10.0.0.2");
    admin.set_pod_ip("my-repl-2", "10.0.0.3");
    admin.queue_info("my-repl-0", &replica_info("10.0.9.9", "down", 100, 100));
    admin.queue_info("my-repl-1", &replica_info("10.0.9.9", "down", 100, 500));
    admin.queue_info("my-repl-2", &replica_info("10.0.9.9", "down", 100, 300));
    // After PROMOTE the chosen replica reports the master role.
    admin.queue_info("my-repl-1", &master_info(&[]));

    let manager = FailoverManager::new(&admin, &target);
    let master = manager
        .reconfigure()
        .await
        .expect("reconfigure should succeed")
        .expect("a master was elected");

    assert_eq!(master.pod, "my-repl-1");
    assert_eq!(
        admin.ops(),
        vec![
            "promote my-repl-1".to_string(),
            "replica_of my-repl-0 10.0.0.2:6379".to_string(),
            "replica_of my-repl-2 10.0.0.2:6379".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_split_brain_first_master_with_replicas_wins() {
    let admin = RecordingReplicaAdmin::new();
    let target = target(3);

    // Two members claim the master role; only my-repl-0 has a replica
    // actually attached, so it keeps the crown and my-repl-2 is demoted.
    admin.set_pod_ip("my-repl-0", "10.0.0.1");
    admin.set_pod_ip("my-repl-1", "10.0.0.2");
    admin.set_pod_ip("my-repl-2", "10.0.0.3");
    admin.queue_info("my-repl-0", &master_info(&["10.0.0.2"]));
    admin.queue_info("my-repl-1", &replica_info("10.0.0.1", "up", 100, 900));
    admin.queue_info("my-repl-2", &master_info(&["10.0.0.9"]));

    let manager = FailoverManager::new(&admin, &target);
    let master = manager
        .reconfigure()
        .await
        .expect("reconfigure should succeed")
        .expect("group has a master");

    assert_eq!(master.pod, "my-repl-0");
    assert_eq!(
        admin.ops(),
        vec!["replica_of my-repl-2 10.0.0.1:6379".to_string()]
    );
}

#[tokio::test]
async fn test_initial_bootstrap_points_everyone_at_first_member() {
    let admin = RecordingReplicaAdmin::new();
    let target = target(3);

    // Fresh StatefulSet: every member starts as a standalone master.
    admin.set_pod_ip("my-repl-0", "10.0.0.1");
    admin.set_pod_ip("my-repl-1", "10.0.0.2");
    admin.set_pod_ip("my-repl-2", "10.0.0.3");
    admin.queue_info("my-repl-0", &master_info(&[]));
    admin.queue_info("my-repl-1", &master_info(&[]));
    admin.queue_info("my-repl-2", &master_info(&[]));

    let manager = FailoverManager::new(&admin, &target);
    let master = manager
        .reconfigure()
        .await
        .expect("reconfigure should succeed")
        .expect("group has a master");

    assert_eq!(master.pod, "my-repl-0");
    assert_eq!(
        admin.ops(),
        vec![
            "replica_of my-repl-1 10.0.0.1:6379".to_string(),
            "replica_of my-repl-2 10.0.0.1:6379".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_empty_group_converges_to_nothing() {
    let admin = RecordingReplicaAdmin::new();
    let target = target(0);

    let manager = FailoverManager::new(&admin, &target);
    let master = manager
        .reconfigure()
        .await
        .expect("reconfigure should succeed");

    assert!(master.is_none());
    assert!(admin.ops().is_empty());
}

#[tokio::test]
async fn test_promotion_requires_an_eligible_candidate() {
    let admin = RecordingReplicaAdmin::new();
    let target = target(2);
    let manager = FailoverManager::new(&admin, &target);

    // Priority 0 marks replicas that must never be promoted.
    let members = vec![
        member("my-repl-0", "10.0.0.1", &replica_info("10.0.9.9", "down", 0, 500)),
        member("my-repl-1", "10.0.0.2", &replica_info("10.0.9.9", "down", 0, 900)),
    ];

    let err = manager
        .promote_replica_to_master(&members)
        .await
        .expect_err("no candidate is eligible");

    assert!(matches!(err, FailoverError::NoPromotionCandidate));
    assert!(admin.ops().is_empty());
}

#[tokio::test]
async fn test_promotion_times_out_when_role_never_flips() {
    let admin = RecordingReplicaAdmin::new();
    let target = target(1);

    // The replica accepts PROMOTE but keeps reporting the slave role.
    admin.queue_info("my-repl-0", &replica_info("10.0.9.9", "down", 100, 500));

    let manager = FailoverManager::new(&admin, &target).with_poll(PromotionPoll {
        initial: Duration::from_millis(1),
        max_elapsed: Duration::from_millis(4),
    });
    let members = vec![member(
        "my-repl-0",
        "10.0.0.1",
        &replica_info("10.0.9.9", "down", 100, 500),
    )];

    let err = manager
        .promote_replica_to_master(&members)
        .await
        .expect_err("promotion never confirms");

    match err {
        FailoverError::PromotionTimeout { pod, .. } => assert_eq!(pod, "my-repl-0"),
        other => panic!("expected promotion timeout, got {:?}", other),
    }
    assert_eq!(admin.ops(), vec!["promote my-repl-0".to_string()]);
}

#[tokio::test]
async fn test_refresh_aggregates_unreachable_members() {
    let admin = RecordingReplicaAdmin::new();
    let target = target(3);

    admin.set_pod_ip("my-repl-0", "10.0.0.1");
    admin.set_pod_ip("my-repl-1", "10.0.0.2");
    admin.set_pod_ip("my-repl-2", "10.0.0.3");
    admin.queue_info("my-repl-0", &master_info(&["10.0.0.2"]));
    admin.queue_info("my-repl-1", &replica_info("10.0.0.1", "up", 100, 900));
    admin.fail_info("my-repl-2");

    let manager = FailoverManager::new(&admin, &target);
    let err = manager.refresh().await.expect_err("one member unreachable");

    match err {
        FailoverError::Aggregate(failures) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("my-repl-2"));
        }
        other => panic!("expected aggregate error, got {:?}", other),
    }
}
