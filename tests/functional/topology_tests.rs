//! Command-sequence tests for cluster topology convergence.
//!
//! Each test drives the real [`TopologyManager`] against a
//! [`RecordingMemberAdmin`] and asserts the exact `redis-cli` invocations
//! and member operations issued.

use redis_operator::cluster::{ClusterTarget, TopologyError, TopologyManager};

use crate::mock_admin::RecordingMemberAdmin;

fn id(c: char) -> String {
    std::iter::repeat(c).take(40).collect()
}

fn target(leaders: i32, followers: i32) -> ClusterTarget {
    ClusterTarget {
        name: "my-cluster".to_string(),
        namespace: "default".to_string(),
        port: 6379,
        hostname_addressing: true,
        password: None,
        tls: false,
        desired_leaders: leaders,
        desired_followers: followers,
    }
}

fn leader_fqdn(i: i32) -> String {
    format!("my-cluster-leader-{}.my-cluster-leader-headless.default.svc", i)
}

fn follower_fqdn(i: i32) -> String {
    format!("my-cluster-follower-{}.my-cluster-follower-headless.default.svc", i)
}

fn leader_addr(i: i32) -> String {
    format!("{}:6379", leader_fqdn(i))
}

fn master_row(node_id: &str, host: &str, slots: &str) -> String {
    format!("{} {}:6379@16379 master - 0 0 1 connected {}", node_id, host, slots)
        .trim_end()
        .to_string()
}

fn failed_master_row(node_id: &str, host: &str, slots: &str) -> String {
    format!(
        "{} {}:6379@16379 master,fail - 0 0 1 connected {}",
        node_id, host, slots
    )
    .trim_end()
    .to_string()
}

fn disconnected_master_row(node_id: &str, host: &str, slots: &str) -> String {
    format!(
        "{} {}:6379@16379 master - 0 0 1 disconnected {}",
        node_id, host, slots
    )
    .trim_end()
    .to_string()
}

fn replica_row(node_id: &str, host: &str, master_id: &str) -> String {
    format!(
        "{} {}:6379@16379 slave {} 0 0 1 connected",
        node_id, host, master_id
    )
}

/// Four leaders owning the full keyspace plus one follower on the last
/// leader; the shape a cluster has just before a 4 -> 3 scale-down.
fn four_leader_table() -> String {
    [
        master_row(&id('1'), &leader_fqdn(0), "0-4095"),
        master_row(&id('2'), &leader_fqdn(1), "4096-8191"),
        master_row(&id('3'), &leader_fqdn(2), "8192-12287"),
        master_row(&id('4'), &leader_fqdn(3), "12288-16383"),
        replica_row(&id('5'), &follower_fqdn(0), &id('4')),
    ]
    .join("\n")
}

/// The same cluster after the reshard drained the last leader.
fn four_leader_table_drained() -> String {
    [
        master_row(&id('1'), &leader_fqdn(0), "0-4095 12288-16383"),
        master_row(&id('2'), &leader_fqdn(1), "4096-8191"),
        master_row(&id('3'), &leader_fqdn(2), "8192-12287"),
        master_row(&id('4'), &leader_fqdn(3), ""),
    ]
    .join("\n")
}

#[tokio::test]
async fn test_bootstrap_single_leader_assigns_all_slots_once() {
    let admin = RecordingMemberAdmin::new();
    let target = target(1, 0);
    let manager = TopologyManager::new(&admin, &target);

    manager.bootstrap().await.expect("bootstrap should succeed");

    // The lone leader is reset before slots are assigned.
    assert_eq!(
        admin.ops(),
        vec!["cluster_reset my-cluster-leader-0".to_string()]
    );

    let cli = admin.cli();
    assert_eq!(cli.len(), 1, "slot assignment is a single command");
    let (pod, args) = &cli[0];
    assert_eq!(pod, "my-cluster-leader-0");
    assert_eq!(&args[0..3], &["redis-cli", "CLUSTER", "ADDSLOTS"]);
    assert_eq!(args.len(), 3 + 16384, "every slot is listed explicitly");
    assert_eq!(args[3], "0");
    assert_eq!(args.last().map(String::as_str), Some("16383"));
}

#[tokio::test]
async fn test_bootstrap_multi_leader_creates_over_all_leaders() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 3);
    let manager = TopologyManager::new(&admin, &target);

    manager.bootstrap().await.expect("bootstrap should succeed");

    let cli = admin.cli();
    assert_eq!(cli.len(), 1);
    let (pod, args) = &cli[0];
    assert_eq!(pod, "my-cluster-leader-0");
    assert_eq!(
        args,
        &vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "create".to_string(),
            leader_addr(0),
            leader_addr(1),
            leader_addr(2),
            "--cluster-yes".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_bootstrap_leader_only_cluster_joins_all_leaders_without_resets() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 0);
    let manager = TopologyManager::new(&admin, &target);

    manager.bootstrap().await.expect("bootstrap should succeed");

    // Multiple leaders always go through create; the destructive
    // reset-and-addslots path is reserved for single-leader clusters.
    assert!(admin.ops().is_empty(), "no member may be reset");

    let cli = admin.cli();
    assert_eq!(cli.len(), 1);
    let (pod, args) = &cli[0];
    assert_eq!(pod, "my-cluster-leader-0");
    assert_eq!(
        args,
        &vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "create".to_string(),
            leader_addr(0),
            leader_addr(1),
            leader_addr(2),
            "--cluster-yes".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_bootstrap_passes_auth_and_tls_args() {
    let admin = RecordingMemberAdmin::new();
    let mut target = target(3, 3);
    target.password = Some("s3cret".to_string());
    target.tls = true;
    let manager = TopologyManager::new(&admin, &target);

    manager.bootstrap().await.expect("bootstrap should succeed");

    let cli = admin.cli();
    let (_, args) = &cli[0];
    let tail: Vec<&str> = args.iter().rev().take(8).rev().map(String::as_str).collect();
    assert_eq!(
        tail,
        vec![
            "--cluster-yes",
            "-a",
            "s3cret",
            "--tls",
            "--cacert",
            "/tls/ca.crt",
            "-h",
            "my-cluster-leader-0",
        ]
    );
}

#[tokio::test]
async fn test_add_node_joins_next_leader_through_anchor() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 0);
    let manager = TopologyManager::new(&admin, &target);

    // Two leaders live, so the next join is leader-2.
    admin.queue_nodes(
        &[
            master_row(&id('1'), &leader_fqdn(0), "0-8191"),
            master_row(&id('2'), &leader_fqdn(1), "8192-16383"),
        ]
        .join("\n"),
        1,
    );

    manager.add_node().await.expect("add-node should succeed");

    let cli = admin.cli();
    assert_eq!(cli.len(), 1);
    let (pod, args) = &cli[0];
    assert_eq!(pod, "my-cluster-leader-0");
    assert_eq!(
        args,
        &vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "add-node".to_string(),
            leader_addr(2),
            leader_addr(0),
        ]
    );
}

#[tokio::test]
async fn test_attach_followers_skips_joined_and_unready() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 3);
    let manager = TopologyManager::new(&admin, &target);

    // follower-0 already joined; follower-2 not answering PING yet.
    admin.queue_nodes(
        &[
            master_row(&id('1'), &leader_fqdn(0), "0-5460"),
            master_row(&id('2'), &leader_fqdn(1), "5461-10922"),
            master_row(&id('3'), &leader_fqdn(2), "10923-16383"),
            replica_row(&id('5'), &follower_fqdn(0), &id('1')),
        ]
        .join("\n"),
        1,
    );
    admin.set_pod_ip("my-cluster-follower-0", "10.0.2.0");
    admin.set_pod_ip("my-cluster-follower-1", "10.0.2.1");
    admin.set_pod_ip("my-cluster-follower-2", "10.0.2.2");
    admin.set_ping_down("my-cluster-follower-2");

    manager
        .attach_followers()
        .await
        .expect("attach should succeed");

    let cli = admin.cli();
    assert_eq!(cli.len(), 1, "only follower-1 needs attaching");
    let (pod, args) = &cli[0];
    assert_eq!(pod, "my-cluster-leader-0");
    assert_eq!(
        args,
        &vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "add-node".to_string(),
            format!("{}:6379", follower_fqdn(1)),
            leader_addr(1),
            "--cluster-slave".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_scale_down_noop_when_at_desired_count() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 0);
    let manager = TopologyManager::new(&admin, &target);

    admin.queue_nodes(
        &[
            master_row(&id('1'), &leader_fqdn(0), "0-5460"),
            master_row(&id('2'), &leader_fqdn(1), "5461-10922"),
            master_row(&id('3'), &leader_fqdn(2), "10923-16383"),
        ]
        .join("\n"),
        1,
    );

    manager.scale_down(3).await.expect("noop should succeed");

    assert!(admin.cli().is_empty(), "no commands at desired count");
    assert!(admin.ops().is_empty());
}

#[tokio::test]
async fn test_scale_down_full_sequence() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 1);
    let manager = TopologyManager::new(&admin, &target);

    // Pre-reshard view answers every listing until the removal check, which
    // must see the drained table.
    admin.queue_nodes(&four_leader_table(), 6);
    admin.queue_nodes(&four_leader_table_drained(), 1);
    admin.set_node_id("my-cluster-leader-0", &id('1'));
    admin.set_node_id("my-cluster-leader-3", &id('4'));
    admin.set_replication_info("my-cluster-leader-3", "role:master\nconnected_slaves:1\n");

    manager.scale_down(3).await.expect("scale-down should succeed");

    let cli = admin.cli();
    assert_eq!(cli.len(), 4);

    // 1. Detach the doomed leader's follower.
    assert_eq!(cli[0].0, "my-cluster-leader-0");
    assert_eq!(
        cli[0].1,
        vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "del-node".to_string(),
            leader_addr(0),
            id('5'),
        ]
    );

    // 2. Drain its slots into leader-0.
    assert_eq!(
        cli[1].1,
        vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "reshard".to_string(),
            leader_addr(0),
            "--cluster-from".to_string(),
            id('4'),
            "--cluster-to".to_string(),
            id('1'),
            "--cluster-slots".to_string(),
            "4096".to_string(),
            "--cluster-yes".to_string(),
        ]
    );

    // 3. Remove the now-empty leader.
    assert_eq!(
        cli[2].1,
        vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "del-node".to_string(),
            leader_addr(0),
            id('4'),
        ]
    );

    // 4. Full rebalance, coordinated from leader-1.
    assert_eq!(cli[3].0, "my-cluster-leader-1");
    assert_eq!(
        cli[3].1,
        vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "rebalance".to_string(),
            leader_addr(1),
        ]
    );
}

#[tokio::test]
async fn test_scale_down_removes_each_excess_leader_in_turn() {
    let admin = RecordingMemberAdmin::new();
    let target = target(4, 2);
    let manager = TopologyManager::new(&admin, &target);

    // Six leaders, the last two each carrying a follower.
    let before = [
        master_row(&id('1'), &leader_fqdn(0), "0-4095"),
        master_row(&id('2'), &leader_fqdn(1), "4096-8191"),
        master_row(&id('3'), &leader_fqdn(2), "8192-10239"),
        master_row(&id('4'), &leader_fqdn(3), "10240-12287"),
        master_row(&id('5'), &leader_fqdn(4), "12288-14335"),
        master_row(&id('6'), &leader_fqdn(5), "14336-16383"),
        replica_row(&id('a'), &follower_fqdn(0), &id('6')),
        replica_row(&id('b'), &follower_fqdn(1), &id('5')),
    ]
    .join("\n");
    // After leader-5 is gone, leader-4 is the next removal target.
    let after_first = [
        master_row(&id('1'), &leader_fqdn(0), "0-4095 14336-16383"),
        master_row(&id('2'), &leader_fqdn(1), "4096-8191"),
        master_row(&id('3'), &leader_fqdn(2), "8192-10239"),
        master_row(&id('4'), &leader_fqdn(3), "10240-12287"),
        master_row(&id('5'), &leader_fqdn(4), "12288-14335"),
        replica_row(&id('b'), &follower_fqdn(1), &id('5')),
    ]
    .join("\n");
    let after_second = [
        master_row(&id('1'), &leader_fqdn(0), "0-4095 12288-16383"),
        master_row(&id('2'), &leader_fqdn(1), "4096-8191"),
        master_row(&id('3'), &leader_fqdn(2), "8192-10239"),
        master_row(&id('4'), &leader_fqdn(3), "10240-12287"),
        master_row(&id('5'), &leader_fqdn(4), ""),
    ]
    .join("\n");

    // Each removal cycle lists the cluster six times; only its final
    // removal check sees the next table.
    admin.queue_nodes(&before, 6);
    admin.queue_nodes(&after_first, 6);
    admin.queue_nodes(&after_second, 1);
    admin.set_node_id("my-cluster-leader-0", &id('1'));
    admin.set_node_id("my-cluster-leader-4", &id('5'));
    admin.set_node_id("my-cluster-leader-5", &id('6'));
    admin.set_replication_info("my-cluster-leader-5", "role:master\nconnected_slaves:1\n");
    admin.set_replication_info("my-cluster-leader-4", "role:master\nconnected_slaves:1\n");

    manager.scale_down(4).await.expect("scale-down should succeed");

    let cli = admin.cli();
    assert_eq!(cli.len(), 7, "two removal cycles plus one rebalance");

    // Cycle one: leader-5 loses its follower, its slots, then its seat.
    assert_eq!(cli[0].1[2..], ["del-node".to_string(), leader_addr(0), id('a')]);
    assert_eq!(
        cli[1].1,
        vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "reshard".to_string(),
            leader_addr(0),
            "--cluster-from".to_string(),
            id('6'),
            "--cluster-to".to_string(),
            id('1'),
            "--cluster-slots".to_string(),
            "2048".to_string(),
            "--cluster-yes".to_string(),
        ]
    );
    assert_eq!(cli[2].1[2..], ["del-node".to_string(), leader_addr(0), id('6')]);

    // Cycle two repeats against leader-4.
    assert_eq!(cli[3].1[2..], ["del-node".to_string(), leader_addr(0), id('b')]);
    assert_eq!(
        cli[4].1,
        vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "reshard".to_string(),
            leader_addr(0),
            "--cluster-from".to_string(),
            id('5'),
            "--cluster-to".to_string(),
            id('1'),
            "--cluster-slots".to_string(),
            "2048".to_string(),
            "--cluster-yes".to_string(),
        ]
    );
    assert_eq!(cli[5].1[2..], ["del-node".to_string(), leader_addr(0), id('5')]);

    // A single full rebalance closes the sequence.
    assert_eq!(cli[6].0, "my-cluster-leader-1");
    assert_eq!(
        cli[6].1,
        vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "rebalance".to_string(),
            leader_addr(1),
        ]
    );
    assert!(admin.ops().is_empty(), "no member is reset or flushed");
}

#[tokio::test]
async fn test_scale_down_promotes_demoted_leader_first() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 1);
    let manager = TopologyManager::new(&admin, &target);

    admin.queue_nodes(&four_leader_table(), 7);
    admin.queue_nodes(&four_leader_table_drained(), 1);
    admin.set_node_id("my-cluster-leader-0", &id('1'));
    admin.set_node_id("my-cluster-leader-3", &id('4'));
    // The removal target lost a vote at some point and is a replica now.
    admin.set_replication_info(
        "my-cluster-leader-3",
        "role:slave\nmaster_host:10.0.0.9\nmaster_link_status:up\n",
    );

    manager.scale_down(3).await.expect("scale-down should succeed");

    let cli = admin.cli();
    assert_eq!(cli.len(), 5);
    assert_eq!(cli[0].0, "my-cluster-leader-3");
    assert_eq!(
        cli[0].1,
        vec![
            "redis-cli".to_string(),
            "cluster".to_string(),
            "failover".to_string(),
            leader_addr(3),
        ]
    );
    assert_eq!(cli[1].1[2], "del-node");
    assert_eq!(cli[2].1[2], "reshard");
}

#[tokio::test]
async fn test_reshard_skips_when_target_owns_no_slots() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 0);
    let manager = TopologyManager::new(&admin, &target);

    admin.queue_nodes(&four_leader_table_drained(), 1);
    admin.set_node_id("my-cluster-leader-0", &id('1'));
    admin.set_node_id("my-cluster-leader-3", &id('4'));

    manager.reshard(true).await.expect("reshard should succeed");

    let cli = admin.cli();
    assert_eq!(cli.len(), 1, "no slot transfer, straight to removal");
    assert_eq!(
        cli[0].1,
        vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "del-node".to_string(),
            leader_addr(0),
            id('4'),
        ]
    );
}

#[tokio::test]
async fn test_remove_node_refuses_while_slots_remain() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 0);
    let manager = TopologyManager::new(&admin, &target);

    admin.queue_nodes(&four_leader_table(), 1);
    admin.set_node_id("my-cluster-leader-3", &id('4'));

    manager
        .remove_node("my-cluster-leader-3")
        .await
        .expect("guarded removal is not an error");

    assert!(admin.cli().is_empty(), "a slot-owning node is never removed");
}

#[tokio::test]
async fn test_empty_masters_trigger_targeted_rebalance() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 0);
    let manager = TopologyManager::new(&admin, &target);

    // leader-2 just joined and owns nothing yet.
    admin.queue_nodes(
        &[
            master_row(&id('1'), &leader_fqdn(0), "0-8191"),
            master_row(&id('2'), &leader_fqdn(1), "8192-16383"),
            master_row(&id('3'), &leader_fqdn(2), ""),
        ]
        .join("\n"),
        1,
    );

    manager
        .check_if_empty_masters()
        .await
        .expect("check should succeed");

    let cli = admin.cli();
    assert_eq!(cli.len(), 1);
    assert_eq!(cli[0].0, "my-cluster-leader-1");
    assert_eq!(
        cli[0].1,
        vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "rebalance".to_string(),
            leader_addr(1),
            "--cluster-use-empty-masters".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_all_masters_full_means_no_rebalance() {
    let admin = RecordingMemberAdmin::new();
    let target = target(2, 0);
    let manager = TopologyManager::new(&admin, &target);

    admin.queue_nodes(
        &[
            master_row(&id('1'), &leader_fqdn(0), "0-8191"),
            master_row(&id('2'), &leader_fqdn(1), "8192-16383"),
        ]
        .join("\n"),
        1,
    );

    manager
        .check_if_empty_masters()
        .await
        .expect("check should succeed");

    assert!(admin.cli().is_empty());
}

#[tokio::test]
async fn test_repair_reintroduces_failed_masters_via_meet() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 0);
    let manager = TopologyManager::new(&admin, &target);

    admin.queue_nodes(
        &[
            master_row(&id('1'), &leader_fqdn(0), "0-5460"),
            failed_master_row(&id('2'), &leader_fqdn(1), "5461-10922"),
            disconnected_master_row(&id('3'), &leader_fqdn(2), "10923-16383"),
        ]
        .join("\n"),
        1,
    );
    admin.set_pod_ip("my-cluster-leader-1", "10.0.1.1");
    admin.set_pod_ip("my-cluster-leader-2", "10.0.1.2");

    manager
        .repair_disconnected_masters()
        .await
        .expect("repair should succeed");

    assert_eq!(
        admin.ops(),
        vec![
            "cluster_meet my-cluster-leader-0 10.0.1.1:6379".to_string(),
            "cluster_meet my-cluster-leader-0 10.0.1.2:6379".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_repair_aggregates_per_pod_failures() {
    let admin = RecordingMemberAdmin::new();
    let target = target(3, 0);
    let manager = TopologyManager::new(&admin, &target);

    admin.queue_nodes(
        &[
            master_row(&id('1'), &leader_fqdn(0), "0-5460"),
            failed_master_row(&id('2'), &leader_fqdn(1), "5461-10922"),
            failed_master_row(&id('3'), &leader_fqdn(2), "10923-16383"),
        ]
        .join("\n"),
        1,
    );
    admin.fail_pod_ip("my-cluster-leader-1");
    admin.set_pod_ip("my-cluster-leader-2", "10.0.1.2");

    let err = manager
        .repair_disconnected_masters()
        .await
        .expect_err("one pod has no IP");

    match err {
        TopologyError::Aggregate(failures) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("my-cluster-leader-1"));
        }
        other => panic!("expected aggregate error, got {:?}", other),
    }
    // The healthy repair still went through.
    assert_eq!(
        admin.ops(),
        vec!["cluster_meet my-cluster-leader-0 10.0.1.2:6379".to_string()]
    );
}

#[tokio::test]
async fn test_node_failover_flushes_members_refusing_reset() {
    let admin = RecordingMemberAdmin::new();
    let target = target(1, 1);
    let manager = TopologyManager::new(&admin, &target);

    admin.fail_next_reset("my-cluster-leader-0");

    manager.node_failover().await.expect("failover should succeed");

    assert_eq!(
        admin.ops(),
        vec![
            "flushall my-cluster-leader-0".to_string(),
            "cluster_reset my-cluster-leader-0".to_string(),
            "cluster_reset my-cluster-follower-0".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_health_check_requires_three_ok_assertions() {
    let target = target(3, 0);

    let admin = RecordingMemberAdmin::new();
    admin.set_cli_output(
        "[OK] 0 keys in 3 masters.\n\
         [OK] All nodes agree about slots configuration.\n\
         [OK] All 16384 slots covered.\n",
    );
    let manager = TopologyManager::new(&admin, &target);
    assert!(manager.health_check().await.expect("check should run"));

    let cli = admin.cli();
    assert_eq!(cli[0].1[0..3], ["redis-cli", "--cluster", "check"]);
    assert_eq!(cli[0].1[3], "127.0.0.1:6379");

    let admin = RecordingMemberAdmin::new();
    admin.set_cli_output(
        "[OK] 0 keys in 3 masters.\n\
         [ERR] Nodes don't agree about configuration!\n\
         [OK] All 16384 slots covered.\n",
    );
    let manager = TopologyManager::new(&admin, &target);
    assert!(!manager.health_check().await.expect("check should run"));
}

#[tokio::test]
async fn test_dynamic_config_reaches_every_member() {
    let admin = RecordingMemberAdmin::new();
    let target = target(1, 1);
    let manager = TopologyManager::new(&admin, &target);

    let params = std::collections::BTreeMap::from([(
        "maxmemory-policy".to_string(),
        "allkeys-lru".to_string(),
    )]);

    manager
        .set_dynamic_config(&params)
        .await
        .expect("config should apply");

    assert_eq!(
        admin.ops(),
        vec![
            "config_set my-cluster-leader-0 maxmemory-policy=allkeys-lru".to_string(),
            "config_set my-cluster-follower-0 maxmemory-policy=allkeys-lru".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_dynamic_config_aggregates_failures_without_stopping() {
    let admin = RecordingMemberAdmin::new();
    let target = target(1, 1);
    let manager = TopologyManager::new(&admin, &target);

    admin.fail_config_set("my-cluster-leader-0");
    let params = std::collections::BTreeMap::from([(
        "maxmemory-policy".to_string(),
        "allkeys-lru".to_string(),
    )]);

    let err = manager
        .set_dynamic_config(&params)
        .await
        .expect_err("one member refuses");

    match err {
        TopologyError::Aggregate(failures) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("my-cluster-leader-0"));
        }
        other => panic!("expected aggregate error, got {:?}", other),
    }
    assert_eq!(
        admin.ops(),
        vec!["config_set my-cluster-follower-0 maxmemory-policy=allkeys-lru".to_string()]
    );
}
