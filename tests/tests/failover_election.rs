//! Two daemons on one agreed-order bus: replication breaks on node A, A
//! wins the election and ends up standalone primary while B fails.

mod common;

use std::time::Duration;

use colod_cluster::mem::MemHub;
use colod_types::Event;
use serde_json::json;
use tokio::time::timeout;

#[tokio::test]
async fn one_winner_one_loser() {
    let hub = MemHub::new();
    let (a, mut qemu_a, _client_a) = common::boot_with(false, 0, Some(hub.join())).await;
    let (b, mut qemu_b, _client_b) = common::boot_with(false, 0, Some(hub.join())).await;

    qemu_a.main.expect("migrate-set-capabilities").await;
    qemu_b.main.expect("migrate-set-capabilities").await;

    // A reaches running replication; B stays waiting for its resume.
    qemu_a
        .main
        .send(&json!({"event": "RESUME", "timestamp": {"seconds": 0}}))
        .await;
    timeout(common::TICK, async {
        while !a.status.replication() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("node A must reach colo running");

    // Replication breaks on A: it broadcasts FAILOVER, wins (its own
    // message delivers first), yanks and becomes standalone primary.
    a.queue.push(Event::FailoverSync, "test: replication broke");

    qemu_a.yank.expect("yank").await;

    // B observes the peer's failover and fails, stopping its hypervisor.
    qemu_b.main.expect("stop").await;

    timeout(common::TICK, async {
        while !a.status.primary() || !b.status.failed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("A must win, B must fail");

    assert!(a.status.primary());
    assert!(!a.status.replication());
    assert!(!a.status.failed());

    assert!(b.status.failed());
    assert!(b.status.peer_failover());

    a.teardown().await;
    b.teardown().await;
}
