//! The full primary-side migration protocol driven over the management
//! socket, ending in running replication.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

#[tokio::test]
async fn happy_migration() {
    let (daemon, mut qemu, mut client) = common::boot(true, 0).await;

    let reply = client
        .request(&json!({
            "exec-colod": "set-migration",
            "commands": [{"execute": "x"}],
        }))
        .await;
    assert_eq!(reply, json!({"return": {}}));

    let reply = client
        .request(&json!({"exec-colod": "start-migration"}))
        .await;
    assert_eq!(reply, json!({"return": {}}));

    qemu.main.expect("migrate-set-capabilities").await;
    qemu.main
        .send(&json!({"event": "MIGRATION", "data": {"status": "pre-switchover"}}))
        .await;
    qemu.main.expect("x").await;
    qemu.main.expect("migrate-continue").await;
    qemu.main
        .send(&json!({"event": "MIGRATION", "data": {"status": "colo"}}))
        .await;

    timeout(common::TICK, async {
        while !daemon.status.replication() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("replication must be running");

    // query-status cross-checks the cached role against the hypervisor.
    let query = json!({"exec-colod": "query-status"});
    let status = client.request(&query);
    let serve = async {
        qemu.main
            .expect_reply("query-status", &json!({"return": {"status": "running"}}))
            .await;
        qemu.main
            .expect_reply(
                "query-colo-status",
                &json!({"return": {"mode": "primary", "reason": "none"}}),
            )
            .await;
    };
    let (reply, ()) = tokio::join!(status, serve);
    assert_eq!(
        reply,
        json!({"return": {"role": "primary", "replication": true}})
    );

    daemon.teardown().await;
}
