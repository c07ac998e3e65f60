//! Boot the daemon as secondary and quit before replication starts.

mod common;

use serde_json::json;

#[tokio::test]
async fn quit_early() {
    let (daemon, mut qemu, mut client) = common::boot(false, 0).await;

    // The secondary enables migration events on startup.
    qemu.main.expect("migrate-set-capabilities").await;

    let reply = client.request(&json!({"exec-colod": "quit"})).await;
    assert_eq!(reply, json!({"return": {}}));

    daemon.finished().await;
    daemon.teardown().await;
}
