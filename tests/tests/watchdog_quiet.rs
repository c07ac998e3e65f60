//! The watchdog only checks a quiet hypervisor: inbound events keep
//! pushing the timer out.

mod common;

use std::time::Duration;

use serde_json::json;

async fn serve_health_check(qemu: &mut common::Qemu) {
    // Freshly started secondary: not yet migrated, no colo mode.
    qemu.main
        .expect_reply("query-status", &json!({"return": {"status": "inmigrate"}}))
        .await;
    qemu.main
        .expect_reply(
            "query-colo-status",
            &json!({"return": {"mode": "none", "reason": "none"}}),
        )
        .await;
}

#[tokio::test]
async fn watchdog_checks_only_a_quiet_channel() {
    let (daemon, mut qemu, _client) = common::boot(false, 200).await;

    qemu.main.expect("migrate-set-capabilities").await;

    // Two checks on a quiet channel, one interval apart.
    serve_health_check(&mut qemu).await;
    serve_health_check(&mut qemu).await;

    // A stream of unrelated events keeps resetting the timer; no health
    // check may fire while they arrive.
    for _ in 0..8 {
        qemu.main
            .send(&json!({"event": "NIC_RX_FILTER_CHANGED"}))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(
        qemu.main.try_recv(Duration::from_millis(20)).await.is_none(),
        "watchdog must stay quiet while events arrive"
    );

    // Silence again: the next check comes after a full interval.
    serve_health_check(&mut qemu).await;

    daemon.teardown().await;
}
