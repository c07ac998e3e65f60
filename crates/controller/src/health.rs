//! Hypervisor health check: query the observed role and cross-check it
//! against the machine's cached belief.

use serde_json::Value;

use colod_qmp::Qmp;
use colod_types::Event;

use crate::{Error, EventQueue, SharedStatus};

const QUERY_STATUS: &str = "{\"execute\":\"query-status\"}";
const QUERY_COLO_STATUS: &str = "{\"execute\":\"query-colo-status\"}";

fn qemu_running(status: &str) -> bool {
    matches!(
        status,
        "running" | "finish-migrate" | "colo" | "prelaunch" | "paused"
    )
}

/// Map query-status and query-colo-status to `(primary, replication)`.
pub async fn query_qemu_status(qmp: &Qmp, queue: &EventQueue) -> Result<(bool, bool), Error> {
    let qemu_status = execute_checked(qmp, queue, QUERY_STATUS).await?;
    let colo_status = execute_checked(qmp, queue, QUERY_COLO_STATUS).await?;

    let status = member_str(&qemu_status, "status");
    let mode = member_str(&colo_status, "mode");
    let reason = member_str(&colo_status, "reason");
    let (Some(status), Some(mode), Some(reason)) = (status, mode, reason) else {
        return Err(Error::StatusParse);
    };

    if status == "inmigrate" || status == "shutdown" {
        Ok((false, false))
    } else if qemu_running(status) && mode == "none" && (reason == "none" || reason == "request") {
        Ok((true, false))
    } else if qemu_running(status) && mode == "primary" {
        Ok((true, true))
    } else if qemu_running(status) && mode == "secondary" {
        Ok((false, true))
    } else {
        Err(Error::UnknownStatus {
            status: status.to_owned(),
            colo: format!("{mode}, {reason}"),
        })
    }
}

/// Full health check. Any failure (broken channel, unparseable output,
/// role mismatch) raises `EVENT_FAILED`; the mismatch test is suspended
/// while the machine is transitioning between roles.
pub async fn check_health(
    qmp: &Qmp,
    status: &SharedStatus,
    queue: &EventQueue,
) -> Result<(), Error> {
    let (primary, replication) = match query_qemu_status(qmp, queue).await {
        Ok(observed) => observed,
        Err(err) => {
            queue.push(Event::Failed, &err.to_string());
            return Err(err);
        }
    };

    if !status.transitioning()
        && (status.primary() != primary || status.replication() != replication)
    {
        let err = Error::StatusMismatch {
            observed_primary: primary,
            observed_replication: replication,
            expected_primary: status.primary(),
            expected_replication: status.replication(),
        };
        queue.push(Event::Failed, &err.to_string());
        return Err(err);
    }

    Ok(())
}

async fn execute_checked(
    qmp: &Qmp,
    queue: &EventQueue,
    command: &str,
) -> Result<colod_qmp::Response, Error> {
    let reply = match qmp.execute(command).await {
        Ok(reply) => reply,
        Err(err) => {
            queue.push(Event::Failed, &err.to_string());
            return Err(err.into());
        }
    };
    if reply.has_error() {
        return Err(colod_qmp::Error::Qmp {
            command: command.to_owned(),
            line: reply.line,
        }
        .into());
    }
    Ok(reply)
}

fn member_str<'r>(reply: &'r colod_qmp::Response, member: &str) -> Option<&'r str> {
    reply
        .json
        .get("return")
        .and_then(|ret| ret.get(member))
        .and_then(Value::as_str)
}
