//! Execute wrappers shared by the state machine and the management
//! workers: every hypervisor command refreshes the watchdog, turns channel
//! failures into a queued `FAILED` event and consumes the did-yank latch.

use colod_qmp::{Qmp, Response};
use colod_types::Event;
use tracing::warn;

use crate::{Error, EventQueue, WatchdogHandle};

/// Run one command. The reply is returned as-is, error member included.
pub async fn execute_nocheck(
    qmp: &Qmp,
    queue: &EventQueue,
    watchdog: &WatchdogHandle,
    command: &str,
) -> Result<Response, Error> {
    watchdog.refresh();

    let reply = match qmp.execute(command).await {
        Ok(reply) => reply,
        Err(err) => {
            queue.push(Event::Failed, &err.to_string());
            return Err(err.into());
        }
    };

    // The yank channel may have latched an error while we were waiting.
    if let Some(message) = qmp.error() {
        queue.push(Event::Failed, &message);
        return Err(colod_qmp::Error::Failed(message).into());
    }

    if qmp.take_yank() {
        queue.push(Event::FailoverSync, "did yank");
    }

    Ok(reply)
}

/// Run one command and classify an error reply as [`colod_qmp::Error::Qmp`].
pub async fn execute(
    qmp: &Qmp,
    queue: &EventQueue,
    watchdog: &WatchdogHandle,
    command: &str,
) -> Result<Response, Error> {
    let reply = execute_nocheck(qmp, queue, watchdog, command).await?;
    if reply.has_error() {
        return Err(colod_qmp::Error::Qmp {
            command: command.to_owned(),
            line: reply.line,
        }
        .into());
    }
    Ok(reply)
}

/// Run a configured command sequence. With `ignore_errors`, command-level
/// errors are logged and skipped; channel failures always abort.
pub(crate) async fn execute_array(
    qmp: &Qmp,
    queue: &EventQueue,
    watchdog: &WatchdogHandle,
    commands: &[String],
    ignore_errors: bool,
) -> Result<(), Error> {
    for command in commands {
        match execute(qmp, queue, watchdog, command).await {
            Ok(_) => {}
            Err(err) if ignore_errors && err.is_qmp_command() => {
                warn!("ignoring qmp error: {err}");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
