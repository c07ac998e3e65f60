use serde_json::{json, Value};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use colod_controller::{execute_nocheck, health, request_start_migration};
use colod_types::Event;

use crate::ClientContext;

/// Replies are written with a short deadline so one stuck client cannot
/// wedge its worker forever.
const WRITE_TIMEOUT_MS: u64 = 1000;

pub(crate) async fn run(stream: UnixStream, ctx: ClientContext, cancellation: CancellationToken) {
    let (mut reader, mut writer) = colod_qmp::channel::split(stream);

    loop {
        let line = tokio::select! {
            line = reader.read_line(0) => line,
            _ = cancellation.cancelled() => {
                // Half-close so the peer notices the shutdown.
                let _ = writer.shutdown().await;
                return;
            }
        };

        let line = match line {
            Ok(line) => line,
            Err(colod_qmp::ChannelError::Eof) => return,
            Err(err) => {
                warn!("client connection broke: {err}");
                return;
            }
        };

        let request: Value = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                warn!("client sent invalid json: {err}");
                return;
            }
        };

        let reply = dispatch(&line, &request, &ctx).await;
        trace!(%reply, "management reply");
        if let Err(err) = writer.write_all(&format!("{reply}\n"), WRITE_TIMEOUT_MS).await {
            warn!("client connection broke: {err}");
            return;
        }
    }
}

async fn dispatch(line: &str, request: &Value, ctx: &ClientContext) -> String {
    let Some(command) = request.get("exec-colod") else {
        return passthrough(line, ctx).await;
    };

    let Some(command) = command.as_str() else {
        return error_reply("could not get exec-colod member");
    };

    match command {
        "query-status" => query_status(ctx).await,
        "query-store" => json!({"return": ctx.store.get()}).to_string(),
        "set-store" => set_store(request, ctx),
        "quit" => {
            ctx.queue.push(Event::Quit, "client request");
            ok_reply()
        }
        "autoquit" => {
            ctx.queue.push(Event::Autoquit, "client request");
            ok_reply()
        }
        "start-migration" => {
            // Discarded while a migration or replication is running.
            request_start_migration(&ctx.queue, &ctx.status);
            ok_reply()
        }
        "set-migration" => set_commands(request, |commands| ctx.commands.set_migration(commands)),
        "set-primary-failover" => {
            set_commands(request, |commands| ctx.commands.set_failover_primary(commands))
        }
        "set-secondary-failover" => {
            set_commands(request, |commands| ctx.commands.set_failover_secondary(commands))
        }
        _ => error_reply("unknown command"),
    }
}

/// Forward anything without `exec-colod` to the hypervisor and return its
/// reply verbatim, error member included.
async fn passthrough(line: &str, ctx: &ClientContext) -> String {
    match execute_nocheck(&ctx.qmp, &ctx.queue, &ctx.watchdog, line).await {
        Ok(reply) => reply.line,
        Err(err) => error_reply(&err.to_string()),
    }
}

async fn query_status(ctx: &ClientContext) -> String {
    if let Err(err) = health::check_health(&ctx.qmp, &ctx.status, &ctx.queue).await {
        return json!({"error": err.to_string(), "state": "error"}).to_string();
    }

    let status = ctx.status.snapshot();
    json!({
        "return": {"role": status.role(), "replication": status.replication}
    })
    .to_string()
}

fn set_store(request: &Value, ctx: &ClientContext) -> String {
    let Some(store) = request.get("store") else {
        return error_reply("member 'store' missing");
    };
    ctx.store.replace(store.clone());
    ok_reply()
}

fn set_commands(request: &Value, set: impl FnOnce(Vec<String>)) -> String {
    let Some(commands) = request.get("commands") else {
        return error_reply("member 'commands' missing");
    };
    let Some(commands) = commands.as_array() else {
        return error_reply("member 'commands' must be an array");
    };
    set(commands.iter().map(ToString::to_string).collect());
    ok_reply()
}

fn ok_reply() -> String {
    "{\"return\": {}}".to_owned()
}

fn error_reply(message: &str) -> String {
    json!({"error": message}).to_string()
}
