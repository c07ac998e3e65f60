use std::fs::OpenOptions;
use std::sync::Arc;

use eyre::{eyre, WrapErr};
use tokio::select;
use tokio::signal::unix;
use tokio::signal::unix::SignalKind;
use tracing::info;

use crate::cli::{arguments::Run, daemon::Daemon, logging};
use crate::config::DaemonConfig;

/// Everything that must happen before the async runtime exists: the base
/// directory, the pidfile, the double fork and the log plumbing.
pub fn prepare(args: &Run, config: &DaemonConfig) -> eyre::Result<()> {
    if !config.base_directory.exists() {
        std::fs::create_dir_all(&config.base_directory).wrap_err_with(|| {
            format!("failed to create directory {:?}", config.base_directory)
        })?;
    }

    if args.daemonize {
        daemonize(config)?;
    } else {
        let pidfile = config.base_directory.join("colod.pid");
        std::fs::write(&pidfile, format!("{}\n", std::process::id()))
            .wrap_err_with(|| format!("failed to write pidfile {pidfile:?}"))?;
    }

    logging::init(args, config)
}

fn daemonize(config: &DaemonConfig) -> eyre::Result<()> {
    let log_path = config.base_directory.join("colod.log");
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .wrap_err_with(|| format!("failed to open log file {log_path:?}"))?;

    daemonize::Daemonize::new()
        .pid_file(config.base_directory.join("colod.pid"))
        .working_directory(&config.base_directory)
        .stdout(log.try_clone().wrap_err("failed to duplicate log handle")?)
        .stderr(log)
        .start()
        .map_err(|err| eyre!("failed to daemonize: {err}"))?;

    Ok(())
}

pub async fn run(config: DaemonConfig) -> eyre::Result<()> {
    info!(
        instance = %config.instance_name,
        node = %config.node_name,
        primary = config.primary,
        "starting colod"
    );

    let daemon = Arc::new(Daemon::new(config).await?);
    daemon.run()?;

    let mut sigterm =
        unix::signal(SignalKind::terminate()).expect("Failed to create SIGTERM signal handler");
    let mut sigint =
        unix::signal(SignalKind::interrupt()).expect("Failed to create SIGINT signal handler");

    select! {
        _ = daemon.finished() => {
            info!("daemon finished");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM signal");
            daemon.request_quit();
        }
        _ = sigint.recv() => {
            info!("Received SIGINT signal");
            daemon.request_quit();
        }
    }

    daemon.shutdown().await;

    Ok(())
}
