use std::path::PathBuf;

use clap::Parser;

/// Supervises one hypervisor instance of a checkpointed-replication pair
/// and coordinates failover with the peer daemon.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Run {
    /// Detach and run in the background, logging to <base_directory>/colod.log.
    #[clap(long)]
    pub daemonize: bool,

    /// Log through syslog instead of stderr.
    #[clap(long)]
    pub syslog: bool,

    /// Optional TOML configuration file; flags take precedence.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Name of the replicated instance (required).
    #[clap(long = "instance_name")]
    pub instance_name: Option<String>,

    /// Name of this cluster node (required).
    #[clap(long = "node_name")]
    pub node_name: Option<String>,

    /// Directory for the management socket, pidfile and logs (required).
    #[clap(long = "base_directory")]
    pub base_directory: Option<PathBuf>,

    /// Hypervisor management socket (required).
    #[clap(long = "qmp_path")]
    pub qmp_path: Option<PathBuf>,

    /// Second management socket for the out-of-band abort; defaults to
    /// qmp_path.
    #[clap(long = "qmp_yank_path")]
    pub qmp_yank_path: Option<PathBuf>,

    /// Base hypervisor response deadline in milliseconds [default: 600].
    #[clap(long = "timeout_low")]
    pub timeout_low: Option<u64>,

    /// Raised deadline across the checkpoint swap in milliseconds
    /// [default: 10000].
    #[clap(long = "timeout_high")]
    pub timeout_high: Option<u64>,

    /// Health-check period in milliseconds; 0 disables the watchdog
    /// [default: 0].
    #[clap(long = "watchdog_interval")]
    pub watchdog_interval: Option<u64>,

    /// Start in primary mode.
    #[clap(long)]
    pub primary: bool,

    /// Write a TRACE-level log to <base_directory>/trace.log.
    #[clap(long)]
    pub trace: bool,
}
