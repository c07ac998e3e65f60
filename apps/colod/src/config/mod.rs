use std::path::{Path, PathBuf};

use config::Config;
use eyre::WrapErr;
use serde::Deserialize;

use crate::cli::arguments::Run;

mod logger;
pub use logger::LoggerConfig;

#[derive(Deserialize)]
pub struct DaemonConfig {
    /// Name of the replicated instance; also the broadcast group name.
    pub instance_name: String,

    /// Name of this node on the cluster bus.
    pub node_name: String,

    /// Directory holding colod.sock, colod.pid and the logs.
    pub base_directory: PathBuf,

    /// Hypervisor management socket.
    pub qmp_path: PathBuf,

    #[serde(default)]
    pub qmp_yank_path: Option<PathBuf>,

    #[serde(default = "default_timeout_low")]
    pub timeout_low: u64,

    #[serde(default = "default_timeout_high")]
    pub timeout_high: u64,

    /// 0 disables the watchdog.
    #[serde(default)]
    pub watchdog_interval: u64,

    #[serde(default)]
    pub primary: bool,

    /// Seconds to wait for services on shutdown.
    #[serde(default)]
    pub shutdown_timeout: Option<u64>,

    #[serde(default)]
    pub logger: LoggerConfig,
}

fn default_timeout_low() -> u64 {
    600
}

fn default_timeout_high() -> u64 {
    10_000
}

impl DaemonConfig {
    /// Merge the optional TOML file with the command-line flags; flags win.
    pub fn load(args: &Run) -> eyre::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.clone()));
        }

        let builder = builder
            .set_override_option("instance_name", args.instance_name.clone())?
            .set_override_option("node_name", args.node_name.clone())?
            .set_override_option("base_directory", path_override(&args.base_directory))?
            .set_override_option("qmp_path", path_override(&args.qmp_path))?
            .set_override_option("qmp_yank_path", path_override(&args.qmp_yank_path))?
            .set_override_option("timeout_low", args.timeout_low)?
            .set_override_option("timeout_high", args.timeout_high)?
            .set_override_option("watchdog_interval", args.watchdog_interval)?
            .set_override_option("primary", args.primary.then_some(true))?;

        builder
            .build()?
            .try_deserialize()
            .wrap_err("invalid or incomplete configuration")
    }

    /// The yank channel path, falling back to the main channel.
    pub fn qmp_yank_path(&self) -> &Path {
        self.qmp_yank_path.as_deref().unwrap_or(&self.qmp_path)
    }
}

fn path_override(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|path| path.display().to_string())
}
