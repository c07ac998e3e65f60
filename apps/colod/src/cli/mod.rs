mod actions;
pub(crate) mod arguments;
mod daemon;
mod logging;

use clap::Parser;

pub fn run() -> eyre::Result<()> {
    let args = arguments::Run::parse();
    let config = crate::config::DaemonConfig::load(&args)?;

    // Artefacts and the double fork happen before the runtime exists.
    actions::prepare(&args, &config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(actions::run(config))
}
