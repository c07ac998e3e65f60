use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};

use eyre::{eyre, WrapErr};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt::format::{DefaultVisitor, Writer},
    layer::Layer,
    prelude::*,
};

use crate::cli::arguments::Run;
use crate::config::DaemonConfig;

pub fn init(args: &Run, config: &DaemonConfig) -> eyre::Result<()> {
    let level = config.logger.level;

    let filter = Targets::new()
        .with_target("colod_qmp", level)
        .with_target("colod_cluster", level)
        .with_target("colod_controller", level)
        .with_target("colod_client", level)
        .with_default(level);

    let stderr_layer = (!args.syslog)
        .then(|| tracing_subscriber::fmt::layer().with_filter(filter.clone()));

    let syslog_layer = if args.syslog {
        Some(SyslogLayer::new()?.with_filter(filter))
    } else {
        None
    };

    // The trace log captures everything, deadlines and queue traffic
    // included.
    let trace_layer = if args.trace {
        let path = config.base_directory.join("trace.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open trace log {path:?}"))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .with_filter(LevelFilter::TRACE),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(syslog_layer)
        .with(trace_layer)
        .try_init()?;

    Ok(())
}

/// Forwards events to the system log, keeping severities intact.
struct SyslogLayer {
    logger: Mutex<syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>>,
}

impl SyslogLayer {
    fn new() -> eyre::Result<Self> {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: "colod".into(),
            pid: std::process::id() as _,
        };
        let logger =
            syslog::unix(formatter).map_err(|err| eyre!("failed to connect to syslog: {err}"))?;
        Ok(Self {
            logger: Mutex::new(logger),
        })
    }
}

impl<S> Layer<S> for SyslogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut DefaultVisitor::new(Writer::new(&mut message), true));

        let mut logger = self.logger.lock().expect("syslog lock poisoned");
        let _ = match *event.metadata().level() {
            Level::ERROR => logger.err(message),
            Level::WARN => logger.warning(message),
            Level::INFO => logger.info(message),
            Level::DEBUG | Level::TRACE => logger.debug(message),
        };
    }
}
