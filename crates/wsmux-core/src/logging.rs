//! Logging initialization using the `tracing` ecosystem.
//!
//! - Console output, human-readable or JSON lines
//! - File output (daily rotation via `tracing-appender`)
//! - Log level from `RUST_LOG`, falling back to [`LogOptions::level`]

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging settings, usually filled from the command line.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Default filter if `RUST_LOG` is not set (e.g. `"info"`).
    pub level: String,
    /// Directory for daily-rotating log files.
    pub dir: Option<String>,
    /// Log file prefix (e.g. `"wsmux-runner"`).
    pub file_prefix: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self { level: "info".into(), dir: None, file_prefix: "wsmux".into(), json: false }
    }
}

/// Install the global tracing subscriber.
///
/// Should be called once at program start. A second call is ignored (the
/// first subscriber stays installed).
pub fn init_logging(opts: &LogOptions) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&opts.level));

    let console = if opts.json {
        fmt::layer().json().with_target(true).with_thread_ids(true).boxed()
    } else {
        fmt::layer().with_target(true).with_thread_ids(true).with_ansi(true).boxed()
    };

    let file = opts.dir.as_deref().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, &opts.file_prefix);
        fmt::layer().with_writer(appender).with_ansi(false).with_target(true).with_thread_ids(true)
    });

    let installed = tracing_subscriber::registry().with(env_filter).with(console).with(file).try_init();

    if let Err(e) = installed {
        tracing::debug!("tracing subscriber already installed: {e}");
    }
}
