//! Logging initialization.
//!
//! One collector process hosts several concurrently reconnecting feeds, so
//! the default filter pins the transport crates (tungstenite, hyper,
//! reqwest) to `warn`: at `debug` their per-frame and per-request chatter
//! drowns the feed logs this service is actually about. Setting `RUST_LOG`
//! overrides the whole filter, quieted targets included.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Transport dependencies whose per-connection output is noise at the
/// collector's log level.
const QUIET_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "hyper", "reqwest"];

fn default_directives(level: &str) -> String {
    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Install the global tracing subscriber: a colored console layer, plus a
/// plain daily-rotating file layer under `log_dir` when one is given
/// (files are named `<file_prefix>.<date>`).
///
/// Call once at program start. `level` applies to the collector's own
/// crates; `RUST_LOG` takes precedence when set.
pub fn init_logging(level: &str, log_dir: Option<&str>, file_prefix: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let console = fmt::layer().with_target(true).with_ansi(true);
    let registry = tracing_subscriber::registry().with(filter).with(console);

    match log_dir {
        Some(dir) => {
            let file = fmt::layer()
                .with_writer(tracing_appender::rolling::daily(dir, file_prefix))
                .with_ansi(false);
            registry.with(file).init();
        }
        None => registry.init(),
    }
}
