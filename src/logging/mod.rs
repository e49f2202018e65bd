use crate::cli::TracingFormat;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Configure and initialize diagnostics on stderr.
///
/// Stdout carries the HTTP response, so nothing is ever logged there.
pub fn setup_logging(log_level: &str, tracing_format: TracingFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,db_healthcheck={log_level}")));

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(false);

    // try_init: a second call (tests, repeated setup) keeps the first subscriber.
    let result = match tracing_format {
        TracingFormat::Pretty => tracing_subscriber::registry().with(filter).with(layer.compact()).try_init(),
        TracingFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json().flatten_event(true))
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}
