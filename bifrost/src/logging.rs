//! Logging setup for the bridge binary.

use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer as _;

/// Install the global tracing subscriber. The `RUST_LOG` environment
/// variable takes precedence over `directives`. When `pretty` is false the
/// output is JSON with one flattened object per event.
pub fn setup_logging(directives: &str, pretty: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let main_layer = if pretty {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_timer(UtcTime::rfc_3339())
            .pretty()
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_line_number(true)
            .with_file(true)
            .with_timer(UtcTime::rfc_3339())
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(main_layer)
        .init()
}
