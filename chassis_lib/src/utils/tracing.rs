//! Centralized tracing initialization for the bridge processes.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Initialize tracing with a global subscriber.
///
/// - Respects the `RUST_LOG` environment variable (defaults to "info")
/// - Outputs compact logs with targets so audit events can be filtered
///
/// Calling it more than once is harmless; later calls return an error that
/// callers are free to ignore.
///
/// # Example
/// ```no_run
/// use chassis_lib::init_tracing;
///
/// fn main() {
///     init_tracing().ok();
/// }
/// ```
pub fn init_tracing() -> eyre::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install tracing subscriber: {}", e))
}
