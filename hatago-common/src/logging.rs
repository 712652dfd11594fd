//! Logging bootstrap.
//!
//! All logs go to stderr so stdout can carry protocol frames. The level
//! comes from `HATAGO_LOG_LEVEL` (silent, error, warn, info, debug,
//! trace); `HATAGO_LOG=json` switches to the JSON formatter.

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log level.
pub const LOG_LEVEL_ENV: &str = "HATAGO_LOG_LEVEL";

/// Environment variable selecting the log format (`json` or unset).
pub const LOG_FORMAT_ENV: &str = "HATAGO_LOG";

/// Environment variable enabling the `/metrics` endpoint.
pub const METRICS_ENV: &str = "HATAGO_METRICS";

/// Initialize the global tracing subscriber from the environment.
///
/// Safe to call once per process; later calls are ignored.
pub fn init_logging() {
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    let directive = match level.as_str() {
        "silent" => "off",
        other => other,
    };
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
}

/// Whether the opt-in metrics endpoint should be served.
pub fn metrics_enabled() -> bool {
    std::env::var(METRICS_ENV).map(|v| v == "1").unwrap_or(false)
}
