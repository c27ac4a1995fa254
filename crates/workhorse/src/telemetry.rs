// Logging setup
//
// The library only emits `tracing` events; binaries choose whether and how
// to collect them by calling `init_telemetry` once at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// `EnvFilter` directive, e.g. `workhorse=debug,info`
    pub log_filter: Option<String>,
    /// Emit to stderr through the fmt layer
    pub enable_console: bool,
    /// Include the event target in console output
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "workhorse".to_string(),
            log_filter: None,
            enable_console: true,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKHORSE_SERVICE_NAME`: Service name (default: "workhorse")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            service_name: lookup("WORKHORSE_SERVICE_NAME")
                .unwrap_or_else(|| "workhorse".to_string()),
            log_filter: lookup("RUST_LOG").or_else(|| lookup("LOG_LEVEL")),
            ..Self::default()
        }
    }

    /// Parsed filter, falling back to [`DEFAULT_LOG_FILTER`] when the
    /// directive is missing or invalid
    pub fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install the global subscriber
///
/// Returns `false` if a subscriber was already installed, which happens
/// when tests or an embedding application got there first.
///
/// # Example
///
/// ```ignore
/// use workhorse::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     init_telemetry(TelemetryConfig::from_env());
///     // ... build and run the manager
/// }
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> bool {
    let console_layer = if config.enable_console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(config.with_target)
                .with_filter(config.filter()),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = %config.service_name, "Telemetry initialized");
    }
    installed
}
