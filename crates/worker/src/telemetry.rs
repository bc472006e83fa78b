//! Logging setup for the worker binary

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Crates whose level `LOG_LEVEL` controls
const ACTFLOW_TARGETS: [&str; 2] = ["actflow_durable", "actflow_worker"];

/// Log configuration
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Full filter directive, e.g. `actflow_durable=debug,sqlx=warn`
    pub log_filter: Option<String>,

    /// Level applied to the actflow crates when no filter is given
    pub log_level: Option<String>,
}

impl LogConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUST_LOG`: Filter directive, takes precedence
    /// - `LOG_LEVEL`: Level for the actflow crates (default: "info")
    pub fn from_env() -> Self {
        Self {
            log_filter: std::env::var("RUST_LOG").ok(),
            log_level: std::env::var("LOG_LEVEL").ok(),
        }
    }

    /// The filter directive this configuration resolves to
    pub fn directive(&self) -> String {
        if let Some(filter) = self.log_filter.as_deref().filter(|f| !f.trim().is_empty()) {
            return filter.to_string();
        }

        let level = self
            .log_level
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or("info");

        let mut directive = String::from("info");
        for target in ACTFLOW_TARGETS {
            directive.push_str(&format!(",{}={}", target, level));
        }
        directive
    }
}

/// Install the global `fmt` subscriber
///
/// An unparseable directive falls back to `info`.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.directive()).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
}
