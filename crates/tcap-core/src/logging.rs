//! tracing-subscriber setup for applications embedding the pipelines

use crate::config::LoggingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    /// Anything other than "json" falls back to text.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Install a global subscriber. `RUST_LOG` overrides `level` when set.
///
/// Returns false if a subscriber was already installed.
pub fn init_logging(level: &str, format: LogFormat) -> bool {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .is_ok(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .is_ok(),
    }
}

pub fn init_from_config(cfg: &LoggingConfig) -> bool {
    init_logging(&cfg.level, LogFormat::parse(&cfg.format))
}
