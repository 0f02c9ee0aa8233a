//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and one of three
//! output formats. `RUST_LOG`, when set, wins over the configured level.

use gateway_config::{LogFormat, LoggingConfig};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    Init(String),
    /// Failed to parse filter
    #[error("Failed to parse log filter: {0}")]
    FilterParse(String),
}

/// Initialize the global subscriber
///
/// # Errors
/// Returns error if the level is not a valid filter or a subscriber is already installed
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;
    let span_events = span_events(config);

    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(span_events)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_target(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| LoggingError::FilterParse(e.to_string()))
}

fn span_events(config: &LoggingConfig) -> FmtSpan {
    if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_from_level() {
        let config = LoggingConfig {
            level: "gateway_server=debug,info".to_string(),
            ..LoggingConfig::default()
        };
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_span_events() {
        let mut config = LoggingConfig::default();
        assert_eq!(span_events(&config), FmtSpan::NONE);
        config.span_events = true;
        assert_eq!(span_events(&config), FmtSpan::NEW | FmtSpan::CLOSE);
    }
}
