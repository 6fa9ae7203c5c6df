//! Tracing subscriber setup

use crate::config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level and format after command-line overrides
pub fn effective(config: &LoggingConfig, level: Option<&str>, json: bool) -> LoggingConfig {
    LoggingConfig {
        level: level.unwrap_or(&config.level).to_string(),
        json: json || config.json,
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.level.clone().into());

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            json: true,
        };
        assert_eq!(effective(&config, None, false), config);

        let overridden = effective(&config, Some("debug"), false);
        assert_eq!(overridden.level, "debug");
        assert!(overridden.json);

        assert!(effective(&LoggingConfig::default(), None, true).json);
    }
}
