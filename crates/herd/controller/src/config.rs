//! Configuration for herdctl
//!
//! Layers, lowest precedence first: built-in defaults, an optional config
//! file (TOML or YAML, by extension), then `HERD_`-prefixed environment
//! variables using `__` between sections (`HERD_FLEET__POLL_INTERVAL_SECS`).

use herd_backend::FleetSettings;
use herd_values::MergerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HerdConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Values merging conventions
    #[serde(default)]
    pub values: MergerConfig,

    /// Fleet bundle backend
    #[serde(default)]
    pub fleet: FleetSettings,

    /// Rancher app backend
    #[serde(default)]
    pub rancher: RancherConfig,

    /// Engine behavior
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Rancher app backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RancherConfig {
    /// Readiness poll interval in seconds
    #[serde(default = "default_rancher_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for RancherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_rancher_poll_interval(),
        }
    }
}

impl RancherConfig {
    /// Readiness poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Which backend deploys stack charts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackBackend {
    /// One multi-target Fleet bundle per chart
    #[default]
    Bundle,
    /// One Rancher app per chart and cluster
    App,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Backend for stacks; pipelines always run through step handlers
    #[serde(default)]
    pub stack_backend: StackBackend,

    /// Upper bound on any item's readiness timeout, in seconds (0 = none)
    #[serde(default)]
    pub timeout_cap_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            stack_backend: StackBackend::Bundle,
            timeout_cap_secs: 0,
        }
    }
}

impl ControllerConfig {
    /// Apply the configured cap to an item timeout
    pub fn capped(&self, timeout: Duration) -> Duration {
        match self.timeout_cap_secs {
            0 => timeout,
            cap => timeout.min(Duration::from_secs(cap)),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rancher_poll_interval() -> u64 {
    5
}

impl HerdConfig {
    /// Load configuration from defaults, an optional file and the process
    /// environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        Self::load_from(path, None)
    }

    /// Like [`HerdConfig::load`], reading environment variables from `env`
    /// instead of the process when given
    pub fn load_from(
        path: Option<&str>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&HerdConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("HERD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("fleet.workspaces")
                .with_list_parse_key("values.overlay_candidates")
                .source(env),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = HerdConfig::load_from(None, env(&[])).unwrap();
        assert_eq!(config, HerdConfig::default());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.fleet.poll_interval_secs, 10);
        assert_eq!(config.rancher.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.controller.stack_backend, StackBackend::Bundle);
        assert_eq!(config.values.reserved_prefix, "_");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "controller:\n  stack_backend: app\nfleet:\n  workspaces: [fleet-prod, fleet-stage]\nvalues:\n  reserved_prefix: \"$\"\n"
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = HerdConfig::load_from(Some(&path), env(&[])).unwrap();

        assert_eq!(config.controller.stack_backend, StackBackend::App);
        assert_eq!(config.fleet.workspaces, vec!["fleet-prod", "fleet-stage"]);
        assert_eq!(config.fleet.local_cluster, "local");
        assert_eq!(config.values.reserved_prefix, "$");
        assert_eq!(config.values.overlay_key, "values.yaml");
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let config = HerdConfig::load_from(
            None,
            env(&[
                ("HERD_LOGGING__JSON", "true"),
                ("HERD_FLEET__POLL_INTERVAL_SECS", "3"),
                ("HERD_FLEET__WORKSPACES", "a,b"),
                ("HERD_CONTROLLER__TIMEOUT_CAP_SECS", "60"),
            ]),
        )
        .unwrap();

        assert!(config.logging.json);
        assert_eq!(config.fleet.poll_interval_secs, 3);
        assert_eq!(config.fleet.workspaces, vec!["a", "b"]);
        assert_eq!(
            config.controller.capped(Duration::from_secs(600)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(HerdConfig::load_from(Some("/nonexistent/herd.yaml"), env(&[])).is_err());
    }

    #[test]
    fn test_uncapped_timeout() {
        let config = ControllerConfig::default();
        assert_eq!(config.capped(Duration::from_secs(600)), Duration::from_secs(600));
    }
}
