mod analyzer;
mod bus;
mod fanout;
mod ingest;
mod logstore;
mod metadata;
mod server;

pub use analyzer::*;
pub use bus::*;
pub use fanout::*;
pub use ingest::*;
pub use logstore::*;
pub use metadata::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub logstore: LogStoreConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.metadata.db_path.as_os_str().is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "metadata.db_path".into(),
                message: "db_path must not be empty".into(),
            });
        }

        if self.logstore.kind == LogStoreKind::Loki && self.logstore.base_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "logstore.base_url".into(),
                message: "base_url is required when logstore.kind = \"loki\"".into(),
            });
        }

        if self.logstore.kind == LogStoreKind::Memory {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "logstore.kind".into(),
                message: "in-memory log store configured; lines do not survive restarts".into(),
            });
        }

        if self.ingest.batch_size == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "ingest.batch_size".into(),
                message: "batch_size must be greater than 0".into(),
            });
        }

        if self.ingest.batch_interval_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "ingest.batch_interval_ms".into(),
                message: "batch_interval_ms must be greater than 0".into(),
            });
        }

        if self.fanout.subscriber_buffer == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "fanout.subscriber_buffer".into(),
                message: "subscriber_buffer must be greater than 0".into(),
            });
        }

        if !(1..=10).contains(&self.analyzer.workers) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "analyzer.workers".into(),
                message: format!(
                    "workers = {} outside 1-10, will be clamped",
                    self.analyzer.workers
                ),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let cfg = Config::default();
        let issues = cfg.validate();
        assert!(
            !issues
                .iter()
                .any(|i| i.severity == ConfigSeverity::Error),
            "unexpected errors: {issues:?}"
        );
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.field == "server.port" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn loki_without_base_url_is_an_error() {
        let mut cfg = Config::default();
        cfg.logstore.kind = LogStoreKind::Loki;
        cfg.logstore.base_url = String::new();
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.field == "logstore.base_url"));
    }

    #[test]
    fn out_of_range_workers_warns() {
        let mut cfg = Config::default();
        cfg.analyzer.workers = 50;
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.field == "analyzer.workers" && i.severity == ConfigSeverity::Warning));
    }
}
