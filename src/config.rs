//! Server and store configuration.
//!
//! Loaded with priority: CLI args > `PARTITIONDB__*` environment > config file > defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::core::DatabaseError;

pub const DEFAULT_MAX_PARTITION_SIZE: usize = 1000;
pub const DEFAULT_WRITE_RETRY_BUDGET: u32 = 5;

const CONFIG_PATHS: [&str; 2] = ["/etc/partitiondb/partitiondb.toml", "./partitiondb.toml"];

/// What a delete does to a full partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReopenPolicy {
    /// Clear `is_full`; inserts backfill the lowest-index open partition
    #[default]
    Reopen,
    /// Partitions never reopen; inserts always target the newest partition
    AppendOnly,
}

/// Partition store tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_partition_size")]
    pub max_partition_size: usize,
    #[serde(default = "default_write_retry_budget")]
    pub write_retry_budget: u32,
    #[serde(default)]
    pub reopen_policy: ReopenPolicy,
    /// Reject writes with schema violations instead of warning
    #[serde(default)]
    pub strict_schema: bool,
    #[serde(default = "default_max_correlated_evaluations")]
    pub max_correlated_evaluations: usize,
}

fn default_max_partition_size() -> usize { DEFAULT_MAX_PARTITION_SIZE }
fn default_write_retry_budget() -> u32 { DEFAULT_WRITE_RETRY_BUDGET }
fn default_max_correlated_evaluations() -> usize { 10_000 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_partition_size: default_max_partition_size(),
            write_retry_budget: default_write_retry_budget(),
            reopen_policy: ReopenPolicy::default(),
            strict_schema: false,
            max_correlated_evaluations: default_max_correlated_evaluations(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn with_max_partition_size(mut self, size: usize) -> Self {
        self.max_partition_size = size.max(1);
        self
    }

    #[must_use]
    pub const fn with_reopen_policy(mut self, policy: ReopenPolicy) -> Self {
        self.reopen_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_strict_schema(mut self, strict: bool) -> Self {
        self.strict_schema = strict;
        self
    }

    /// Reject values no store can run with
    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.max_partition_size == 0 {
            return Err(DatabaseError::Configuration(
                "store.max_partition_size must be at least 1".to_string(),
            ));
        }
        if self.write_retry_budget == 0 {
            return Err(DatabaseError::Configuration(
                "store.write_retry_budget must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Partition files live here; in-memory store when absent
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_plan_limit_mb")]
    pub default_plan_limit_mb: f64,
    /// Per-tenant plan limit overrides in MB
    #[serde(default)]
    pub plan_limits: HashMap<String, f64>,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 7878 }
fn default_plan_limit_mb() -> f64 { 100.0 }
fn default_query_timeout_ms() -> u64 { 30_000 }
fn default_log_level() -> String { "info".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
            default_plan_limit_mb: default_plan_limit_mb(),
            plan_limits: HashMap::new(),
            query_timeout_ms: default_query_timeout_ms(),
            log_level: default_log_level(),
            store: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from an explicit file (or the well-known paths) plus environment
    pub fn load(explicit: Option<&Path>) -> Result<Self, DatabaseError> {
        let mut builder = Config::builder();

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path));
        } else if let Some(path) = CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("PARTITIONDB")
                .prefix_separator("__")
                .separator("__"),
        );

        let config = builder
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| DatabaseError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        self.store.validate()?;
        let limits = std::iter::once(("default_plan_limit_mb", self.default_plan_limit_mb))
            .chain(self.plan_limits.iter().map(|(tenant, mb)| (tenant.as_str(), *mb)));
        for (name, mb) in limits {
            if !mb.is_finite() || mb < 0.0 {
                return Err(DatabaseError::Configuration(format!(
                    "plan limit for {name} must be a non-negative number of MB, got {mb}"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_store_defaults() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.max_partition_size, 1000);
        assert_eq!(cfg.write_retry_budget, 5);
        assert_eq!(cfg.reopen_policy, ReopenPolicy::Reopen);
        assert!(!cfg.strict_schema);
    }

    #[test]
    fn test_builder_clamps_partition_size() {
        assert_eq!(StoreConfig::default().with_max_partition_size(0).max_partition_size, 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
port = 9000
default_plan_limit_mb = 5.5

[plan_limits]
acme = 250.0

[store]
max_partition_size = 50
reopen_policy = "append_only"
"#
        )
        .unwrap();

        let cfg = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "127.0.0.1");
        assert!((cfg.default_plan_limit_mb - 5.5).abs() < f64::EPSILON);
        assert_eq!(cfg.plan_limits.get("acme"), Some(&250.0));
        assert_eq!(cfg.store.max_partition_size, 50);
        assert_eq!(cfg.store.reopen_policy, ReopenPolicy::AppendOnly);
        assert_eq!(cfg.store.write_retry_budget, 5);
    }

    #[test]
    fn test_load_rejects_unusable_store_values() {
        for body in ["[store]\nwrite_retry_budget = 0\n", "[store]\nmax_partition_size = 0\n"] {
            let mut file = NamedTempFile::with_suffix(".toml").unwrap();
            write!(file, "{body}").unwrap();
            let err = ServerConfig::load(Some(file.path())).unwrap_err();
            assert_eq!(err.kind(), "Configuration", "{body}");
        }
    }

    #[test]
    fn test_negative_plan_limit_is_rejected() {
        let mut cfg = ServerConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.plan_limits.insert("acme".to_string(), -1.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(ServerConfig::load(Some(&missing)).is_err());
    }
}
