//! Operator configuration
//!
//! `OperatorConfig` carries the declarative identity of one operator
//! (what it watches and how it is named). `RuntimeConfig` carries the
//! process-wide settings read from the command line or environment.

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// Namespace sentinel meaning "every namespace"
pub const ALL_NAMESPACES: &str = "*";

/// Default interval between full reconciliations
pub const DEFAULT_FULL_RECONCILIATION_INTERVAL_S: u64 = 180;

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Declarative identity of an operator
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Entity name, e.g. `Job`
    #[serde(default)]
    pub entity_name: String,

    /// Label/annotation prefix, e.g. `example.com/`
    #[serde(default)]
    pub prefix: String,

    /// CRD short names
    #[serde(default)]
    pub short_names: Vec<String>,

    /// CRD plural name
    #[serde(default)]
    pub plural_name: String,

    /// Whether the operator should be started at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Overrides `entity_name` when non-empty
    #[serde(default)]
    pub named: String,

    /// Extra printer columns for the CRD (custom resources only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_printer_columns: Option<AdditionalPrinterColumns>,
}

fn default_true() -> bool {
    true
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            entity_name: String::new(),
            prefix: String::new(),
            short_names: Vec::new(),
            plural_name: String::new(),
            enabled: true,
            named: String::new(),
            additional_printer_columns: None,
        }
    }
}

impl OperatorConfig {
    /// Config with the given entity name
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            ..Default::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_named(mut self, named: impl Into<String>) -> Self {
        self.named = named.into();
        self
    }

    pub fn with_plural_name(mut self, plural: impl Into<String>) -> Self {
        self.plural_name = plural.into();
        self
    }

    pub fn with_short_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.short_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_printer_columns(mut self, columns: AdditionalPrinterColumns) -> Self {
        self.additional_printer_columns = Some(columns);
        self
    }
}

/// Parallel arrays describing additional CRD printer columns
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalPrinterColumns {
    /// Column headers
    pub names: Vec<String>,

    /// JSON paths, one per name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,

    /// Column types, one per name; `string` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
}

impl AdditionalPrinterColumns {
    /// The arrays line up: paths present and as long as names, types absent or as long as names
    pub fn is_consistent(&self) -> bool {
        let Some(paths) = &self.paths else {
            return false;
        };
        paths.len() == self.names.len()
            && self
                .types
                .as_ref()
                .map_or(true, |types| types.len() == self.names.len())
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Process-wide settings
#[derive(Clone, Debug, Parser)]
#[command(name = "entity-operator", version, about)]
pub struct RuntimeConfig {
    /// Namespace to watch, `*` for all namespaces (defaults to the client's namespace)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Seconds between full reconciliations, 0 disables them
    #[arg(
        long,
        env = "FULL_RECONCILIATION_INTERVAL_S",
        default_value_t = DEFAULT_FULL_RECONCILIATION_INTERVAL_S
    )]
    pub full_reconciliation_interval_s: u64,

    /// Serve Prometheus metrics
    #[arg(long, env = "METRICS")]
    pub metrics: bool,

    /// Port of the metrics endpoint
    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            full_reconciliation_interval_s: DEFAULT_FULL_RECONCILIATION_INTERVAL_S,
            metrics: false,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: LogFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(
        names: &[&str],
        paths: Option<&[&str]>,
        types: Option<&[&str]>,
    ) -> AdditionalPrinterColumns {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        AdditionalPrinterColumns {
            names: owned(names),
            paths: paths.map(owned),
            types: types.map(owned),
        }
    }

    #[test]
    fn test_printer_columns_consistency() {
        assert!(columns(&["A"], Some(&[".spec.a"]), None).is_consistent());
        assert!(columns(&["A"], Some(&[".spec.a"]), Some(&["integer"])).is_consistent());
        assert!(!columns(&["A"], None, None).is_consistent());
        assert!(!columns(&["A", "B"], Some(&[".spec.a"]), None).is_consistent());
        assert!(!columns(&["A"], Some(&[".spec.a"]), Some(&["string", "string"])).is_consistent());
    }

    #[test]
    fn test_operator_config_deserializes_with_defaults() {
        let config: OperatorConfig =
            serde_json::from_str(r#"{"entityName": "Job", "prefix": "example.com/"}"#).unwrap();
        assert_eq!(config.entity_name, "Job");
        assert!(config.enabled);
        assert!(config.short_names.is_empty());
        assert!(config.additional_printer_columns.is_none());
    }

    #[test]
    fn test_runtime_config_parses_args() {
        let config = RuntimeConfig::parse_from([
            "entity-operator",
            "--namespace",
            "*",
            "--full-reconciliation-interval-s",
            "0",
            "--log-format",
            "text",
        ]);
        assert_eq!(config.namespace.as_deref(), Some(ALL_NAMESPACES));
        assert_eq!(config.full_reconciliation_interval_s, 0);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.metrics_port, DEFAULT_METRICS_PORT);
    }
}
