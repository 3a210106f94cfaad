//! Operator identity resolution
//!
//! Turns an `OperatorConfig` into the final entity name, label prefix and
//! display name of an operator, and checks that the result is usable.

use std::collections::BTreeMap;

use crate::config::{AdditionalPrinterColumns, OperatorConfig};
use crate::entity::InfoType;

/// Label key suffix used to tag resources with their entity kind
pub const OPERATOR_KIND_LABEL: &str = "kind";

/// Resolved identity of an operator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperatorIdentity {
    pub entity_name: String,
    pub prefix: String,
    pub plural_name: String,
    pub short_names: Vec<String>,
    pub info_type: Option<InfoType>,
    pub named: String,
    pub additional_printer_columns: Option<AdditionalPrinterColumns>,
    operator_name: String,
}

impl OperatorIdentity {
    /// Resolve identity from config.
    ///
    /// Entity name: `named`, then `entity_name`, then the type tag's display
    /// name, then empty. Prefix: configured prefix, else the type tag's
    /// package, always with a single trailing `/` when non-empty.
    ///
    /// The fallback prefix comes from the module that declares the entity
    /// type, not the handler: handlers are often wrapped in generic types
    /// (`Arc<H>`) whose path says nothing about the operator. Set `prefix`
    /// explicitly, or use [`resolve_with_default_prefix`](Self::resolve_with_default_prefix),
    /// to scope an operator by another module.
    pub fn resolve(config: &OperatorConfig, info_type: Option<&InfoType>) -> Self {
        let default_prefix = info_type.map(InfoType::package_name).unwrap_or_default();
        Self::resolve_with_default_prefix(config, info_type, &default_prefix)
    }

    /// Same as [`resolve`](Self::resolve) with an explicit fallback prefix
    pub fn resolve_with_default_prefix(
        config: &OperatorConfig,
        info_type: Option<&InfoType>,
        default_prefix: &str,
    ) -> Self {
        let entity_name = if !config.named.is_empty() {
            config.named.clone()
        } else if !config.entity_name.is_empty() {
            config.entity_name.clone()
        } else if let Some(tag) = info_type {
            tag.display_name.clone()
        } else {
            String::new()
        };

        let prefix = if config.prefix.is_empty() {
            normalize_prefix(default_prefix)
        } else {
            normalize_prefix(&config.prefix)
        };

        let operator_name = format!("'{}' operator", entity_name);

        Self {
            entity_name,
            prefix,
            plural_name: config.plural_name.clone(),
            short_names: config.short_names.clone(),
            info_type: info_type.cloned(),
            named: config.named.clone(),
            additional_printer_columns: config.additional_printer_columns.clone(),
            operator_name,
        }
    }

    /// Human readable name, `'<entityName>' operator`
    pub fn operator_name(&self) -> &str {
        &self.operator_name
    }

    /// Base integrity check shared by every resource kind
    pub fn check_integrity(&self) -> bool {
        self.info_type.is_some()
            && !self.entity_name.is_empty()
            && !self.prefix.is_empty()
            && self.prefix.ends_with('/')
            && self.operator_name.ends_with("operator")
    }

    /// Label selector scoping resources to this operator
    pub fn selector(&self) -> Selector {
        Selector::for_kind(&self.entity_name, &self.prefix)
    }

    /// Prefix without the trailing `/`, used as the CRD API group
    pub fn group(&self) -> &str {
        self.prefix.trim_end_matches('/')
    }

    /// CRD plural, defaulting to the lowercased entity name plus `s`
    pub fn plural(&self) -> String {
        if self.plural_name.is_empty() {
            format!("{}s", self.entity_name.to_lowercase())
        } else {
            self.plural_name.clone()
        }
    }
}

/// Ensure a non-empty prefix ends with exactly one `/`
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }
    format!("{}/", prefix.trim_end_matches('/'))
}

/// Label key/value pairs identifying the resources of one operator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector(BTreeMap<String, String>);

impl Selector {
    /// `{<prefix>kind: <entityName>}`
    pub fn for_kind(entity_name: &str, prefix: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(
            format!("{}{}", prefix, OPERATOR_KIND_LABEL),
            entity_name.to_string(),
        );
        Self(labels)
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Render as a Kubernetes label selector, `k1=v1,k2=v2`
    pub fn to_label_selector(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// True when `labels` carries every pair of this selector
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let Some(labels) = labels else {
            return self.0.is_empty();
        };
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("example.com"), "example.com/");
        assert_eq!(normalize_prefix("example.com/"), "example.com/");
        assert_eq!(normalize_prefix("example.com//"), "example.com/");
        assert_eq!(normalize_prefix(""), "");
    }

    #[test]
    fn test_selector_renders_label_selector() {
        let selector = Selector::for_kind("Job", "example.com/");
        assert_eq!(selector.to_label_selector(), "example.com/kind=Job");
    }

    #[test]
    fn test_selector_matches() {
        let selector = Selector::for_kind("Job", "example.com/");
        let mut labels = BTreeMap::new();
        assert!(!selector.matches(None));
        assert!(!selector.matches(Some(&labels)));
        labels.insert("example.com/kind".to_string(), "Job".to_string());
        labels.insert("app".to_string(), "x".to_string());
        assert!(selector.matches(Some(&labels)));
    }

    #[test]
    fn test_plural_defaults_to_lowercase_entity() {
        let identity = OperatorIdentity::resolve(
            &OperatorConfig::new("Job").with_prefix("example.com"),
            Some(&InfoType::from_type_name("a::JobInfo")),
        );
        assert_eq!(identity.plural(), "jobs");
        assert_eq!(identity.group(), "example.com");
    }
}
