//! Integration tests for identity resolution and the integrity check

use entity_operator::config::AdditionalPrinterColumns;
use entity_operator::{InfoType, OperatorConfig, OperatorIdentity};

// ============================================================================
// Test Helpers
// ============================================================================

fn job_tag() -> InfoType {
    InfoType::from_type_name("my_operator::jobs::JobInfo")
}

fn resolve(config: OperatorConfig) -> OperatorIdentity {
    OperatorIdentity::resolve(&config, Some(&job_tag()))
}

// ============================================================================
// Resolution Tests
// ============================================================================

#[test]
fn test_named_overrides_entity_name() {
    let identity = resolve(OperatorConfig::new("Job").with_named("BatchJob"));
    assert_eq!(identity.entity_name, "BatchJob");
    assert_eq!(identity.operator_name(), "'BatchJob' operator");
}

#[test]
fn test_entity_name_used_when_not_named() {
    let identity = resolve(OperatorConfig::new("Job"));
    assert_eq!(identity.entity_name, "Job");
    assert_eq!(identity.operator_name(), "'Job' operator");
}

#[test]
fn test_type_tag_used_when_nothing_configured() {
    let identity = resolve(OperatorConfig::default());
    assert_eq!(identity.entity_name, "JobInfo");
    assert_eq!(identity.prefix, "my-operator.jobs/");
}

#[test]
fn test_empty_without_type_tag() {
    let identity = OperatorIdentity::resolve(&OperatorConfig::default(), None);
    assert_eq!(identity.entity_name, "");
    assert_eq!(identity.prefix, "");
    assert_eq!(identity.operator_name(), "'' operator");
}

#[test]
fn test_configured_prefix_wins_and_is_normalized() {
    let identity = resolve(OperatorConfig::new("Job").with_prefix("example.com"));
    assert_eq!(identity.prefix, "example.com/");

    let identity = resolve(OperatorConfig::new("Job").with_prefix("example.com/"));
    assert_eq!(identity.prefix, "example.com/");
}

#[test]
fn test_explicit_default_prefix() {
    let identity = OperatorIdentity::resolve_with_default_prefix(
        &OperatorConfig::new("Job"),
        Some(&job_tag()),
        "fallback.io",
    );
    assert_eq!(identity.prefix, "fallback.io/");
}

#[test]
fn test_selector_scopes_by_kind_label() {
    let identity = resolve(OperatorConfig::new("Job").with_prefix("example.com/"));
    assert_eq!(identity.selector().to_label_selector(), "example.com/kind=Job");
}

#[test]
fn test_plural_and_group() {
    let identity = resolve(OperatorConfig::new("Job").with_prefix("example.com/"));
    assert_eq!(identity.plural(), "jobs");
    assert_eq!(identity.group(), "example.com");

    let identity = resolve(
        OperatorConfig::new("Proxy")
            .with_prefix("example.com/")
            .with_plural_name("proxies"),
    );
    assert_eq!(identity.plural(), "proxies");
}

// ============================================================================
// Integrity Tests
// ============================================================================

#[test]
fn test_minimal_identity_is_valid() {
    let identity = resolve(OperatorConfig::new("Job").with_prefix("example.com/"));
    assert!(identity.check_integrity());
}

#[test]
fn test_missing_type_tag_is_invalid() {
    let identity = OperatorIdentity::resolve(
        &OperatorConfig::new("Job").with_prefix("example.com/"),
        None,
    );
    assert!(!identity.check_integrity());
}

#[test]
fn test_empty_entity_name_is_invalid() {
    let mut identity = resolve(OperatorConfig::new("Job").with_prefix("example.com/"));
    identity.entity_name.clear();
    assert!(!identity.check_integrity());
}

#[test]
fn test_prefix_without_slash_is_invalid() {
    let mut identity = resolve(OperatorConfig::new("Job").with_prefix("example.com/"));
    identity.prefix = "example.com".to_string();
    assert!(!identity.check_integrity());

    identity.prefix.clear();
    assert!(!identity.check_integrity());
}

#[test]
fn test_printer_columns_do_not_affect_base_integrity() {
    let config = OperatorConfig::new("Job")
        .with_prefix("example.com/")
        .with_printer_columns(AdditionalPrinterColumns {
            names: vec!["Image".to_string()],
            paths: None,
            types: None,
        });
    assert!(resolve(config).check_integrity());
}
