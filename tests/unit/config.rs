//! Environment configuration and its validation

use std::collections::HashMap;

use integreatly_operator::OperatorConfig;
use integreatly_operator::controller::validation::{
    parse_bool, validate_env, validate_use_cluster_storage,
};
use integreatly_operator::setup::new_installation;

use crate::common::*;

fn config(vars: &[(&str, &str)]) -> OperatorConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    OperatorConfig::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn test_smtp_sender_is_required() {
    let err = validate_env(&config(&[])).unwrap_err();
    assert!(err.to_string().contains("ALERT_SMTP_FROM"));

    validate_env(&config(&[("ALERT_SMTP_FROM", "noreply@example.com")])).unwrap();
}

#[test]
fn test_anti_affinity_must_be_a_bool() {
    let err = validate_env(&config(&[
        ("ALERT_SMTP_FROM", "noreply@example.com"),
        ("ANTI_AFFINITY_REQUIRED", "sometimes"),
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("ANTI_AFFINITY_REQUIRED"));

    validate_env(&config(&[
        ("ALERT_SMTP_FROM", "noreply@example.com"),
        ("ANTI_AFFINITY_REQUIRED", "True"),
    ]))
    .unwrap();
}

#[test]
fn test_parse_bool_spellings() {
    for truthy in ["1", "t", "T", "true", "TRUE", "True"] {
        assert_eq!(parse_bool(truthy), Some(true), "{truthy}");
    }
    for falsy in ["0", "f", "F", "false", "FALSE", "False"] {
        assert_eq!(parse_bool(falsy), Some(false), "{falsy}");
    }
    assert_eq!(parse_bool("yes"), None);
}

#[test]
fn test_use_cluster_storage_is_case_insensitive() {
    let mut rhmi = create_test_installation("rhoam", TEST_NAMESPACE);
    for value in ["true", "TRUE", "false", "False"] {
        rhmi.spec.use_cluster_storage = value.to_string();
        validate_use_cluster_storage(&rhmi).unwrap();
    }
    for value in ["", "yes"] {
        rhmi.spec.use_cluster_storage = value.to_string();
        assert!(validate_use_cluster_storage(&rhmi).is_err());
    }
}

#[test]
fn test_installation_from_sandbox_namespace() {
    let cfg = config(&[
        ("WATCH_NAMESPACE", "sandbox-rhoam-operator"),
        ("INSTALLATION_TYPE", "multitenant-managed-api"),
        ("REBALANCE_PODS", "false"),
        ("PRIORITY_CLASS_NAME", "custom-priority"),
        ("BU_ALERTING_EMAIL_ADDRESS", "bu@example.com"),
    ]);
    let rhmi = new_installation(&cfg, String::new());

    assert_eq!(rhmi.metadata.namespace.as_deref(), Some("sandbox-rhoam-operator"));
    assert_eq!(rhmi.spec.type_, "multitenant-managed-api");
    assert_eq!(rhmi.spec.namespace_prefix, "sandbox-rhoam-");
    assert_eq!(rhmi.spec.smtp_secret, "sandbox-rhoam-smtp");
    assert_eq!(rhmi.spec.priority_class_name, "custom-priority");
    assert_eq!(rhmi.spec.alerting_email_addresses.business_unit, "bu@example.com");
    assert!(rhmi.spec.alerting_email_addresses.cssre.is_empty());
    assert!(!rhmi.spec.rebalance_pods);
    assert!(rhmi.status.is_none());
}
