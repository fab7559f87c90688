// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for quota merging and quantity handling
//!
//! These tests use proptest to verify that:
//! 1. Merging a tier into an existing workload never lowers it unless the tier was just selected
//! 2. A freshly selected tier is applied exactly
//! 3. Quantity parsing never panics and orders values consistently
//! 4. Status bookkeeping predicates agree with their definitions

use std::cmp::Ordering;
use std::collections::BTreeMap;

use integreatly_operator::controller::reconciler::{
    first_install_first_reconcile, upgrade_first_reconcile,
};
use integreatly_operator::quota::quantity::{compare, parse_quantity};
use integreatly_operator::quota::{merge_replicas, merge_resource_list};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn cpu_quantity() -> impl Strategy<Value = (String, f64)> {
    prop_oneof![
        (1u32..4000).prop_map(|m| (format!("{m}m"), f64::from(m) / 1000.0)),
        (1u32..16).prop_map(|c| (c.to_string(), f64::from(c))),
    ]
}

fn memory_quantity() -> impl Strategy<Value = (String, f64)> {
    prop_oneof![
        (1u32..8192).prop_map(|m| (format!("{m}Mi"), f64::from(m) * 1_048_576.0)),
        (1u32..32).prop_map(|g| (format!("{g}Gi"), f64::from(g) * 1_073_741_824.0)),
        (1u32..4000).prop_map(|m| (format!("{m}M"), f64::from(m) * 1e6)),
    ]
}

fn resource_list() -> impl Strategy<Value = BTreeMap<String, Quantity>> {
    (
        proptest::option::of(cpu_quantity()),
        proptest::option::of(memory_quantity()),
    )
        .prop_map(|(cpu, memory)| {
            let mut list = BTreeMap::new();
            if let Some((cpu, _)) = cpu {
                list.insert("cpu".to_string(), Quantity(cpu));
            }
            if let Some((memory, _)) = memory {
                list.insert("memory".to_string(), Quantity(memory));
            }
            list
        })
}

fn value_of(list: &BTreeMap<String, Quantity>, key: &str) -> Option<f64> {
    list.get(key).map(|q| parse_quantity(&q.0).unwrap())
}

// =============================================================================
// Replica merging
// =============================================================================

proptest! {
    #[test]
    fn replicas_never_drop_without_update(current in 0i64..50, configured in 0i64..50) {
        let merged = merge_replicas(current, configured, false);
        prop_assert!(merged >= configured);
        if current != 0 {
            prop_assert!(merged >= current);
        }
    }

    #[test]
    fn updated_replicas_are_exact(current in 0i64..50, configured in 0i64..50) {
        prop_assert_eq!(merge_replicas(current, configured, true), configured);
    }

    #[test]
    fn replica_merge_is_idempotent(current in 0i64..50, configured in 0i64..50, updated: bool) {
        let once = merge_replicas(current, configured, updated);
        prop_assert_eq!(merge_replicas(once, configured, updated), once);
    }
}

// =============================================================================
// Resource list merging
// =============================================================================

proptest! {
    #[test]
    fn resources_never_drop_without_update(
        current in resource_list(),
        configured in resource_list(),
    ) {
        let mut merged = current.clone();
        merge_resource_list(&mut merged, &configured, false);

        for key in ["cpu", "memory"] {
            match (value_of(&current, key), value_of(&configured, key)) {
                (Some(before), Some(target)) => {
                    let after = value_of(&merged, key).unwrap();
                    prop_assert!(after >= before);
                    prop_assert!(after >= target);
                }
                (Some(before), None) => {
                    prop_assert_eq!(value_of(&merged, key), Some(before));
                }
                (None, Some(target)) => {
                    prop_assert_eq!(value_of(&merged, key), Some(target));
                }
                (None, None) => prop_assert_eq!(value_of(&merged, key), Some(0.0)),
            }
        }
    }

    #[test]
    fn updated_resources_take_configured_values(
        current in resource_list(),
        configured in resource_list(),
    ) {
        let mut merged = current.clone();
        merge_resource_list(&mut merged, &configured, true);
        for (key, value) in &configured {
            prop_assert_eq!(merged.get(key), Some(value));
        }
    }

    #[test]
    fn updated_tier_without_values_zeroes_cpu_and_memory(current in resource_list()) {
        let mut merged = current;
        merge_resource_list(&mut merged, &BTreeMap::new(), true);
        for key in ["cpu", "memory"] {
            prop_assert_eq!(merged.get(key), Some(&Quantity("0".to_string())));
        }
    }

    #[test]
    fn unrelated_resources_are_preserved(
        current in resource_list(),
        configured in resource_list(),
        storage in 1u32..100,
        updated: bool,
    ) {
        let mut merged = current;
        let storage = Quantity(format!("{storage}Gi"));
        merged.insert("ephemeral-storage".to_string(), storage.clone());
        merge_resource_list(&mut merged, &configured, updated);
        prop_assert_eq!(merged.get("ephemeral-storage"), Some(&storage));
    }
}

// =============================================================================
// Quantities
// =============================================================================

proptest! {
    #[test]
    fn parse_never_panics(raw in "\\PC*") {
        let _ = parse_quantity(&raw);
    }

    #[test]
    fn parsed_values_match_units((raw, expected) in prop_oneof![cpu_quantity(), memory_quantity()]) {
        let parsed = parse_quantity(&raw).unwrap();
        prop_assert!((parsed - expected).abs() <= expected * 1e-9);
    }

    #[test]
    fn compare_agrees_with_parsed_values(
        (a, _) in memory_quantity(),
        (b, _) in memory_quantity(),
    ) {
        let expected = parse_quantity(&a)
            .unwrap()
            .partial_cmp(&parse_quantity(&b).unwrap())
            .unwrap_or(Ordering::Equal);
        prop_assert_eq!(compare(&Quantity(a), &Quantity(b)), expected);
    }
}

// =============================================================================
// Version bookkeeping
// =============================================================================

proptest! {
    #[test]
    fn first_install_and_upgrade_are_exclusive(
        version in "(|1\\.[0-9]{1,2}\\.0)",
        to_version in "(|1\\.[0-9]{1,2}\\.0)",
        target in "1\\.[0-9]{1,2}\\.0",
    ) {
        let first = first_install_first_reconcile(&version, &to_version);
        let upgrade = upgrade_first_reconcile(&version, &to_version, &target);
        prop_assert!(!(first && upgrade));
        if upgrade {
            prop_assert!(to_version.is_empty());
            prop_assert_ne!(&version, &target);
        }
    }
}
