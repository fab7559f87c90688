//! Quota selection and application

use integreatly_operator::crd::ProductName;
use integreatly_operator::quota::{
    APICAST_PRODUCTION, BACKEND_LISTENER, KEYCLOAK, RATE_LIMIT, WorkloadTarget, get_quota,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::core::ObjectMeta;

use crate::common::*;

fn deployment(name: &str, replicas: Option<i32>) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas,
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn statefulset(name: &str, replicas: Option<i32>) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas,
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[test]
fn test_every_tier_in_default_config_resolves() {
    let cm = create_quota_config_map(TEST_NAMESPACE);
    for (param, name) in [
        ("1", "100K"),
        ("10", "1 Million"),
        ("50", "5 Million"),
        ("100", "10 Million"),
        ("200", "20 Million"),
        ("500", "50 Million"),
        ("1000", "100 Million"),
    ] {
        let quota = get_quota(param, &cm).unwrap();
        assert_eq!(quota.name(), name);
        assert!(!quota.is_updated());
    }
}

#[test]
fn test_larger_tiers_never_shrink_backend() {
    let cm = create_quota_config_map(TEST_NAMESPACE);
    let replicas: Vec<i32> = ["1", "10", "50", "100", "200", "500", "1000"]
        .iter()
        .map(|p| {
            get_quota(p, &cm)
                .unwrap()
                .product(ProductName::ThreeScale)
                .replicas(BACKEND_LISTENER)
        })
        .collect();
    assert!(replicas.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(replicas.last(), Some(&8));
}

#[test]
fn test_rate_limit_follows_tier() {
    let cm = create_quota_config_map(TEST_NAMESPACE);
    let quota = get_quota("50", &cm).unwrap();
    let marin3r = quota.product(ProductName::Marin3r);
    assert_eq!(marin3r.rate_limit_config().unit, "minute");
    assert_eq!(marin3r.rate_limit_config().requests_per_unit, 3472);
    assert_eq!(marin3r.replicas(RATE_LIMIT), 2);
    assert_eq!(marin3r.active_quota(), "5 Million");
}

#[test]
fn test_product_without_workloads_keeps_tier_name() {
    let cm = create_quota_config_map(TEST_NAMESPACE);
    let quota = get_quota("1", &cm).unwrap();
    let cro = quota.product(ProductName::CloudResources);
    assert_eq!(cro.workloads().count(), 0);
    assert_eq!(cro.active_quota(), "100K");
}

#[test]
fn test_unknown_param_is_reported() {
    let cm = create_quota_config_map(TEST_NAMESPACE);
    let err = get_quota("7", &cm).unwrap_err();
    assert!(err.to_string().contains("'7'"));
}

#[test]
fn test_tier_missing_a_workload_gets_zero_config() {
    let data = r#"[{"name":"tiny","param":"t","resources":{"grafana":{"replicas":1}}}]"#;
    let cm = create_quota_config_map_with(TEST_NAMESPACE, data);
    let quota = get_quota("t", &cm).unwrap();
    let three_scale = quota.product(ProductName::ThreeScale);
    assert_eq!(three_scale.replicas(APICAST_PRODUCTION), 0);
    assert!(three_scale.resource_config(APICAST_PRODUCTION).is_some());
}

#[test]
fn test_selected_tier_applies_exactly_to_deployment() {
    let cm = create_quota_config_map(TEST_NAMESPACE);
    let mut quota = get_quota("1", &cm).unwrap();
    quota.set_is_updated(true);
    let config = quota.product(ProductName::ThreeScale);

    let mut d = deployment(BACKEND_LISTENER, Some(6));
    config.configure(WorkloadTarget::Deployment(&mut d)).unwrap();

    let spec = d.spec.unwrap();
    assert_eq!(spec.replicas, Some(1));
    let resources = spec.template.spec.unwrap().containers[0]
        .resources
        .clone()
        .unwrap();
    assert_eq!(
        resources.requests.unwrap()["cpu"],
        Quantity("75m".to_string())
    );
}

#[test]
fn test_existing_tier_only_raises_statefulset() {
    let cm = create_quota_config_map(TEST_NAMESPACE);
    let config = get_quota("100", &cm)
        .unwrap()
        .product(ProductName::RhssoUser);

    let mut low = statefulset(KEYCLOAK, Some(1));
    config.configure(WorkloadTarget::StatefulSet(&mut low)).unwrap();
    assert_eq!(low.spec.unwrap().replicas, Some(3));

    let mut high = statefulset(KEYCLOAK, Some(5));
    config.configure(WorkloadTarget::StatefulSet(&mut high)).unwrap();
    assert_eq!(high.spec.unwrap().replicas, Some(5));
}

#[test]
fn test_product_config_keeps_flag_from_when_it_was_taken() {
    let cm = create_quota_config_map(TEST_NAMESPACE);
    let mut quota = get_quota("1", &cm).unwrap();
    let before = quota.product(ProductName::Grafana);
    quota.set_is_updated(true);
    assert!(!before.is_updated());
    assert!(quota.product(ProductName::Grafana).is_updated());
}
