//! Installation controller against a live API server

use integreatly_operator::controller::KubeInstallationClient;
use integreatly_operator::crd::{DELETION_FINALIZER, OBSERVABILITY_FINALIZER, StageName, StatusPhase};
use integreatly_operator::quota::{CONFIG_MAP_DATA, CONFIG_MAP_NAME};
use integreatly_operator::setup;
use k8s_openapi::api::core::v1::Namespace;
use kube::Api;

use crate::{OperatorNamespace, connect, preflight_failed_with, stage_phase};

async fn operator_namespace(test: &str) -> OperatorNamespace {
    let client = connect().await.expect("cluster with RHMI CRD");
    OperatorNamespace::create(client, test)
        .await
        .expect("operator namespace")
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_startup_creates_installation_and_quota_config() {
    let ns = operator_namespace("setup").await;
    let client = KubeInstallationClient::new(ns.client());
    let config = ns.operator_config();

    let installation = setup::prepare(&client, &config).await.expect("setup");
    assert_eq!(installation.spec.type_, "managed-api");
    assert_eq!(installation.spec.namespace_prefix, ns.prefix());
    assert_eq!(installation.spec.pager_duty_secret, ns.pager_duty_secret());

    let quota = ns.config_maps().get(CONFIG_MAP_NAME).await.expect("quota config map");
    assert!(
        quota
            .data
            .as_ref()
            .is_some_and(|d| d.contains_key(CONFIG_MAP_DATA))
    );

    // Second run finds the existing installation
    let again = setup::prepare(&client, &config).await.expect("setup");
    assert_eq!(again.metadata.uid, installation.metadata.uid);

    ns.cleanup().await.ok();
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_missing_pager_duty_secret_fails_preflight() {
    let ns = operator_namespace("preflight").await;
    ns.create_installation("true").await.expect("installation");
    let _operator = ns.start_operator();

    let rhmi = ns
        .wait_for(
            "the missing pagerduty secret to be reported",
            preflight_failed_with(&ns.pager_duty_secret()),
        )
        .await
        .unwrap();
    // Only written once a stage pass completes
    assert!(!rhmi.has_finalizer(DELETION_FINALIZER));
    assert_eq!(rhmi.status.unwrap().stage, StageName::PreflightChecks);

    ns.cleanup().await.ok();
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_invalid_cluster_storage_fails_preflight() {
    let ns = operator_namespace("storage").await;
    ns.create_pager_duty_secret().await.expect("secret");
    ns.create_installation("maybe").await.expect("installation");
    let _operator = ns.start_operator();

    ns.wait_for(
        "the useClusterStorage value to be rejected",
        preflight_failed_with("useClusterStorage"),
    )
    .await
    .unwrap();

    ns.cleanup().await.ok();
}

#[tokio::test]
#[ignore = "requires an OpenShift cluster"]
async fn test_bootstrap_stage_completes_with_addon_quota() {
    let ns = operator_namespace("bootstrap").await;
    ns.create_pager_duty_secret().await.expect("secret");
    ns.set_quota_param("1").await.expect("addon parameters");
    ns.seed_quota_config().await.expect("quota config");
    ns.create_installation("true").await.expect("installation");
    let _operator = ns.start_operator();

    let rhmi = ns
        .wait_for(
            "the bootstrap stage to complete",
            stage_phase(StageName::Bootstrap, StatusPhase::Completed),
        )
        .await
        .unwrap();
    assert!(rhmi.has_finalizer(DELETION_FINALIZER));
    assert!(rhmi.has_finalizer(OBSERVABILITY_FINALIZER));
    assert_eq!(rhmi.status.unwrap().to_quota, "100K");

    let namespaces: Api<Namespace> = Api::all(ns.client());
    let observability = format!("{}observability", ns.prefix());
    assert!(namespaces.get_opt(&observability).await.unwrap().is_some());

    ns.cleanup().await.ok();
}
