//! Preflight checks
//!
//! Run before any stage while `status.preflightStatus` is empty or failed.
//! Checks run in order and the first failure stops the pass.

use std::time::Duration;

use kube::ResourceExt;
use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tracing::{debug, info, instrument, warn};

use crate::controller::bootstrap::{QUOTA_GRACE_PERIOD, QUOTA_PARAM, TRIAL_QUOTA_PARAM};
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::events::{actions, reasons};
use crate::controller::stages::StageGraph;
use crate::controller::validation::{
    USE_CLUSTER_STORAGE_MESSAGE, validate_env, validate_use_cluster_storage,
};
use crate::crd::{PreflightStatus, RHMI, StageName};

/// Requeue interval for every preflight outcome
pub const PREFLIGHT_REQUEUE: Duration = Duration::from_secs(10);

pub const PREFLIGHT_PASSED_MESSAGE: &str = "preflight checks passed";

/// Installations annotated with this set to "true" skip the ClusterPackage check
pub const IN_PROW_ANNOTATION: &str = "in_prow";

const IGNORED_NAMESPACE_PREFIXES: [&str; 2] = ["openshift-", "kube-"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreflightResult {
    Passed,
    Failed(String),
}

/// Run the preflight checks and record the result in the installation status.
///
/// Failures are recorded and surfaced as events; API errors are returned.
#[instrument(skip_all, fields(name = %installation.name_any()))]
pub async fn preflight_checks(
    ctx: &Context,
    installation: &mut RHMI,
    graph: &StageGraph,
) -> Result<Action> {
    info!("Running preflight checks");
    installation.status_mut().stage = StageName::PreflightChecks;

    match run_checks(ctx, installation, graph).await? {
        PreflightResult::Failed(message) => {
            warn!(%message, "preflight checks failed");
            ctx.publish_event(
                installation,
                EventType::Warning,
                reasons::PROCESSING_ERROR,
                actions::PREFLIGHT,
                Some(message.clone()),
            )
            .await;
            let status = installation.status_mut();
            status.preflight_status = PreflightStatus::Fail;
            status.preflight_message = message;
            if let Some(health) = &ctx.health {
                health.metrics.set_preflight_passed(false);
            }
            ctx.client.update_status(installation).await?;
        }
        PreflightResult::Passed => {
            info!("preflight checks passed");
            let status = installation.status_mut();
            status.preflight_status = PreflightStatus::Success;
            status.preflight_message = PREFLIGHT_PASSED_MESSAGE.to_string();
            if let Some(health) = &ctx.health {
                health.metrics.set_preflight_passed(true);
            }
            ctx.publish_event(
                installation,
                EventType::Normal,
                reasons::PREFLIGHT_CHECK_PASSED,
                actions::PREFLIGHT,
                Some(PREFLIGHT_PASSED_MESSAGE.to_string()),
            )
            .await;
            if let Err(e) = ctx.client.update_status(installation).await {
                warn!(error = %e, "error updating status after preflight checks");
            }
        }
    }

    Ok(Action::requeue(PREFLIGHT_REQUEUE))
}

async fn run_checks(
    ctx: &Context,
    installation: &RHMI,
    graph: &StageGraph,
) -> Result<PreflightResult> {
    validate_env(&ctx.config)?;

    if let Err(e) = validate_use_cluster_storage(installation) {
        debug!(error = %e, "useClusterStorage check failed");
        return Ok(PreflightResult::Failed(USE_CLUSTER_STORAGE_MESSAGE.to_string()));
    }

    let namespace = installation
        .namespace()
        .unwrap_or_else(|| ctx.config.watch_namespace.clone());

    for secret in [installation.spec.pager_duty_secret.as_str()] {
        let exists = !secret.is_empty() && ctx.client.secret_exists(&namespace, secret).await?;
        if !exists {
            return Ok(PreflightResult::Failed(format!(
                "Could not find {secret} secret in {namespace} namespace"
            )));
        }
        info!(secret, "found required secret");
        ctx.publish_event(
            installation,
            EventType::Normal,
            reasons::PREFLIGHT_CHECK_PASSED,
            actions::PREFLIGHT,
            Some(format!("found required secret: {secret}")),
        )
        .await;
    }

    if let Some(message) = check_quota_param(ctx, installation, &namespace).await? {
        return Ok(PreflightResult::Failed(message));
    }

    if let Some(message) = check_conflicting_products(ctx, installation, graph).await? {
        return Ok(PreflightResult::Failed(message));
    }

    if ctx.client.is_sts_cluster().await? {
        info!("STS mode enabled for cluster");
    }

    if !is_in_prow(installation) && !cluster_package_available(ctx).await {
        return Ok(PreflightResult::Failed(
            "error validating cluster package availability".to_string(),
        ));
    }

    Ok(PreflightResult::Passed)
}

async fn cluster_package_available(ctx: &Context) -> bool {
    let name = &ctx.config.cluster_package;
    match ctx.client.get_cluster_package(name).await {
        Ok(Some(package)) if is_package_ready(&package) => true,
        Ok(Some(_)) => {
            info!(package = %name, "package is not ready (Available=True, Progressing=False required)");
            false
        }
        Ok(None) => {
            info!(package = %name, "ClusterPackage not found");
            false
        }
        Err(e) => {
            info!(package = %name, error = %e, "failed to get ClusterPackage");
            false
        }
    }
}

/// `None` when a quota parameter is available or will fall back to `QUOTA`
async fn check_quota_param(
    ctx: &Context,
    installation: &RHMI,
    namespace: &str,
) -> Result<Option<String>> {
    for param in [QUOTA_PARAM, TRIAL_QUOTA_PARAM] {
        let found = ctx
            .client
            .get_addon_parameter(namespace, param)
            .await
            .map_err(|e| e.wrap(format!("failed to retrieve addon parameter {param}")))?;
        if found.is_some() {
            return Ok(None);
        }
    }

    if !installation.is_older_than(QUOTA_GRACE_PERIOD) {
        return Ok(Some(
            "quota parameter not found, waiting 1 minute before defaulting to env var".to_string(),
        ));
    }
    if ctx.config.quota.is_none() {
        return Ok(Some(
            "quota parameter not found from add-on or env var".to_string(),
        ));
    }
    Ok(None)
}

/// Look for objects of products about to be installed in every user namespace
async fn check_conflicting_products(
    ctx: &Context,
    installation: &RHMI,
    graph: &StageGraph,
) -> Result<Option<String>> {
    let reconcilers = graph
        .install_products()
        .map(|product| -> Result<_> {
            Ok((product, ctx.factory.reconciler(product, installation)?))
        })
        .collect::<Result<Vec<_>>>()?;

    for namespace in ctx.client.list_namespaces().await? {
        if IGNORED_NAMESPACE_PREFIXES
            .iter()
            .any(|prefix| namespace.starts_with(prefix))
        {
            continue;
        }

        let mut found = Vec::new();
        for (product, reconciler) in &reconcilers {
            let Some(object) = reconciler.preflight_object(&namespace) else {
                continue;
            };
            if ctx.client.object_exists(&object).await? {
                info!(%product, %namespace, "found conflicting product");
                found.push(product.as_str());
            }
        }

        if !found.is_empty() {
            return Ok(Some(format!(
                "found conflicting packages: {}, in namespace: {namespace}",
                found.join(", ")
            )));
        }
    }
    Ok(None)
}

pub fn is_in_prow(installation: &RHMI) -> bool {
    installation
        .annotations()
        .get(IN_PROW_ANNOTATION)
        .is_some_and(|v| v == "true")
}

/// `Available=True` and `Progressing=False`, both observed at the current generation
pub fn is_package_ready(package: &DynamicObject) -> bool {
    let generation = package.metadata.generation.unwrap_or_default();
    let conditions = package
        .data
        .pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    let has = |type_: &str, status: &str| {
        conditions.iter().any(|c| {
            c.get("type").and_then(|v| v.as_str()) == Some(type_)
                && c.get("status").and_then(|v| v.as_str()) == Some(status)
                && c.get("observedGeneration")
                    .and_then(|v| v.as_i64())
                    .unwrap_or_default()
                    == generation
        })
    };

    has("Available", "True") && has("Progressing", "False")
}
