//! Reconciliation logic for RHMI installations
//!
//! One pass runs exactly one of preflight checks, uninstall or the install
//! stages, then writes back whatever changed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::bootstrap::{NOTIFICATION_EMAIL_PARAM, bootstrap_stage};
use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::events::{actions, reasons};
use crate::controller::executor::StageExecutor;
use crate::controller::preflight::preflight_checks;
use crate::controller::stages::StageGraph;
use crate::controller::status::{Snapshot, StatusManager};
use crate::controller::uninstall::handle_uninstall;
use crate::crd::{DELETION_FINALIZER, LEGACY_DELETION_FINALIZER, RHMI, StageName};
use crate::quota::Quota;

/// Requeue while any stage is incomplete, and after recoverable failures
pub const RETRY_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue once a multitenant installation is complete
pub const MULTITENANT_COMPLETE_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue once a single tenant installation is complete
pub const COMPLETE_REQUEUE: Duration = Duration::from_secs(300);

/// Namespace of the platform monitoring stack
pub const PLATFORM_MONITORING_NAMESPACE: &str = "openshift-monitoring";

/// Rules earlier releases created in the platform monitoring namespace
pub const LEGACY_ALERT_RULES: [&str; 3] = [
    "rhoam-installation-alerts",
    "rhoam-upgrade-alerts",
    "rhoam-missing-metrics",
];

fn default_backoff() -> BackoffConfig {
    BackoffConfig::default()
}

pub(crate) fn failure_key(installation: &RHMI) -> String {
    format!(
        "{}/{}",
        installation.namespace().unwrap_or_default(),
        installation.name_any()
    )
}

/// Main reconciliation function
#[instrument(skip(installation, ctx), fields(name = %installation.name_any(), namespace = %installation.namespace().unwrap_or_default()))]
pub async fn reconcile(installation: Arc<RHMI>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let ns = installation
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = installation.name_any();

    // The cached object may be stale, read it back
    let Some(current) = ctx.client.get_installation(&ns, &name).await? else {
        debug!("installation no longer exists");
        ctx.reset_failures(&failure_key(&installation));
        return Ok(Action::await_change());
    };

    let result = reconcile_installation(&ctx, current).await;

    if let Some(health) = &ctx.health {
        health
            .metrics
            .record_reconcile(&ns, &name, started.elapsed().as_secs_f64());
    }
    match &result {
        Ok(action) => {
            ctx.reset_failures(&failure_key(&installation));
            debug!(?action, "reconciliation completed");
        }
        Err(e) => error!("Reconciliation failed: {}", e),
    }
    result
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(installation: Arc<RHMI>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = installation.name_any();
    let attempt = ctx.record_failure(&failure_key(&installation));
    let delay = default_backoff().delay_for_error(error, attempt);

    if let Some(health) = &ctx.health {
        health
            .metrics
            .record_error(&installation.namespace().unwrap_or_default(), &name);
    }

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} (attempt {})",
            name, error, delay, attempt
        );
    }

    Action::requeue(delay)
}

async fn reconcile_installation(ctx: &Context, mut installation: RHMI) -> Result<Action> {
    if let Err(e) = remove_legacy_alert_rules(ctx).await {
        error!(error = %e, "error removing installation alerts from {}", PLATFORM_MONITORING_NAMESPACE);
    }
    copy_alerting_addresses(ctx, &mut installation).await;

    let graph = StageGraph::for_type(&installation.spec.type_)?;
    let status_manager = StatusManager::new(ctx.client.as_ref());
    let mut before = Snapshot::of(&installation);

    if !installation.has_finalizer(DELETION_FINALIZER) && !installation.is_deleting() {
        if installation.has_finalizer(LEGACY_DELETION_FINALIZER) {
            info!("migrating legacy deletion finalizer");
            for f in installation.finalizers_mut() {
                if f == LEGACY_DELETION_FINALIZER {
                    *f = DELETION_FINALIZER.to_string();
                }
            }
            if let Err(e) = status_manager.update_object(&mut installation).await {
                warn!(error = %e, "failed to migrate deletion finalizer");
                return Ok(Action::requeue(RETRY_REQUEUE));
            }
            before = Snapshot::of(&installation);
        } else {
            installation.add_finalizer(DELETION_FINALIZER);
        }
    }

    if installation.status_or_default().preflight_status.needs_check() {
        return preflight_checks(ctx, &mut installation, &graph).await;
    }

    if installation.is_deleting() {
        return handle_uninstall(ctx, &mut installation, &graph).await;
    }

    let target = ctx.config.target_version.clone();
    let status = installation.status_or_default();
    if upgrade_first_reconcile(&status.version, &status.to_version, &target)
        || first_install_first_reconcile(&status.version, &status.to_version)
    {
        info!(version = %target, "setting toVersion");
        installation.status_mut().to_version = target.clone();
        if let Err(e) = status_manager.update_status(&mut installation).await {
            warn!(error = %e, "failed to record toVersion");
            return Ok(Action::requeue(RETRY_REQUEUE));
        }
        if let Some(health) = &ctx.health {
            health.metrics.set_version(&status.version, &target);
        }
    }

    if let Some(health) = &ctx.health
        && status.stage == StageName::Complete
    {
        health.metrics.set_version(&status.version, &status.to_version);
        health.metrics.set_quota(&status.quota, &status.to_quota);
    }

    let executor = StageExecutor::new(ctx.factory.as_ref(), ctx.informers.as_ref());
    let mut quota = Quota::default();
    let mut in_progress = false;
    let mut version_mismatch = false;

    for stage in graph.install_stages() {
        let outcome = if stage.name.is_bootstrap() {
            let (outcome, resolved) = bootstrap_stage(ctx, &mut installation).await;
            quota = resolved;
            outcome
        } else {
            executor.process_stage(&mut installation, stage, &quota).await
        };

        version_mismatch |= outcome.version_mismatch;
        installation.status_mut().last_error = outcome
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        if !outcome.is_completed() {
            info!(stage = %stage.name, phase = %outcome.phase, "stage not complete");
            in_progress = true;
            break;
        }
    }

    let status = installation.status_mut();
    if status.to_version == target && !in_progress && !version_mismatch {
        status.version = target.clone();
        status.to_version.clear();
        status.quota = quota.name().to_string();
        status.to_quota.clear();
        info!(version = %target, "installation completed successfully");
        if let Some(health) = &ctx.health {
            health.metrics.set_version(&target, "");
        }
        ctx.publish_event(
            &installation,
            EventType::Normal,
            reasons::INSTALLATION_COMPLETED,
            actions::INSTALL,
            Some(format!("installation of version {target} completed")),
        )
        .await;
    }

    let mut requeue = RETRY_REQUEUE;
    if !in_progress {
        let status = installation.status_mut();
        status.stage = StageName::Complete;
        requeue = if graph.installation_type.is_multitenant() {
            MULTITENANT_COMPLETE_REQUEUE
        } else {
            COMPLETE_REQUEUE
        };

        if installation.spec.rebalance_pods {
            debug!(prefix = %installation.spec.namespace_prefix, "pod rebalancing requested");
            if let Some(health) = &ctx.health {
                health.metrics.record_rebalance_request();
            }
        }

        if quota.is_updated() {
            let status = installation.status_mut();
            status.quota = quota.name().to_string();
            status.to_quota.clear();
            if let Some(health) = &ctx.health {
                health.metrics.set_quota(&status.quota, &status.to_quota);
            }
        }
    }

    if let Some(health) = &ctx.health {
        health
            .metrics
            .set_stage(installation.status_or_default().stage.as_str());
    }

    status_manager.persist(&before, &mut installation).await?;
    Ok(Action::requeue(requeue))
}

/// Neither a current nor a target version has been recorded
pub fn first_install_first_reconcile(version: &str, to_version: &str) -> bool {
    version.is_empty() && to_version.is_empty()
}

/// An installed version differs from the target and no upgrade is recorded yet
pub fn upgrade_first_reconcile(version: &str, to_version: &str, target: &str) -> bool {
    !version.is_empty() && to_version.is_empty() && version != target
}

async fn remove_legacy_alert_rules(ctx: &Context) -> Result<()> {
    let names: Vec<String> = LEGACY_ALERT_RULES.iter().map(|n| n.to_string()).collect();
    ctx.client
        .delete_legacy_alert_rules(PLATFORM_MONITORING_NAMESPACE, &names)
        .await
}

/// Copy alerting addresses from the environment and the addon parameters into
/// the installation spec. Failures are logged and never fail the reconcile.
async fn copy_alerting_addresses(ctx: &Context, installation: &mut RHMI) {
    let mut changed = false;
    let addresses = &mut installation.spec.alerting_email_addresses;

    if let Some(cssre) = &ctx.config.alerting_email_address
        && addresses.cssre.is_empty()
    {
        info!("Adding CS-SRE alerting email address to RHMI CR");
        addresses.cssre = cssre.clone();
        changed = true;
    }
    if let Some(bu) = &ctx.config.bu_alerting_email_address
        && addresses.business_unit.is_empty()
    {
        info!("Adding BU alerting email address to RHMI CR");
        addresses.business_unit = bu.clone();
        changed = true;
    }

    let namespace = installation
        .namespace()
        .unwrap_or_else(|| ctx.config.watch_namespace.clone());
    match ctx
        .client
        .get_addon_parameter(&namespace, NOTIFICATION_EMAIL_PARAM)
        .await
    {
        Ok(Some(email)) if email != installation.spec.alerting_email_address => {
            info!("Updating customer email address from parameter");
            installation.spec.alerting_email_address = email;
            changed = true;
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "failed while retrieving addon parameter"),
    }

    if changed
        && let Err(e) = StatusManager::new(ctx.client.as_ref())
            .update_object(installation)
            .await
    {
        error!(error = %e, "Error while copying alerting email addresses to RHMI CR");
    }
}
