//! Bootstrap stage
//!
//! Resolves the capacity tier for this reconcile and runs the bootstrap
//! reconciler. The resolved `Quota` is handed to every later stage.

use std::time::Duration;

use kube::ResourceExt;
use kube::runtime::events::EventType;
use tracing::{info, instrument, warn};

use crate::config::OperatorConfig;
use crate::controller::client::InstallationClient;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::events::{actions, reasons};
use crate::controller::executor::StageOutcome;
use crate::crd::{RHMI, StageName, StageStatus, StatusPhase};
use crate::quota::{CONFIG_MAP_NAME, Quota, get_quota};

/// Addon parameter selecting the capacity tier
pub const QUOTA_PARAM: &str = "addon-managed-api-service";

/// Addon parameter used by trial installs
pub const TRIAL_QUOTA_PARAM: &str = "trial-quota";

/// Addon parameter holding the customer notification address
pub const NOTIFICATION_EMAIL_PARAM: &str = "notification-email";

pub const QUOTA_ENV_VAR: &str = "QUOTA";

/// How long a new installation waits for its addon parameters
pub const QUOTA_GRACE_PERIOD: Duration = Duration::from_secs(60);

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Find the quota parameter: the addon parameter, then once the grace period
/// is over the trial parameter, then `QUOTA` from the environment
pub async fn quota_param(
    client: &dyn InstallationClient,
    config: &OperatorConfig,
    installation: &RHMI,
    namespace: &str,
) -> Result<String> {
    let param = client
        .get_addon_parameter(namespace, QUOTA_PARAM)
        .await
        .map_err(|e| e.wrap("error checking for quota secret"))?;
    if let Some(param) = present(param) {
        return Ok(param);
    }

    if !installation.is_older_than(QUOTA_GRACE_PERIOD) {
        return Err(Error::QuotaError(
            "waiting for quota parameter for 1 minute after creation of cr".to_string(),
        ));
    }

    let trial = client
        .get_addon_parameter(namespace, TRIAL_QUOTA_PARAM)
        .await
        .map_err(|e| e.wrap("error checking for quota secret"))?;
    if let Some(param) = present(trial) {
        return Ok(param);
    }

    info!(
        "no quota parameter found after one minute, falling back to env var {}",
        QUOTA_ENV_VAR
    );
    config.quota.clone().ok_or_else(|| {
        Error::QuotaError(format!(
            "no quota value provided by add on parameter '{QUOTA_PARAM}' or by env var '{QUOTA_ENV_VAR}'"
        ))
    })
}

/// Resolve the tier for this reconcile.
///
/// A tier that differs from `status.quota`, or the first tier ever selected,
/// is recorded as `status.toQuota` and marked as updated so it is applied
/// exactly instead of only raising values.
pub async fn process_quota(
    client: &dyn InstallationClient,
    config: &OperatorConfig,
    installation: &mut RHMI,
) -> Result<Quota> {
    let namespace = installation
        .namespace()
        .unwrap_or_else(|| config.watch_namespace.clone());

    let param = quota_param(client, config, installation, &namespace).await?;

    let config_map = client
        .get_config_map(&namespace, CONFIG_MAP_NAME)
        .await
        .map_err(|e| e.wrap("error getting quota config map"))?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "quota config map {CONFIG_MAP_NAME} in {namespace}"
            ))
        })?;

    let mut quota = get_quota(&param, &config_map)?;

    let status = installation.status_mut();
    let updated = (status.to_quota.is_empty() && status.quota.is_empty())
        || quota.name() != status.quota;
    if updated {
        info!(from = %status.quota, to = %quota.name(), "quota change detected");
        status.to_quota = quota.name().to_string();
    }
    quota.set_is_updated(updated);
    Ok(quota)
}

/// Run the bootstrap stage. The returned quota is empty when the stage failed.
#[instrument(skip_all, fields(stage = %StageName::Bootstrap))]
pub async fn bootstrap_stage(ctx: &Context, installation: &mut RHMI) -> (StageOutcome, Quota) {
    installation.status_mut().stage = StageName::Bootstrap;

    let quota = match process_quota(ctx.client.as_ref(), &ctx.config, installation).await {
        Ok(quota) => quota,
        Err(e) => {
            warn!(error = %e, "error while processing the quota");
            ctx.publish_event(
                installation,
                EventType::Warning,
                reasons::PROCESSING_ERROR,
                actions::INSTALL,
                Some(format!("Error while processing the Quota: {e}")),
            )
            .await;
            return (
                record(installation, e.wrap("bootstrap stage reconcile failed")),
                Quota::default(),
            );
        }
    };

    if let Some(health) = &ctx.health {
        let status = installation.status_or_default();
        health.metrics.set_quota(&status.quota, &status.to_quota);
    }

    let reconciler = match ctx.factory.bootstrap(installation) {
        Ok(r) => r,
        Err(e) => {
            let err = e.wrap("failed to build a reconciler for Bootstrap");
            return (record(installation, err), Quota::default());
        }
    };

    let outcome = match reconciler.reconcile(installation).await {
        Ok(StatusPhase::Failed) => record(
            installation,
            Error::TransientError("bootstrap reconciler reported a failed phase".to_string())
                .wrap("bootstrap stage reconcile failed"),
        ),
        Ok(phase) => {
            set_stage_phase(installation, phase);
            StageOutcome {
                phase,
                error: None,
                version_mismatch: false,
            }
        }
        Err(e) => record(installation, e.wrap("bootstrap stage reconcile failed")),
    };
    (outcome, quota)
}

fn set_stage_phase(installation: &mut RHMI, phase: StatusPhase) {
    installation.status_mut().stages.insert(
        StageName::Bootstrap,
        StageStatus {
            name: StageName::Bootstrap,
            phase,
            products: Default::default(),
        },
    );
}

fn record(installation: &mut RHMI, error: Error) -> StageOutcome {
    set_stage_phase(installation, StatusPhase::Failed);
    StageOutcome::failed(error)
}
