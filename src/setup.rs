//! One-off work done before the controller starts

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use tracing::{error, info};

use crate::config::{DEFAULT_INSTALLATION_NAME, OperatorConfig};
use crate::controller::bootstrap::NOTIFICATION_EMAIL_PARAM;
use crate::controller::{Error, InstallationClient, Result};
use crate::crd::{AlertingEmailAddresses, RHMI, RHMISpec};
use crate::quota::{CONFIG_MAP_DATA, CONFIG_MAP_NAME, DEFAULT_CONFIG};

/// Namespace label set when the operator is installed through the addon flow
pub const HIVE_MANAGED_LABEL: &str = "rhoam.addon.install/managed";

pub const MTR_POLL_INTERVAL: Duration = Duration::from_secs(120);
pub const MTR_POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything that has to happen before the first reconcile
pub async fn prepare(client: &dyn InstallationClient, config: &OperatorConfig) -> Result<RHMI> {
    if is_hive_managed(client, &config.watch_namespace).await? {
        wait_for_mtr(
            || std::env::var("MTR_RECONCILED").ok().filter(|v| !v.is_empty()),
            config.mtr_reconciled.clone(),
            MTR_POLL_INTERVAL,
            MTR_POLL_TIMEOUT,
        )
        .await?;
    }
    let installation = ensure_installation(client, config).await?;
    seed_quota_config(client, &installation, &config.watch_namespace).await?;
    Ok(installation)
}

pub async fn is_hive_managed(client: &dyn InstallationClient, namespace: &str) -> Result<bool> {
    let labels = client
        .namespace_labels(namespace)
        .await
        .map_err(|e| e.wrap(format!("could not retrieve {namespace} namespace")))?;
    let managed = labels.get(HIVE_MANAGED_LABEL).is_some_and(|v| v == "true");
    if managed {
        info!("operator is hive managed");
    }
    Ok(managed)
}

/// Block until `MTR_RECONCILED` is set, giving up after `timeout`
pub async fn wait_for_mtr(
    lookup: impl Fn() -> Option<String>,
    initial: Option<String>,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    if initial.is_some() {
        return Ok(());
    }

    let poll = async {
        loop {
            info!("Addon flow installation detected - missing MTR_RECONCILED env. Retrying in 2 minutes");
            tokio::time::sleep(interval).await;
            if lookup().is_some() {
                return;
            }
        }
    };

    tokio::time::timeout(timeout, poll).await.map_err(|_| {
        error!("Addon flow installation detected - missing MTR_RECONCILED env after {timeout:?}");
        Error::TransientError(format!("MTR_RECONCILED was not set within {timeout:?}"))
    })
}

/// Return the single installation in the watch namespace, creating it when
/// none exists
pub async fn ensure_installation(
    client: &dyn InstallationClient,
    config: &OperatorConfig,
) -> Result<RHMI> {
    let namespace = &config.watch_namespace;
    info!(namespace = %namespace, "Looking for rhmi CR");

    let mut existing = client
        .list_installations(namespace)
        .await
        .map_err(|e| e.wrap("could not get a list of rhmi CR"))?;

    match existing.len() {
        0 => {}
        1 => return Ok(existing.remove(0)),
        n => {
            return Err(Error::PermanentError(format!(
                "too many rhmi resources found. Expecting 1, found {n} rhmi resources in {namespace} namespace"
            )));
        }
    }

    let customer_email = client
        .get_addon_parameter(namespace, NOTIFICATION_EMAIL_PARAM)
        .await
        .map_err(|e| e.wrap("failed while retrieving addon parameter"))?
        .unwrap_or_default();

    let installation = new_installation(config, customer_email);
    info!(
        type_ = %installation.spec.type_,
        use_cluster_storage = %installation.spec.use_cluster_storage,
        namespace = %namespace,
        "Creating rhmi CR, none found"
    );
    client
        .create_installation(&installation)
        .await
        .map_err(|e| e.wrap(format!("could not create rhmi CR in {namespace} namespace")))
}

/// The installation created on a fresh cluster
pub fn new_installation(config: &OperatorConfig, customer_email: String) -> RHMI {
    let prefix = config.namespace_prefix();
    let mut installation = RHMI::new(
        DEFAULT_INSTALLATION_NAME,
        RHMISpec {
            type_: config.installation_type.clone(),
            namespace_prefix: prefix.clone(),
            rebalance_pods: config.rebalance_pods,
            self_signed_certs: false,
            smtp_secret: format!("{prefix}smtp"),
            dead_mans_snitch_secret: format!("{prefix}deadmanssnitch"),
            pager_duty_secret: format!("{prefix}pagerduty"),
            use_cluster_storage: config.use_cluster_storage.clone(),
            alerting_email_address: customer_email,
            alerting_email_addresses: AlertingEmailAddresses {
                business_unit: config.bu_alerting_email_address.clone().unwrap_or_default(),
                cssre: config.alerting_email_address.clone().unwrap_or_default(),
            },
            priority_class_name: config.priority_class_name.clone(),
            ..Default::default()
        },
    );
    installation.metadata.namespace = Some(config.watch_namespace.clone());
    installation
}

/// Write the built-in tier table, replacing any previous one
pub async fn seed_quota_config(
    client: &dyn InstallationClient,
    installation: &RHMI,
    fallback_namespace: &str,
) -> Result<()> {
    let namespace = installation
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| fallback_namespace.to_string());
    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(CONFIG_MAP_NAME.to_string()),
            namespace: Some(namespace),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CONFIG_MAP_DATA.to_string(),
            DEFAULT_CONFIG.to_string(),
        )])),
        ..Default::default()
    };
    client.apply_config_map(&config_map).await
}
