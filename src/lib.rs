pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod products;
pub mod quota;
pub mod setup;

pub use config::OperatorConfig;
pub use controller::{BackoffConfig, Context, Error, Result, error_policy, reconcile};
pub use crd::RHMI;
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use futures::StreamExt;
use futures::channel::mpsc;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::Controller;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use controller::client::ADDON_PARAMETERS_SECRET;
use controller::{CustomInformerManager, KubeEventPublisher, KubeInstallationClient};
use products::DefaultProductFactory;

/// Reporting component on published events
pub const CONTROLLER_NAME: &str = "integreatly-operator";

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Run the installation controller in the configured watch namespace.
///
/// Creates the installation and seeds the quota config map first; a failure
/// there is returned before any watch starts.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) -> Result<()> {
    let installation_client = KubeInstallationClient::new(client.clone());
    setup::prepare(&installation_client, &config).await?;

    let namespace = config.watch_namespace.clone();
    run_controller_scoped(client, config, health_state, Some(&namespace)).await;
    Ok(())
}

/// Run the installation controller with optional namespace scoping.
///
/// Besides the installations themselves, changes to the addon parameters
/// secret and to any product resource registered through the informer
/// manager trigger a reconcile.
pub async fn run_controller_scoped(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for RHMI resources (scope: {})",
        scope_msg
    );

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    // Product watches push owner references here
    let (trigger_tx, trigger_rx) = mpsc::unbounded::<ObjectRef<RHMI>>();

    let factory = DefaultProductFactory::new(client.clone(), config.target_version.clone());
    let mut ctx = Context::new(
        Arc::new(KubeInstallationClient::new(client.clone())),
        config,
        Arc::new(factory),
        Arc::new(CustomInformerManager::new(client.clone(), trigger_tx)),
    )
    .with_events(Arc::new(KubeEventPublisher::new(
        client.clone(),
        CONTROLLER_NAME,
    )));
    if let Some(state) = health_state {
        ctx = ctx.with_health(state);
    }

    let installations: Api<RHMI> = scoped_api(client.clone(), namespace);
    let secrets: Api<Secret> = scoped_api(client.clone(), namespace);

    let watcher_config = WatcherConfig::default().any_semantic();
    let secret_config = watcher_config
        .clone()
        .fields(&format!("metadata.name={ADDON_PARAMETERS_SECRET}"));

    let controller = Controller::new(installations, watcher_config);
    let store = controller.store();

    controller
        .watches(secrets, secret_config, move |_secret| {
            store
                .state()
                .into_iter()
                .map(|installation| ObjectRef::from_obj(installation.as_ref()))
                .collect::<Vec<_>>()
        })
        .reconcile_on(trigger_rx)
        .run(reconcile, error_policy, Arc::new(ctx))
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Product watches can still fire for an installation that is gone
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    tracing::error!("Controller stream ended unexpectedly");
}
