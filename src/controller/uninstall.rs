//! Uninstall orchestration
//!
//! Teardown is driven by the finalizers on the installation. Every product
//! holds its own finalizer until its reconciler has removed it, and the
//! bootstrap stage holds the observability finalizer. Uninstall stages run in
//! order and a stage with a product still pending blocks the ones after it.
//! Once only the deletion finalizer is left the operator removes its own
//! config maps and subscription.

use std::time::Duration;

use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tracing::{debug, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, MultiError, Result};
use crate::controller::events::{actions, reasons};
use crate::controller::reconciler::failure_key;
use crate::controller::stages::{Stage, StageGraph};
use crate::controller::status::StatusManager;
use crate::crd::{
    DELETION_FINALIZER, OBSERVABILITY_FINALIZER, ProductStatus, RHMI, StageName, StageStatus,
    StatusPhase,
};
use crate::quota::Quota;

/// Config map shared with the cloud resource operator
pub const CLOUD_RESOURCE_CONFIG_MAP: &str = "cloud-resource-config";

const UNINSTALL_REQUEUE: Duration = Duration::from_secs(10);

/// Where an uninstall stands, derived from the finalizers on the installation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UninstallState {
    /// The stage at `index` still has finalizers to clear
    PendingStage { index: usize, name: StageName },
    /// Only the deletion finalizer is left
    FinalCleanup,
    /// Nothing left for the operator to remove
    Done,
}

impl UninstallState {
    /// First uninstall stage at or after `from` that still holds a finalizer
    pub fn derive(finalizers: &[String], graph: &StageGraph, from: usize) -> Self {
        let pending = graph
            .uninstall_stages()
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, stage)| holds_stage_finalizer(stage, finalizers));

        match pending {
            Some((index, stage)) => UninstallState::PendingStage {
                index,
                name: stage.name,
            },
            None if finalizers == [DELETION_FINALIZER] => UninstallState::FinalCleanup,
            None => UninstallState::Done,
        }
    }
}

/// Whether any finalizer in `finalizers` belongs to `stage`
fn holds_stage_finalizer(stage: &Stage, finalizers: &[String]) -> bool {
    if stage.name.is_bootstrap() {
        return finalizers.iter().any(|f| f == OBSERVABILITY_FINALIZER);
    }
    stage
        .products
        .iter()
        .any(|p| finalizers.contains(&p.finalizer()))
}

/// Tear down an installation that is being deleted
#[instrument(skip_all, fields(name = %installation.name_any()))]
pub async fn handle_uninstall(
    ctx: &Context,
    installation: &mut RHMI,
    graph: &StageGraph,
) -> Result<Action> {
    let deleted = ctx.client.delete_labelled_alert_rules().await?;
    if deleted > 0 {
        debug!(deleted, "deleted alert rules");
    }

    if installation.status_or_default().stage != StageName::Deletion {
        ctx.publish_event(
            installation,
            EventType::Normal,
            reasons::UNINSTALL_STARTED,
            actions::UNINSTALL,
            Some("Uninstalling products".to_string()),
        )
        .await;
    }
    let status = installation.status_mut();
    status.stage = StageName::Deletion;
    status.last_error.clear();
    if let Some(health) = &ctx.health {
        health.metrics.set_stage(StageName::Deletion.as_str());
    }

    let status_manager = StatusManager::new(ctx.client.as_ref());
    let mut errors = MultiError::new();
    let mut from = 0;

    loop {
        let finalizers = installation.finalizers().to_vec();
        match UninstallState::derive(&finalizers, graph, from) {
            UninstallState::PendingStage { index, name } => {
                let stage = &graph.uninstall_stages()[index];
                info!(stage = %name, "uninstalling stage");
                if run_stage(ctx, installation, stage, &finalizers, &mut errors).await {
                    if !errors.is_empty() {
                        installation.status_mut().last_error = errors.to_string();
                        if let Err(e) = status_manager.update_status(installation).await {
                            warn!(error = %e, "failed to record uninstall errors");
                        }
                    }
                    if let Err(e) = status_manager.update_object(installation).await {
                        warn!(error = %e, "failed to update installation during uninstall");
                    }
                    return Ok(Action::requeue(UNINSTALL_REQUEUE));
                }
                from = index + 1;
            }
            UninstallState::FinalCleanup => {
                return final_cleanup(ctx, installation, errors).await;
            }
            UninstallState::Done => {
                if installation.finalizers().is_empty() {
                    return Ok(Action::await_change());
                }
                info!("updating uninstallation object");
                status_manager.update_object(installation).await?;
                return Ok(Action::requeue(UNINSTALL_REQUEUE));
            }
        }
    }
}

/// Run one uninstall stage. Returns true while anything in it is pending.
async fn run_stage(
    ctx: &Context,
    installation: &mut RHMI,
    stage: &Stage,
    finalizers: &[String],
    errors: &mut MultiError,
) -> bool {
    if stage.name.is_bootstrap() {
        return uninstall_bootstrap(ctx, installation, errors).await;
    }

    let mut pending = false;
    for &product in &stage.products {
        if !finalizers.contains(&product.finalizer()) {
            continue;
        }
        info!(%product, stage = %stage.name, "uninstalling product");

        let reconciler = match ctx.factory.reconciler(product, installation) {
            Ok(r) => r,
            Err(e) => {
                errors.add(e.wrap(format!("failed to build reconciler for product {product}")));
                pending = true;
                continue;
            }
        };

        let mut status = installation.product_status(product);
        let uninstall = status.uninstall || installation.is_deleting();
        let empty_quota = Quota::default().product(product);

        let phase = match reconciler
            .reconcile(installation, &mut status, &empty_quota, uninstall)
            .await
        {
            Ok(phase) => phase,
            Err(e) => {
                errors.add(e.wrap(format!("failed to reconcile product {product}")));
                StatusPhase::Failed
            }
        };
        status.phase = phase;
        store_product_status(installation, stage.name, status);

        if !phase.is_completed() {
            pending = true;
        } else {
            debug!(%product, "product uninstalled");
        }
    }
    pending
}

async fn uninstall_bootstrap(
    ctx: &Context,
    installation: &mut RHMI,
    errors: &mut MultiError,
) -> bool {
    let reconciler = match ctx.factory.bootstrap(installation) {
        Ok(r) => r,
        Err(e) => {
            errors.add(e.wrap("failed to build a reconciler for Bootstrap"));
            return true;
        }
    };
    match reconciler.uninstall(installation).await {
        Ok(phase) if phase.is_completed() => false,
        Ok(phase) => {
            debug!(%phase, "bootstrap uninstall pending");
            true
        }
        Err(e) => {
            errors.add(e.wrap("failed to reconcile bootstrap"));
            true
        }
    }
}

/// Update the product wherever the status already tracks it, otherwise under `stage`
fn store_product_status(installation: &mut RHMI, stage: StageName, product: ProductStatus) {
    let status = installation.status_mut();
    if let Some(existing) = status
        .stages
        .values_mut()
        .find_map(|s| s.products.get_mut(&product.name))
    {
        *existing = product;
        return;
    }
    status
        .stages
        .entry(stage)
        .or_insert_with(|| StageStatus {
            name: stage,
            phase: StatusPhase::InProgress,
            products: Default::default(),
        })
        .products
        .insert(product.name, product);
}

async fn final_cleanup(
    ctx: &Context,
    installation: &mut RHMI,
    mut errors: MultiError,
) -> Result<Action> {
    let namespace = installation
        .namespace()
        .unwrap_or_else(|| ctx.config.watch_namespace.clone());
    let config_map = ctx
        .config
        .installation_config_map_name(&installation.spec.namespace_prefix);
    let status_manager = StatusManager::new(ctx.client.as_ref());

    if let Err(e) = ctx.client.delete_config_map(&namespace, &config_map).await
        && !e.is_not_found()
    {
        errors.add(e.wrap("failed to remove installation ConfigMap"));
        return abort(&status_manager, installation, errors).await;
    }

    if let Err(e) = delete_cloud_resource_config(ctx, &namespace).await {
        errors.add(e.wrap("failed to remove Cloud Resource ConfigMap"));
        return abort(&status_manager, installation, errors).await;
    }

    installation.remove_finalizer(DELETION_FINALIZER);
    if let Err(e) = status_manager.update_object(installation).await {
        errors.add(e);
        return Err(Error::MultiError(errors));
    }
    ctx.reset_failures(&failure_key(installation));

    if let Err(e) = ctx
        .client
        .uninstall_operator(&namespace, &ctx.config.subscription)
        .await
    {
        errors.add(e);
        return Err(Error::MultiError(errors));
    }

    info!("uninstall completed");
    Ok(Action::await_change())
}

async fn abort(
    status_manager: &StatusManager<'_>,
    installation: &mut RHMI,
    errors: MultiError,
) -> Result<Action> {
    installation.status_mut().last_error = errors.to_string();
    if let Err(e) = status_manager.update_status(installation).await {
        warn!(error = %e, "failed to record uninstall error");
    }
    Err(Error::MultiError(errors))
}

/// Release the cloud resource config map from the deletion finalizer and delete it
async fn delete_cloud_resource_config(ctx: &Context, namespace: &str) -> Result<()> {
    let Some(mut config_map) = ctx
        .client
        .get_config_map(namespace, CLOUD_RESOURCE_CONFIG_MAP)
        .await?
    else {
        return Ok(());
    };

    let finalizers = config_map.finalizers_mut();
    if finalizers.iter().any(|f| f == DELETION_FINALIZER) {
        finalizers.retain(|f| f != DELETION_FINALIZER);
        ctx.client.update_config_map(&config_map).await.map_err(|e| {
            e.wrap("error occurred trying to update cro config map")
        })?;
    }

    match ctx
        .client
        .delete_config_map(namespace, CLOUD_RESOURCE_CONFIG_MAP)
        .await
    {
        Err(e) if !e.is_not_found() => {
            Err(e.wrap("error occurred trying to delete cro config map"))
        }
        _ => Ok(()),
    }
}
