//! Stage execution
//!
//! Runs every product of one install stage through its reconciler, records
//! the product phases in the installation status and registers watches for
//! products that finished.

use std::collections::BTreeMap;

use kube::api::GroupVersionKind;
use tracing::{debug, info, instrument, warn};

use crate::controller::error::{Error, MultiError};
use crate::controller::informer::WatchRegistry;
use crate::controller::stages::Stage;
use crate::crd::{ProductName, ProductStatus, RHMI, StageStatus, StatusPhase};
use crate::products::{ProductFactory, ProductReconciler};
use crate::quota::Quota;

/// Result of processing one stage
#[derive(Debug)]
pub struct StageOutcome {
    pub phase: StatusPhase,
    pub error: Option<Error>,
    /// A product reported a version other than the one this build installs
    pub version_mismatch: bool,
}

impl StageOutcome {
    pub fn completed() -> Self {
        Self {
            phase: StatusPhase::Completed,
            error: None,
            version_mismatch: false,
        }
    }

    pub fn failed(error: Error) -> Self {
        Self {
            phase: StatusPhase::Failed,
            error: Some(error),
            version_mismatch: false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.phase.is_completed()
    }
}

/// `group/version, Kind=kind`
pub fn gvk_string(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}, Kind={}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}, Kind={}", gvk.group, gvk.version, gvk.kind)
    }
}

/// Drives the products of a stage
pub struct StageExecutor<'a> {
    factory: &'a dyn ProductFactory,
    informers: &'a dyn WatchRegistry,
}

impl<'a> StageExecutor<'a> {
    pub fn new(factory: &'a dyn ProductFactory, informers: &'a dyn WatchRegistry) -> Self {
        Self { factory, informers }
    }

    /// Reconcile every product in `stage`.
    ///
    /// Product failures do not stop the remaining products. The stage
    /// status, including every product processed so far, is written to the
    /// installation before returning.
    #[instrument(skip_all, fields(stage = %stage.name))]
    pub async fn process_stage(
        &self,
        installation: &mut RHMI,
        stage: &Stage,
        quota: &Quota,
    ) -> StageOutcome {
        installation.status_mut().stage = stage.name;

        let mut products = BTreeMap::new();
        let mut errors = MultiError::new();
        let mut version_mismatch = false;
        let mut incomplete = false;

        for &product in &stage.products {
            let reconciler = match self.factory.reconciler(product, installation) {
                Ok(r) => r,
                Err(e) => {
                    record_stage(installation, stage, StatusPhase::Failed, products);
                    return StageOutcome {
                        version_mismatch,
                        ..StageOutcome::failed(e)
                    };
                }
            };

            if !reconciler.verify_version(installation) {
                debug!(%product, "product version does not match the target version");
                version_mismatch = true;
            }

            let mut status = installation.product_status(product);
            let uninstall = status.uninstall || installation.is_deleting();
            let product_quota = quota.product(product);

            status.phase = match reconciler
                .reconcile(installation, &mut status, &product_quota, uninstall)
                .await
            {
                Ok(phase) => phase,
                Err(e) => {
                    warn!(%product, error = %e, "product reconcile failed");
                    errors.add(e.wrap(format!("failed installation of {product}")));
                    StatusPhase::Failed
                }
            };

            if status.phase.is_completed() {
                if let Err(e) = self.ensure_watches(product, reconciler.as_ref()).await {
                    products.insert(product, status);
                    record_stage(installation, stage, StatusPhase::Failed, products);
                    return StageOutcome {
                        version_mismatch,
                        ..StageOutcome::failed(e)
                    };
                }
            } else {
                incomplete = true;
            }
            products.insert(product, status);
        }

        let phase = if incomplete {
            StatusPhase::InProgress
        } else {
            StatusPhase::Completed
        };
        record_stage(installation, stage, phase, products);

        if phase.is_completed() {
            info!("stage completed");
        }
        StageOutcome {
            phase,
            error: if incomplete { errors.into_error() } else { None },
            version_mismatch,
        }
    }

    async fn ensure_watches(
        &self,
        product: ProductName,
        reconciler: &dyn ProductReconciler,
    ) -> Result<(), Error> {
        let config = reconciler.config();
        for gvk in &config.watchable_crds {
            let synced = self
                .informers
                .ensure_watch(gvk, &config.namespace)
                .await
                .map_err(|e| {
                    e.wrap(format!(
                        "failed to create a {} CRD watch for {product}",
                        gvk_string(gvk)
                    ))
                })?;
            if !synced {
                return Err(Error::InformerError(format!(
                    "A {} CRD Informer for {product} has not synced",
                    gvk_string(gvk)
                )));
            }
        }
        Ok(())
    }
}

fn record_stage(
    installation: &mut RHMI,
    stage: &Stage,
    phase: StatusPhase,
    products: BTreeMap<ProductName, ProductStatus>,
) {
    installation.status_mut().stages.insert(
        stage.name,
        StageStatus {
            name: stage.name,
            phase,
            products,
        },
    );
}
