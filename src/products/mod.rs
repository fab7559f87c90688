//! Product reconcilers
//!
//! The installation controller drives products only through the traits in
//! this module. `DefaultProductFactory` builds the workload based
//! reconcilers shipped with the operator.

mod observability;
mod workload;

pub use observability::ObservabilityBootstrap;
pub use workload::WorkloadProduct;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, GroupVersionKind, ObjectMeta, Patch, PatchParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::controller::client::{FIELD_MANAGER, PreflightObject};
use crate::controller::error::{Error, Result};
use crate::crd::{ProductName, ProductStatus, RHMI, StatusPhase};
use crate::quota::QuotaProductConfig;

/// Static facts about a product
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProductConfig {
    /// Namespace the product is installed into
    pub namespace: String,
    /// Custom resources whose changes should re-trigger the installation
    pub watchable_crds: Vec<GroupVersionKind>,
}

/// Installs, upgrades and removes one product
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProductReconciler: Send + Sync {
    /// Drive the product one step towards its desired state.
    ///
    /// `status` belongs to the installation and is written back by the
    /// caller. Finalizer changes are made on `installation` directly.
    async fn reconcile(
        &self,
        installation: &mut RHMI,
        status: &mut ProductStatus,
        quota: &QuotaProductConfig,
        uninstall: bool,
    ) -> Result<StatusPhase>;

    /// False when the installed product does not match the version this build expects
    fn verify_version(&self, installation: &RHMI) -> bool;

    /// Object that indicates a conflicting install of this product in `namespace`
    fn preflight_object(&self, namespace: &str) -> Option<PreflightObject>;

    fn config(&self) -> ProductConfig;
}

/// Cluster wide prerequisites that run before any product stage
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BootstrapReconciler: Send + Sync {
    async fn reconcile(&self, installation: &mut RHMI) -> Result<StatusPhase>;

    async fn uninstall(&self, installation: &mut RHMI) -> Result<StatusPhase>;
}

#[cfg_attr(test, automock)]
pub trait ProductFactory: Send + Sync {
    fn reconciler(
        &self,
        product: ProductName,
        installation: &RHMI,
    ) -> Result<Box<dyn ProductReconciler>>;

    fn bootstrap(&self, installation: &RHMI) -> Result<Box<dyn BootstrapReconciler>>;
}

/// Builds the reconcilers shipped with the operator
#[derive(Clone)]
pub struct DefaultProductFactory {
    client: Client,
    version: String,
}

impl DefaultProductFactory {
    pub fn new(client: Client, version: impl Into<String>) -> Self {
        Self {
            client,
            version: version.into(),
        }
    }
}

impl ProductFactory for DefaultProductFactory {
    fn reconciler(
        &self,
        product: ProductName,
        installation: &RHMI,
    ) -> Result<Box<dyn ProductReconciler>> {
        if installation.spec.namespace_prefix.is_empty() {
            return Err(Error::ReconcilerBuildError {
                product: product.to_string(),
                message: "installation has no namespace prefix".to_string(),
            });
        }
        Ok(Box::new(WorkloadProduct::new(
            self.client.clone(),
            product,
            &installation.spec.namespace_prefix,
            &self.version,
        )))
    }

    fn bootstrap(&self, installation: &RHMI) -> Result<Box<dyn BootstrapReconciler>> {
        Ok(Box::new(ObservabilityBootstrap::new(
            self.client.clone(),
            &installation.spec.namespace_prefix,
        )))
    }
}

/// Create the namespace if needed
pub(crate) async fn ensure_namespace(client: &Client, name: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                "integreatly".to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    };

    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&ns),
    )
    .await?;
    debug!("Applied namespace: {}", name);
    Ok(())
}

/// Request deletion of a namespace. Returns true once it no longer exists.
pub(crate) async fn remove_namespace(client: &Client, name: &str) -> Result<bool> {
    let api: Api<Namespace> = Api::all(client.clone());
    let Some(ns) = api.get_opt(name).await? else {
        return Ok(true);
    };

    if ns.metadata.deletion_timestamp.is_none() {
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => info!(namespace = name, "deleting namespace"),
            Err(kube::Error::Api(resp)) if resp.code == 404 => return Ok(true),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(false)
}
