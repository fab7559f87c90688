use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, PostParams};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, instrument};

use crate::controller::client::PreflightObject;
use crate::controller::error::Result;
use crate::crd::{ProductName, ProductStatus, RHMI, StatusPhase};
use crate::products::{ProductConfig, ProductReconciler, ensure_namespace, remove_namespace};
use crate::quota::{QuotaProductConfig, WorkloadTarget};

/// Reads and writes the objects a product's quota is applied to
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn replace_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()>;

    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;

    async fn replace_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<()>;

    async fn get_custom_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    async fn replace_custom_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<()>;
}

pub struct KubeWorkloadStore {
    client: Client,
}

impl KubeWorkloadStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic(&self, namespace: &str, gvk: &GroupVersionKind) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &ApiResource::from_gvk(gvk))
    }
}

#[async_trait]
impl WorkloadStore for KubeWorkloadStore {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&deployment.name_any(), &PostParams::default(), deployment)
            .await?;
        Ok(())
    }

    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<()> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&sts.name_any(), &PostParams::default(), sts)
            .await?;
        Ok(())
    }

    async fn get_custom_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.dynamic(namespace, gvk).get_opt(name).await?)
    }

    async fn replace_custom_resource(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<()> {
        self.dynamic(namespace, gvk)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await?;
        Ok(())
    }
}

/// Generic product: a namespace holding Deployments and StatefulSets named
/// after the product's quota workloads, plus an optional custom resource.
pub struct WorkloadProduct {
    client: Client,
    store: Box<dyn WorkloadStore>,
    product: ProductName,
    namespace: String,
    version: String,
    finalizer: String,
}

impl WorkloadProduct {
    pub fn new(client: Client, product: ProductName, namespace_prefix: &str, version: &str) -> Self {
        Self {
            store: Box::new(KubeWorkloadStore::new(client.clone())),
            client,
            product,
            namespace: format!("{namespace_prefix}{product}"),
            version: version.to_string(),
            finalizer: product.finalizer(),
        }
    }
}

/// Custom resource sized by the product's quota, and its name
fn custom_resource(product: ProductName) -> Option<(GroupVersionKind, &'static str)> {
    match product {
        ProductName::ThreeScale => Some((
            GroupVersionKind::gvk("apps.3scale.net", "v1alpha1", "APIManager"),
            "3scale",
        )),
        ProductName::RhssoUser => Some((
            GroupVersionKind::gvk("keycloak.org", "v1alpha1", "Keycloak"),
            "rhssouser",
        )),
        _ => None,
    }
}

/// Apply the quota to every workload found in `namespace`. Objects are only
/// written back when the quota changed them. Returns true when all are ready.
async fn apply_quota(
    store: &dyn WorkloadStore,
    namespace: &str,
    product: ProductName,
    quota: &QuotaProductConfig,
) -> Result<bool> {
    let mut ready = true;

    for workload in quota.workloads().filter(|w| is_object_name(w)) {
        if let Some(mut deployment) = store.get_deployment(namespace, workload).await? {
            let before = deployment.spec.clone();
            quota.configure(WorkloadTarget::Deployment(&mut deployment))?;
            if deployment.spec != before {
                store.replace_deployment(namespace, &deployment).await?;
                info!(workload, "applied quota to deployment");
            }
            ready &= deployment_ready(&deployment);
        } else if let Some(mut sts) = store.get_statefulset(namespace, workload).await? {
            let before = sts.spec.clone();
            quota.configure(WorkloadTarget::StatefulSet(&mut sts))?;
            if sts.spec != before {
                store.replace_statefulset(namespace, &sts).await?;
                info!(workload, "applied quota to statefulset");
            }
            ready &= statefulset_ready(&sts);
        } else {
            debug!(workload, namespace, "workload not present");
        }
    }

    if let Some((gvk, name)) = custom_resource(product)
        && let Some(mut obj) = store.get_custom_resource(namespace, &gvk, name).await?
    {
        let before = obj.data.clone();
        WorkloadTarget::from_dynamic(&mut obj).and_then(|t| quota.configure(t))?;
        if obj.data != before {
            store.replace_custom_resource(namespace, &gvk, &obj).await?;
            info!(kind = %gvk.kind, name, "applied quota to custom resource");
        }
    }

    Ok(ready)
}

#[async_trait]
impl ProductReconciler for WorkloadProduct {
    #[instrument(skip_all, fields(product = %self.product, uninstall = uninstall))]
    async fn reconcile(
        &self,
        installation: &mut RHMI,
        status: &mut ProductStatus,
        quota: &QuotaProductConfig,
        uninstall: bool,
    ) -> Result<StatusPhase> {
        if uninstall {
            if remove_namespace(&self.client, &self.namespace).await? {
                installation.remove_finalizer(&self.finalizer);
                return Ok(StatusPhase::Completed);
            }
            return Ok(StatusPhase::InProgress);
        }

        installation.add_finalizer(&self.finalizer);
        ensure_namespace(&self.client, &self.namespace).await?;

        let ready = apply_quota(self.store.as_ref(), &self.namespace, self.product, quota).await?;
        status.version = self.version.clone();
        status.operator_version = self.version.clone();

        if ready {
            Ok(StatusPhase::Completed)
        } else {
            Ok(StatusPhase::AwaitingComponents)
        }
    }

    fn verify_version(&self, installation: &RHMI) -> bool {
        installation.product_status(self.product).version == self.version
    }

    fn preflight_object(&self, namespace: &str) -> Option<PreflightObject> {
        Some(PreflightObject {
            gvk: GroupVersionKind::gvk("apps", "v1", "Deployment"),
            namespace: namespace.to_string(),
            name: self.product.to_string(),
        })
    }

    fn config(&self) -> ProductConfig {
        ProductConfig {
            namespace: self.namespace.clone(),
            watchable_crds: custom_resource(self.product)
                .map(|(gvk, _)| gvk)
                .into_iter()
                .collect(),
        }
    }
}

/// Quota workload keys may contain underscores, which object names cannot
fn is_object_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    ready >= desired
}

fn statefulset_ready(sts: &StatefulSet) -> bool {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
    ready >= desired
}
