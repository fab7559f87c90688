//! Kubernetes access used by the installation controller
//!
//! Everything the controller reads or writes outside of product reconcilers
//! goes through `InstallationClient`, so the control flow can be tested with
//! a mock.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
    PostParams,
};
use kube::{Api, Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::crd::RHMI;

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "integreatly-operator";

/// Label carried by alerting rules the operator creates
pub const ALERT_RULE_LABEL: &str = "integreatly=yes";

/// Secret holding the addon parameters, in the installation namespace
pub const ADDON_PARAMETERS_SECRET: &str = "addon-managed-api-service-parameters";

/// An object whose existence signals a conflicting install of a product
#[derive(Clone, Debug, PartialEq)]
pub struct PreflightObject {
    pub gvk: GroupVersionKind,
    pub namespace: String,
    pub name: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstallationClient: Send + Sync {
    async fn get_installation(&self, namespace: &str, name: &str) -> Result<Option<RHMI>>;

    async fn list_installations(&self, namespace: &str) -> Result<Vec<RHMI>>;

    async fn create_installation(&self, installation: &RHMI) -> Result<RHMI>;

    /// Replace metadata and spec. The returned object carries the new resource version.
    async fn update_installation(&self, installation: &RHMI) -> Result<RHMI>;

    /// Replace the status subresource
    async fn update_status(&self, installation: &RHMI) -> Result<RHMI>;

    /// Delete every `monitoring.rhobs/v1` PrometheusRule labelled `integreatly=yes`.
    /// Returns how many were deleted.
    async fn delete_labelled_alert_rules(&self) -> Result<usize>;

    /// Delete named `monitoring.coreos.com/v1` PrometheusRules, ignoring missing ones
    async fn delete_legacy_alert_rules(&self, namespace: &str, names: &[String]) -> Result<()>;

    /// Read one addon parameter. `None` when the secret or key is absent.
    async fn get_addon_parameter(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Labels of a namespace; a missing namespace is an error
    async fn namespace_labels(&self, name: &str) -> Result<BTreeMap<String, String>>;

    async fn object_exists(&self, object: &PreflightObject) -> Result<bool>;

    /// Whether the cluster uses short-term credentials
    async fn is_sts_cluster(&self) -> Result<bool>;

    async fn get_cluster_package(&self, name: &str) -> Result<Option<DynamicObject>>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    /// Delete a config map. A missing config map is reported as a not-found error.
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create or update a config map with server-side apply
    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    /// Remove the operator's subscription and installed CSV
    async fn uninstall_operator(&self, namespace: &str, subscription: &str) -> Result<()>;
}

fn prometheus_rule_gvk(group: &str) -> GroupVersionKind {
    GroupVersionKind::gvk(group, "v1", "PrometheusRule")
}

fn subscription_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("operators.coreos.com", "v1alpha1", "Subscription")
}

fn csv_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("operators.coreos.com", "v1alpha1", "ClusterServiceVersion")
}

fn cluster_package_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("package-operator.run", "v1alpha1", "ClusterPackage")
}

fn cloud_credential_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("operator.openshift.io", "v1", "CloudCredential")
}

/// A 404 from the API server becomes `Ok(None)`
fn optional<T>(result: std::result::Result<T, kube::Error>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A 404 from the API server is not an error
fn tolerate_missing<T>(result: std::result::Result<T, kube::Error>) -> Result<()> {
    optional(result).map(|_| ())
}

/// `InstallationClient` backed by the API server
#[derive(Clone)]
pub struct KubeInstallationClient {
    client: Client,
}

impl KubeInstallationClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn installations(&self, namespace: &str) -> Api<RHMI> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn dynamic_namespaced(&self, gvk: &GroupVersionKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &ApiResource::from_gvk(gvk))
    }

    fn dynamic_cluster(&self, gvk: &GroupVersionKind) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &ApiResource::from_gvk(gvk))
    }
}

#[async_trait]
impl InstallationClient for KubeInstallationClient {
    async fn get_installation(&self, namespace: &str, name: &str) -> Result<Option<RHMI>> {
        Ok(self.installations(namespace).get_opt(name).await?)
    }

    async fn list_installations(&self, namespace: &str) -> Result<Vec<RHMI>> {
        let list = self
            .installations(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn create_installation(&self, installation: &RHMI) -> Result<RHMI> {
        let ns = installation
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        Ok(self
            .installations(&ns)
            .create(&PostParams::default(), installation)
            .await?)
    }

    async fn update_installation(&self, installation: &RHMI) -> Result<RHMI> {
        let ns = installation
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = installation.name_any();
        Ok(self
            .installations(&ns)
            .replace(&name, &PostParams::default(), installation)
            .await?)
    }

    async fn update_status(&self, installation: &RHMI) -> Result<RHMI> {
        let ns = installation
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = installation.name_any();

        // Apply drops status fields this manager wrote before and now omits
        let patch = serde_json::json!({
            "apiVersion": RHMI::api_version(&()),
            "kind": RHMI::kind(&()),
            "status": installation.status,
        });
        Ok(self
            .installations(&ns)
            .patch_status(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&patch),
            )
            .await?)
    }

    async fn delete_labelled_alert_rules(&self) -> Result<usize> {
        let gvk = prometheus_rule_gvk("monitoring.rhobs");
        let rules = match optional(
            self.dynamic_cluster(&gvk)
                .list(&ListParams::default().labels(ALERT_RULE_LABEL))
                .await,
        )? {
            Some(list) => list.items,
            // CRD not installed
            None => return Ok(0),
        };

        let mut deleted = 0;
        for rule in rules {
            let Some(ns) = rule.namespace() else {
                continue;
            };
            let name = rule.name_any();
            tolerate_missing(
                self.dynamic_namespaced(&gvk, &ns)
                    .delete(&name, &DeleteParams::default())
                    .await,
            )?;
            debug!(namespace = %ns, name = %name, "deleted alert rule");
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn delete_legacy_alert_rules(&self, namespace: &str, names: &[String]) -> Result<()> {
        let api = self.dynamic_namespaced(&prometheus_rule_gvk("monitoring.coreos.com"), namespace);
        for name in names {
            tolerate_missing(api.delete(name, &DeleteParams::default()).await)?;
        }
        Ok(())
    }

    async fn get_addon_parameter(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = api.get_opt(ADDON_PARAMETERS_SECRET).await? else {
            return Ok(None);
        };
        Ok(secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|ByteString(bytes)| String::from_utf8_lossy(bytes).into_owned()))
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(ResourceExt::name_any).collect())
    }

    async fn namespace_labels(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = api.get(name).await?;
        Ok(namespace.metadata.labels.unwrap_or_default())
    }

    async fn object_exists(&self, object: &PreflightObject) -> Result<bool> {
        let api = self.dynamic_namespaced(&object.gvk, &object.namespace);
        Ok(optional(api.get(&object.name).await)?.is_some())
    }

    async fn is_sts_cluster(&self) -> Result<bool> {
        let credential = self
            .dynamic_cluster(&cloud_credential_gvk())
            .get("cluster")
            .await?;
        let mode = credential
            .data
            .pointer("/spec/credentialsMode")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(mode == "Manual")
    }

    async fn get_cluster_package(&self, name: &str) -> Result<Option<DynamicObject>> {
        optional(self.dynamic_cluster(&cluster_package_gvk()).get(name).await)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let ns = config_map
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &ns);
        Ok(api
            .replace(&config_map.name_any(), &PostParams::default(), config_map)
            .await?)
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let ns = config_map
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = config_map.name_any();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &ns);

        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(config_map),
        )
        .await?;
        debug!("Applied config map: {}", name);
        Ok(())
    }

    async fn uninstall_operator(&self, namespace: &str, subscription: &str) -> Result<()> {
        let subscriptions = self.dynamic_namespaced(&subscription_gvk(), namespace);
        let Some(sub) = optional(subscriptions.get(subscription).await)? else {
            debug!(subscription, "operator subscription already removed");
            return Ok(());
        };

        let installed_csv = sub
            .data
            .pointer("/status/installedCSV")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        tolerate_missing(
            subscriptions
                .delete(subscription, &DeleteParams::default())
                .await,
        )?;
        info!(subscription, "deleted operator subscription");

        if let Some(csv) = installed_csv {
            tolerate_missing(
                self.dynamic_namespaced(&csv_gvk(), namespace)
                    .delete(&csv, &DeleteParams::default())
                    .await,
            )?;
            info!(csv = %csv, "deleted operator cluster service version");
        }
        Ok(())
    }
}
