//! Applying a tier to workload objects
//!
//! Each supported kind keeps its replica count and resource requirements in a
//! different place. `WorkloadTarget` knows where; the merge rules below do
//! not care which kind they are working on.
//!
//! Merge rule, per replica count and per cpu/memory quantity: when the tier
//! was just selected the configured value is applied exactly, otherwise the
//! current value is only raised (or filled in when zero or unset).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::quota::config::{QuotaProductConfig, ResourceConfig, WorkloadResources};
use crate::quota::quantity::{self, CPU, MEMORY};
use crate::quota::{APICAST_PRODUCTION, BACKEND_LISTENER, BACKEND_WORKER, KEYCLOAK};

/// A workload object the quota can be applied to
#[derive(Debug)]
pub enum WorkloadTarget<'a> {
    Deployment(&'a mut Deployment),
    StatefulSet(&'a mut StatefulSet),
    /// `apps.openshift.io/v1` DeploymentConfig
    DeploymentConfig(&'a mut DynamicObject),
    /// `keycloak.org/v1alpha1` Keycloak
    Keycloak(&'a mut DynamicObject),
    /// `apps.3scale.net/v1alpha1` APIManager
    ApiManager(&'a mut DynamicObject),
}

impl<'a> WorkloadTarget<'a> {
    /// Pick the variant from the object's kind.
    ///
    /// Anything that is not a DeploymentConfig, Keycloak or APIManager is
    /// rejected; typed Deployments and StatefulSets use their own variants.
    pub fn from_dynamic(obj: &'a mut DynamicObject) -> Result<Self> {
        let kind = obj
            .types
            .as_ref()
            .map(|t| t.kind.clone())
            .unwrap_or_default();
        match kind.as_str() {
            "DeploymentConfig" => Ok(WorkloadTarget::DeploymentConfig(obj)),
            "Keycloak" => Ok(WorkloadTarget::Keycloak(obj)),
            "APIManager" => Ok(WorkloadTarget::ApiManager(obj)),
            "" => Err(Error::UnsupportedKindError("an object without a kind".to_string())),
            other => Err(Error::UnsupportedKindError(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkloadTarget::Deployment(_) => "Deployment",
            WorkloadTarget::StatefulSet(_) => "StatefulSet",
            WorkloadTarget::DeploymentConfig(_) => "DeploymentConfig",
            WorkloadTarget::Keycloak(_) => "Keycloak",
            WorkloadTarget::ApiManager(_) => "APIManager",
        }
    }

    fn name(&self) -> String {
        match self {
            WorkloadTarget::Deployment(d) => d.name_any(),
            WorkloadTarget::StatefulSet(s) => s.name_any(),
            WorkloadTarget::DeploymentConfig(o)
            | WorkloadTarget::Keycloak(o)
            | WorkloadTarget::ApiManager(o) => o.name_any(),
        }
    }

    pub(crate) fn apply(self, config: &QuotaProductConfig) -> Result<()> {
        let is_updated = config.is_updated();
        let name = self.name();

        match self {
            WorkloadTarget::Deployment(d) => {
                let Some(cfg) = workload_config(config, &name) else {
                    return Ok(());
                };
                let spec = d.spec.get_or_insert_with(Default::default);
                size_i32(&mut spec.replicas, cfg, is_updated);
                size_template(&mut spec.template, cfg, is_updated);
            }
            WorkloadTarget::StatefulSet(s) => {
                let Some(cfg) = workload_config(config, &name) else {
                    return Ok(());
                };
                let spec = s.spec.get_or_insert_with(Default::default);
                size_i32(&mut spec.replicas, cfg, is_updated);
                size_template(&mut spec.template, cfg, is_updated);
            }
            WorkloadTarget::DeploymentConfig(o) => {
                let Some(cfg) = workload_config(config, &name) else {
                    return Ok(());
                };
                with_spec(o, |spec: &mut DeploymentConfigSpec| {
                    spec.replicas = Some(merge_replicas(
                        spec.replicas.unwrap_or(0),
                        i64::from(cfg.replicas),
                        is_updated,
                    ));
                    if let Some(template) = spec.template.as_mut() {
                        size_template(template, cfg, is_updated);
                    }
                })?;
            }
            WorkloadTarget::Keycloak(o) => {
                let replicas = config.resource_config(&name).map(|c| c.replicas);
                let resources = config.resource_config(KEYCLOAK).map(|c| &c.resources);
                with_spec(o, |spec: &mut KeycloakSpec| {
                    if let Some(replicas) = replicas {
                        spec.instances = Some(merge_replicas(
                            spec.instances.unwrap_or(0),
                            i64::from(replicas),
                            is_updated,
                        ));
                    }
                    if let Some(resources) = resources {
                        let deployment = spec.keycloak_deployment_spec.get_or_insert_with(Default::default);
                        let requirements = deployment.resources.get_or_insert_with(Default::default);
                        merge_requirements(requirements, resources, is_updated);
                    }
                })?;
            }
            WorkloadTarget::ApiManager(o) => {
                with_spec(o, |spec: &mut ApiManagerSpec| {
                    spec.initialize();
                    let apicast = spec.apicast.get_or_insert_with(Default::default);
                    if let Some(production) = apicast.production_spec.as_mut() {
                        production.size(config.resource_config(APICAST_PRODUCTION), is_updated);
                    }
                    let backend = spec.backend.get_or_insert_with(Default::default);
                    if let Some(listener) = backend.listener_spec.as_mut() {
                        listener.size(config.resource_config(BACKEND_LISTENER), is_updated);
                    }
                    if let Some(worker) = backend.worker_spec.as_mut() {
                        worker.size(config.resource_config(BACKEND_WORKER), is_updated);
                    }
                })?;
            }
        }

        Ok(())
    }
}

fn workload_config<'c>(config: &'c QuotaProductConfig, name: &str) -> Option<&'c ResourceConfig> {
    let cfg = config.resource_config(name);
    if cfg.is_none() {
        debug!(
            product = %config.product_name(),
            workload = name,
            "no quota entry for workload, leaving it unchanged"
        );
    }
    cfg
}

/// Replica count to apply given the current and configured values
pub fn merge_replicas(current: i64, configured: i64, is_updated: bool) -> i64 {
    if is_updated || current < configured || current == 0 {
        configured
    } else {
        current
    }
}

/// Merge the configured cpu and memory into a resource list.
///
/// A cpu or memory value the tier leaves out counts as zero. Other resource
/// names are left alone.
pub fn merge_resource_list(
    current: &mut BTreeMap<String, Quantity>,
    configured: &BTreeMap<String, Quantity>,
    is_updated: bool,
) {
    for resource in [CPU, MEMORY] {
        let target = configured
            .get(resource)
            .cloned()
            .unwrap_or_else(|| Quantity("0".to_string()));
        let replace = is_updated
            || current.get(resource).is_none_or(|value| {
                quantity::is_zero(value) || quantity::compare(value, &target) == Ordering::Less
            });
        if replace {
            current.insert(resource.to_string(), target);
        }
    }
}

fn merge_requirements(
    requirements: &mut ResourceRequirements,
    configured: &WorkloadResources,
    is_updated: bool,
) {
    merge_resource_list(
        requirements.limits.get_or_insert_with(BTreeMap::new),
        &configured.limits,
        is_updated,
    );
    merge_resource_list(
        requirements.requests.get_or_insert_with(BTreeMap::new),
        &configured.requests,
        is_updated,
    );
}

fn size_i32(replicas: &mut Option<i32>, cfg: &ResourceConfig, is_updated: bool) {
    let merged = merge_replicas(
        i64::from(replicas.unwrap_or(0)),
        i64::from(cfg.replicas),
        is_updated,
    );
    *replicas = Some(i32::try_from(merged).unwrap_or(cfg.replicas));
}

fn size_template(template: &mut PodTemplateSpec, cfg: &ResourceConfig, is_updated: bool) {
    let Some(pod) = template.spec.as_mut() else {
        return;
    };
    for container in &mut pod.containers {
        let requirements = container.resources.get_or_insert_with(Default::default);
        merge_requirements(requirements, &cfg.resources, is_updated);
    }
}

/// Deserialize `.spec` into `S`, mutate it, and write it back
fn with_spec<S>(obj: &mut DynamicObject, mutate: impl FnOnce(&mut S)) -> Result<()>
where
    S: DeserializeOwned + Serialize + Default,
{
    let mut spec: S = match obj.data.get("spec") {
        Some(value) if !value.is_null() => serde_json::from_value(value.clone())?,
        _ => S::default(),
    };
    mutate(&mut spec);
    let value = serde_json::to_value(&spec)?;

    match obj.data.as_object_mut() {
        Some(data) => {
            data.insert("spec".to_string(), value);
        }
        None => obj.data = serde_json::json!({ "spec": value }),
    }
    Ok(())
}

// Partial views of the custom resource specs. Unknown fields pass through.

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replicas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template: Option<PodTemplateSpec>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeycloakSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instances: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    keycloak_deployment_spec: Option<KeycloakDeploymentSpec>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeycloakDeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resources: Option<ResourceRequirements>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ApiManagerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    apicast: Option<ApicastSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backend: Option<BackendSpec>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl ApiManagerSpec {
    /// Fill in every scalable block the quota touches
    fn initialize(&mut self) {
        let apicast = self.apicast.get_or_insert_with(Default::default);
        apicast
            .production_spec
            .get_or_insert_with(Default::default)
            .initialize();
        apicast
            .staging_spec
            .get_or_insert_with(Default::default)
            .initialize();

        let backend = self.backend.get_or_insert_with(Default::default);
        backend
            .listener_spec
            .get_or_insert_with(Default::default)
            .initialize();
        backend
            .worker_spec
            .get_or_insert_with(Default::default)
            .initialize();
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApicastSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    production_spec: Option<ScalableSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    staging_spec: Option<ScalableSpec>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    listener_spec: Option<ScalableSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    worker_spec: Option<ScalableSpec>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ScalableSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replicas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resources: Option<ResourceRequirements>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl ScalableSpec {
    fn initialize(&mut self) {
        self.replicas.get_or_insert(0);
        let resources = self.resources.get_or_insert_with(Default::default);
        resources.requests.get_or_insert_with(BTreeMap::new);
        resources.limits.get_or_insert_with(BTreeMap::new);
    }

    fn size(&mut self, cfg: Option<&ResourceConfig>, is_updated: bool) {
        let Some(cfg) = cfg else {
            return;
        };
        self.replicas = Some(merge_replicas(
            self.replicas.unwrap_or(0),
            i64::from(cfg.replicas),
            is_updated,
        ));
        let resources = self.resources.get_or_insert_with(Default::default);
        merge_requirements(resources, &cfg.resources, is_updated);
    }
}
