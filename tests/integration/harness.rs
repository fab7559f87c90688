//! Installation test harness
//!
//! Each test gets an operator namespace named `<test>-<hex>-operator`. Its
//! `<test>-<hex>-` prefix is the installation's namespace prefix, so product
//! namespaces created by the controller are found and removed with it.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use integreatly_operator::controller::bootstrap::QUOTA_PARAM;
use integreatly_operator::controller::client::ADDON_PARAMETERS_SECRET;
use integreatly_operator::controller::preflight::IN_PROW_ANNOTATION;
use integreatly_operator::crd::{PreflightStatus, RHMI, StageName, StatusPhase};
use integreatly_operator::{OperatorConfig, run_controller_scoped};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::wait::{Condition, await_condition, conditions};
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use rand::Rng;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::common::{InstallationBuilder, create_quota_config_map};

pub const INSTALLATION_NAME: &str = "rhoam";

/// How long the controller gets to move an installation along
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(90);

const CRD_NAME: &str = "rhmis.integreatly.org";
const FIELD_MANAGER: &str = "integreatly-operator-tests";
const TEST_LABEL: &str = "integreatly-operator.test";

static CRD_APPLIED: OnceCell<()> = OnceCell::const_new();

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] kube::runtime::wait::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Installation {0} was deleted while waiting")]
    Deleted(String),
}

/// Client for the kubeconfig cluster. The RHMI CRD is applied on first use.
pub async fn connect() -> Result<Client, HarnessError> {
    let client = Client::try_default().await?;
    CRD_APPLIED
        .get_or_try_init(|| apply_crd(client.clone()))
        .await?;
    Ok(client)
}

async fn apply_crd(client: Client) -> Result<(), HarnessError> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    crds.patch(
        CRD_NAME,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&RHMI::crd()),
    )
    .await?;
    within(
        Duration::from_secs(30),
        "the RHMI CRD to be established",
        await_condition(crds, CRD_NAME, conditions::is_crd_established()),
    )
    .await?;
    tracing::info!(crd = CRD_NAME, "RHMI CRD established");
    Ok(())
}

async fn within<T>(
    timeout: Duration,
    what: &str,
    wait: impl Future<Output = Result<T, kube::runtime::wait::Error>>,
) -> Result<T, HarnessError> {
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| HarnessError::Timeout(what.to_string()))?
        .map_err(HarnessError::from)
}

/// The operator namespace of one test
pub struct OperatorNamespace {
    client: Client,
    name: String,
    prefix: String,
}

impl OperatorNamespace {
    pub async fn create(client: Client, test: &str) -> Result<Self, HarnessError> {
        let suffix: u32 = rand::rng().random();
        let prefix = format!("{test}-{suffix:08x}-");
        let name = format!("{prefix}operator");

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(BTreeMap::from([(TEST_LABEL.to_string(), test.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        };
        Api::<Namespace>::all(client.clone())
            .create(&PostParams::default(), &namespace)
            .await?;
        tracing::info!(namespace = %name, "created operator namespace");

        Ok(Self {
            client,
            name,
            prefix,
        })
    }

    /// Namespace prefix the operator derives from this namespace
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn installations(&self) -> Api<RHMI> {
        Api::namespaced(self.client.clone(), &self.name)
    }

    pub fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.name)
    }

    /// Operator configuration as the deployment would provide it
    pub fn operator_config(&self) -> OperatorConfig {
        let namespace = self.name.clone();
        OperatorConfig::from_lookup(move |key| match key {
            "WATCH_NAMESPACE" => Some(namespace.clone()),
            "ALERT_SMTP_FROM" => Some("noreply@example.com".to_string()),
            "USE_CLUSTER_STORAGE" => Some("true".to_string()),
            _ => None,
        })
    }

    pub fn pager_duty_secret(&self) -> String {
        format!("{}pagerduty", self.prefix)
    }

    pub async fn create_pager_duty_secret(&self) -> Result<(), HarnessError> {
        self.create_secret(&self.pager_duty_secret(), &[("serviceKey", "test")])
            .await
    }

    /// Addon parameters secret selecting the capacity tier `param`
    pub async fn set_quota_param(&self, param: &str) -> Result<(), HarnessError> {
        self.create_secret(ADDON_PARAMETERS_SECRET, &[(QUOTA_PARAM, param)])
            .await
    }

    async fn create_secret(&self, name: &str, data: &[(&str, &str)]) -> Result<(), HarnessError> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            string_data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        };
        Api::<Secret>::namespaced(self.client.clone(), &self.name)
            .create(&PostParams::default(), &secret)
            .await?;
        Ok(())
    }

    pub async fn seed_quota_config(&self) -> Result<(), HarnessError> {
        self.config_maps()
            .create(&PostParams::default(), &create_quota_config_map(&self.name))
            .await?;
        Ok(())
    }

    /// Create a managed-api installation awaiting preflight. The ClusterPackage
    /// check is skipped; no package operator runs in the test cluster.
    pub async fn create_installation(&self, use_cluster_storage: &str) -> Result<RHMI, HarnessError> {
        let mut rhmi = InstallationBuilder::managed_api(INSTALLATION_NAME, &self.name)
            .preflight(PreflightStatus::InProgress)
            .with_finalizers(&[])
            .build();
        rhmi.spec.namespace_prefix = self.prefix.clone();
        rhmi.spec.pager_duty_secret = self.pager_duty_secret();
        rhmi.spec.use_cluster_storage = use_cluster_storage.to_string();
        rhmi.annotations_mut()
            .insert(IN_PROW_ANNOTATION.to_string(), "true".to_string());
        rhmi.status = None;

        Ok(self
            .installations()
            .create(&PostParams::default(), &rhmi)
            .await?)
    }

    /// Run the installation controller against this namespace until the
    /// returned handle is dropped
    pub fn start_operator(&self) -> RunningOperator {
        RunningOperator::start(self.client.clone(), self.operator_config())
    }

    /// Wait until the installation satisfies `condition`
    pub async fn wait_for(
        &self,
        what: &str,
        condition: impl Condition<RHMI>,
    ) -> Result<RHMI, HarnessError> {
        within(
            STATUS_TIMEOUT,
            what,
            await_condition(self.installations(), INSTALLATION_NAME, condition),
        )
        .await?
        .ok_or_else(|| HarnessError::Deleted(INSTALLATION_NAME.to_string()))
    }

    /// Release the installation's finalizers, then delete every namespace
    /// carrying this test's prefix. Deletion is not awaited.
    pub async fn cleanup(&self) -> Result<(), HarnessError> {
        let installations = self.installations();
        for rhmi in installations.list(&ListParams::default()).await? {
            let release = serde_json::json!({ "metadata": { "finalizers": null } });
            installations
                .patch(
                    &rhmi.name_any(),
                    &PatchParams::default(),
                    &Patch::Merge(&release),
                )
                .await?;
        }

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let background = DeleteParams::background();
        for namespace in namespaces.list(&ListParams::default()).await? {
            let name = namespace.name_any();
            if !name.starts_with(&self.prefix) {
                continue;
            }
            match namespaces.delete(&name, &background).await {
                Ok(_) => tracing::debug!(namespace = %name, "namespace deletion started"),
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Controller task for one test namespace, aborted on drop
pub struct RunningOperator {
    handle: JoinHandle<()>,
}

impl RunningOperator {
    fn start(client: Client, config: OperatorConfig) -> Self {
        let handle = tokio::spawn(async move {
            let namespace = config.watch_namespace.clone();
            run_controller_scoped(client, config, None, Some(&namespace)).await;
            tracing::debug!(%namespace, "controller exited");
        });
        Self { handle }
    }
}

impl Drop for RunningOperator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Preflight failed with a message containing `fragment`
pub fn preflight_failed_with(fragment: &str) -> impl Condition<RHMI> {
    let fragment = fragment.to_string();
    move |obj: Option<&RHMI>| {
        obj.and_then(|rhmi| rhmi.status.as_ref())
            .is_some_and(|status| {
                status.preflight_status == PreflightStatus::Fail
                    && status.preflight_message.contains(&fragment)
            })
    }
}

/// `status.stages[stage].phase` equals `phase`
pub fn stage_phase(stage: StageName, phase: StatusPhase) -> impl Condition<RHMI> {
    move |obj: Option<&RHMI>| {
        obj.and_then(|rhmi| rhmi.status.as_ref())
            .and_then(|status| status.stages.get(&stage))
            .is_some_and(|s| s.phase == phase)
    }
}
