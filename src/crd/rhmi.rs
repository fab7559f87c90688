use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// RHMI is the Schema for the rhmis API
///
/// A single RHMI object describes one managed API service installation.
/// Its status records the progress of every install stage and product.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "integreatly.org",
    version = "v1alpha1",
    kind = "RHMI",
    plural = "rhmis",
    shortname = "rhmi",
    namespaced,
    status = "RHMIStatus",
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Stage", "type":"string", "jsonPath":".status.stage"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Quota", "type":"string", "jsonPath":".status.quota"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RHMISpec {
    /// Installation type, e.g. "managed-api" or "multitenant-managed-api"
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub routing_subdomain: String,

    #[serde(default, rename = "masterURL", skip_serializing_if = "String::is_empty")]
    pub master_url: String,

    /// Prefix applied to every product namespace (e.g. "redhat-rhoam-")
    #[serde(default)]
    pub namespace_prefix: String,

    #[serde(default)]
    pub rebalance_pods: bool,

    #[serde(default)]
    pub self_signed_certs: bool,

    /// Must be "true" or "false"; anything else fails the preflight checks
    #[serde(default)]
    pub use_cluster_storage: String,

    /// Customer notification address
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alerting_email_address: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub priority_class_name: String,

    #[serde(default)]
    pub alerting_email_addresses: AlertingEmailAddresses,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alert_from_address: String,

    #[serde(default, rename = "APIServer", skip_serializing_if = "String::is_empty")]
    pub api_server: String,

    /// Name of a secret in the installation namespace holding SMTP details
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub smtp_secret: String,

    /// Name of a secret in the installation namespace holding the PagerDuty service key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pager_duty_secret: String,

    /// Name of a secret in the installation namespace holding the Dead Mans Snitch URL
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dead_mans_snitch_secret: String,
}

/// Alerting addresses copied from the operator environment
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertingEmailAddresses {
    #[serde(default)]
    pub business_unit: String,
    #[serde(default)]
    pub cssre: String,
}

/// Observed state of an installation
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RHMIStatus {
    #[serde(default)]
    pub stages: BTreeMap<StageName, StageStatus>,

    /// Stage currently being worked on, or "complete" once everything is installed
    #[serde(default)]
    pub stage: StageName,

    #[serde(default, skip_serializing_if = "PreflightStatus::is_in_progress")]
    pub preflight_status: PreflightStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub preflight_message: String,

    #[serde(default)]
    pub last_error: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_version: String,

    /// Name of the capacity tier currently applied
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quota: String,

    /// Name of the capacity tier being rolled out
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_quota: String,
}

/// Status of one stage
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageStatus {
    pub name: StageName,
    pub phase: StatusPhase,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub products: BTreeMap<ProductName, ProductStatus>,
}

/// Status of one product within a stage
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductStatus {
    pub name: ProductName,

    #[serde(default, rename = "operator", skip_serializing_if = "String::is_empty")]
    pub operator_version: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub host: String,

    #[serde(default, rename = "status")]
    pub phase: StatusPhase,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub uninstall: bool,
}

impl ProductStatus {
    pub fn new(name: ProductName) -> Self {
        Self {
            name,
            operator_version: String::new(),
            version: String::new(),
            host: String::new(),
            phase: StatusPhase::None,
            uninstall: false,
        }
    }
}

/// Phase reported by stages and products
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub enum StatusPhase {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "awaiting operator")]
    AwaitingOperator,
    #[serde(rename = "awaiting cloud resources")]
    AwaitingCloudResources,
    #[serde(rename = "creating components")]
    CreatingComponents,
    #[serde(rename = "awaiting components")]
    AwaitingComponents,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl StatusPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusPhase::None => "",
            StatusPhase::AwaitingOperator => "awaiting operator",
            StatusPhase::AwaitingCloudResources => "awaiting cloud resources",
            StatusPhase::CreatingComponents => "creating components",
            StatusPhase::AwaitingComponents => "awaiting components",
            StatusPhase::InProgress => "in progress",
            StatusPhase::Completed => "completed",
            StatusPhase::Failed => "failed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StatusPhase::Completed)
    }
}

impl std::fmt::Display for StatusPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names of install and uninstall stages plus the markers written to `status.stage`
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
pub enum StageName {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "Preflight Checks")]
    PreflightChecks,
    #[serde(rename = "bootstrap")]
    Bootstrap,
    #[serde(rename = "installation")]
    Installation,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "deletion")]
    Deletion,
    #[serde(rename = "uninstall - products")]
    UninstallProducts,
    #[serde(rename = "uninstall - cloud-resources")]
    UninstallCloudResources,
    #[serde(rename = "uninstall - bootstrap")]
    UninstallBootstrap,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::None => "",
            StageName::PreflightChecks => "Preflight Checks",
            StageName::Bootstrap => "bootstrap",
            StageName::Installation => "installation",
            StageName::Complete => "complete",
            StageName::Deletion => "deletion",
            StageName::UninstallProducts => "uninstall - products",
            StageName::UninstallCloudResources => "uninstall - cloud-resources",
            StageName::UninstallBootstrap => "uninstall - bootstrap",
        }
    }

    /// Bootstrap stages are run by the bootstrap reconciler rather than per product
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, StageName::Bootstrap | StageName::UninstallBootstrap)
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finalizer held on the installation until uninstall has cleaned up after itself
pub const DELETION_FINALIZER: &str = "configmaps/finalizer";

/// Previous spelling of `DELETION_FINALIZER`, migrated in place
pub const LEGACY_DELETION_FINALIZER: &str = "finalizer/configmaps";

/// Finalizer held on the installation until the bootstrap stage is uninstalled
pub const OBSERVABILITY_FINALIZER: &str = "integreatly.org/observability-cleanup";

/// Products managed by the installation
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
pub enum ProductName {
    #[serde(rename = "rhsso")]
    Rhsso,
    #[serde(rename = "rhssouser")]
    RhssoUser,
    #[serde(rename = "3scale")]
    ThreeScale,
    #[serde(rename = "cloud-resources")]
    CloudResources,
    #[serde(rename = "marin3r")]
    Marin3r,
    #[serde(rename = "grafana")]
    Grafana,
}

impl ProductName {
    pub const ALL: [ProductName; 6] = [
        ProductName::Rhsso,
        ProductName::RhssoUser,
        ProductName::ThreeScale,
        ProductName::CloudResources,
        ProductName::Marin3r,
        ProductName::Grafana,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductName::Rhsso => "rhsso",
            ProductName::RhssoUser => "rhssouser",
            ProductName::ThreeScale => "3scale",
            ProductName::CloudResources => "cloud-resources",
            ProductName::Marin3r => "marin3r",
            ProductName::Grafana => "grafana",
        }
    }

    /// Finalizer held on the installation until the product is uninstalled
    pub fn finalizer(&self) -> String {
        format!("integreatly.org/{}-cleanup", self.as_str())
    }
}

impl std::fmt::Display for ProductName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProductName::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown product: {s}"))
    }
}

/// Result of the preflight checks. The empty value means not yet run.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum PreflightStatus {
    #[default]
    #[serde(rename = "")]
    InProgress,
    #[serde(rename = "successful")]
    Success,
    #[serde(rename = "failed")]
    Fail,
}

impl PreflightStatus {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, PreflightStatus::InProgress)
    }

    /// Preflight runs when it has never passed or when it last failed
    pub fn needs_check(&self) -> bool {
        matches!(self, PreflightStatus::InProgress | PreflightStatus::Fail)
    }
}

impl std::fmt::Display for PreflightStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreflightStatus::InProgress => write!(f, ""),
            PreflightStatus::Success => write!(f, "successful"),
            PreflightStatus::Fail => write!(f, "failed"),
        }
    }
}

/// Supported installation bundles
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstallationType {
    ManagedApi,
    MultitenantManagedApi,
}

impl InstallationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallationType::ManagedApi => "managed-api",
            InstallationType::MultitenantManagedApi => "multitenant-managed-api",
        }
    }

    pub fn is_multitenant(&self) -> bool {
        matches!(self, InstallationType::MultitenantManagedApi)
    }
}

impl std::fmt::Display for InstallationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "managed-api" => Ok(InstallationType::ManagedApi),
            "multitenant-managed-api" => Ok(InstallationType::MultitenantManagedApi),
            other => Err(format!("invalid installation type: {other:?}")),
        }
    }
}

impl RHMI {
    /// Status, or an empty one if the object has never been reconciled
    pub fn status_or_default(&self) -> RHMIStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Mutable access to the status, creating it if absent
    pub fn status_mut(&mut self) -> &mut RHMIStatus {
        self.status.get_or_insert_with(RHMIStatus::default)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// Returns true if the finalizer was added
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers_mut().push(finalizer.to_string());
        true
    }

    /// Returns true if the finalizer was present
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers().len();
        self.finalizers_mut().retain(|f| f != finalizer);
        before != self.finalizers().len()
    }

    /// Last known status of a product in any stage, or a fresh one
    pub fn product_status(&self, product: ProductName) -> ProductStatus {
        self.status
            .as_ref()
            .and_then(|s| {
                s.stages
                    .values()
                    .find_map(|stage| stage.products.get(&product).cloned())
            })
            .unwrap_or_else(|| ProductStatus::new(product))
    }

    /// Whether the object was created more than `age` ago.
    ///
    /// Objects without a creation timestamp are treated as brand new.
    pub fn is_older_than(&self, age: Duration) -> bool {
        let Some(created) = self.metadata.creation_timestamp.as_ref() else {
            return false;
        };
        let Ok(age) = jiff::SignedDuration::try_from(age) else {
            return false;
        };
        jiff::Timestamp::now().duration_since(created.0) > age
    }
}
