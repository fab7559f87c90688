//! Test fixtures and builders for RHMI installations and quota config maps
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let rhmi = create_test_installation("rhoam", "redhat-rhoam-operator");
//! let rhmi = InstallationBuilder::managed_api("rhoam", "redhat-rhoam-operator")
//!     .with_version("1.40.0")
//!     .deleting()
//!     .build();
//! ```

use std::collections::BTreeMap;

use integreatly_operator::crd::{
    AlertingEmailAddresses, DELETION_FINALIZER, PreflightStatus, RHMI, RHMISpec, RHMIStatus,
    StageName,
};
use integreatly_operator::quota::{CONFIG_MAP_DATA, CONFIG_MAP_NAME, DEFAULT_CONFIG};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ObjectMeta;

pub const TEST_NAMESPACE: &str = "redhat-rhoam-operator";
pub const TEST_PREFIX: &str = "redhat-rhoam-";

/// A managed-api installation that has passed preflight
pub fn create_test_installation(name: &str, namespace: &str) -> RHMI {
    InstallationBuilder::managed_api(name, namespace).build()
}

/// The quota config map seeded with the built-in tier table
pub fn create_quota_config_map(namespace: &str) -> ConfigMap {
    create_quota_config_map_with(namespace, DEFAULT_CONFIG)
}

pub fn create_quota_config_map_with(namespace: &str, data: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(CONFIG_MAP_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CONFIG_MAP_DATA.to_string(),
            data.to_string(),
        )])),
        ..Default::default()
    }
}

/// Builder for RHMI installations
pub struct InstallationBuilder {
    installation: RHMI,
}

impl InstallationBuilder {
    pub fn managed_api(name: &str, namespace: &str) -> Self {
        Self::of_type(name, namespace, "managed-api")
    }

    pub fn multitenant(name: &str, namespace: &str) -> Self {
        Self::of_type(name, namespace, "multitenant-managed-api")
    }

    fn of_type(name: &str, namespace: &str, type_: &str) -> Self {
        let mut installation = RHMI::new(
            name,
            RHMISpec {
                type_: type_.to_string(),
                namespace_prefix: TEST_PREFIX.to_string(),
                use_cluster_storage: "true".to_string(),
                pager_duty_secret: format!("{TEST_PREFIX}pagerduty"),
                smtp_secret: format!("{TEST_PREFIX}smtp"),
                dead_mans_snitch_secret: format!("{TEST_PREFIX}deadmanssnitch"),
                alerting_email_addresses: AlertingEmailAddresses {
                    business_unit: "bu@example.com".to_string(),
                    cssre: "sre@example.com".to_string(),
                },
                ..Default::default()
            },
        );
        installation.metadata.namespace = Some(namespace.to_string());
        installation.metadata.finalizers = Some(vec![DELETION_FINALIZER.to_string()]);
        installation.status = Some(RHMIStatus {
            preflight_status: PreflightStatus::Success,
            ..Default::default()
        });
        Self { installation }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.installation.status_mut().version = version.to_string();
        self
    }

    pub fn with_to_version(mut self, version: &str) -> Self {
        self.installation.status_mut().to_version = version.to_string();
        self
    }

    pub fn with_stage(mut self, stage: StageName) -> Self {
        self.installation.status_mut().stage = stage;
        self
    }

    pub fn with_quota(mut self, quota: &str) -> Self {
        self.installation.status_mut().quota = quota.to_string();
        self
    }

    pub fn with_finalizers(mut self, finalizers: &[&str]) -> Self {
        self.installation.metadata.finalizers =
            Some(finalizers.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn preflight(mut self, status: PreflightStatus) -> Self {
        self.installation.status_mut().preflight_status = status;
        self
    }

    /// Marks the installation as created `secs` seconds ago
    pub fn created_secs_ago(mut self, secs: i64) -> Self {
        let created = jiff::Timestamp::now() - jiff::SignedDuration::from_secs(secs);
        self.installation.metadata.creation_timestamp = Some(Time(created));
        self
    }

    pub fn deleting(mut self) -> Self {
        self.installation.metadata.deletion_timestamp = Some(Time(jiff::Timestamp::now()));
        self
    }

    pub fn build(self) -> RHMI {
        self.installation
    }
}
