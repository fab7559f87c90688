//! Capacity tier lookup
//!
//! The quota config map holds a JSON array of tiers. Each tier carries a
//! rate limit and per-workload replica and resource settings. `get_quota`
//! selects a tier by its addon parameter and expands it into one
//! `QuotaProductConfig` per product.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};

use crate::controller::error::{Error, Result};
use crate::crd::ProductName;
use crate::quota::configure::WorkloadTarget;
use crate::quota::{CONFIG_MAP_DATA, PRODUCT_WORKLOADS, quantity};

/// Rate limit applied by the rate limiting product for a tier
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub requests_per_unit: u32,
    #[serde(default)]
    pub alert_limits: Vec<i64>,
}

/// Replica count and resource requirements for one workload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub resources: WorkloadResources,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadResources {
    #[serde(
        default,
        deserialize_with = "quantity::deserialize_resource_list",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub requests: BTreeMap<String, Quantity>,
    #[serde(
        default,
        deserialize_with = "quantity::deserialize_resource_list",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub limits: BTreeMap<String, Quantity>,
}

/// One entry of the quota config array
#[derive(Clone, Debug, Default, Deserialize)]
pub struct QuotaTier {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub param: String,
    #[serde(default, rename = "rate-limiting")]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceConfig>,
}

impl QuotaTier {
    fn validate(&self) -> Result<()> {
        for (workload, config) in &self.resources {
            let lists = [&config.resources.requests, &config.resources.limits];
            for (resource, value) in lists.into_iter().flatten() {
                quantity::parse_quantity(&value.0).map_err(|_| {
                    Error::QuotaError(format!(
                        "tier '{}' workload '{}' has invalid {} quantity '{}'",
                        self.name, workload, resource, value.0
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Parse the JSON array stored under the quota config map data key
pub fn parse_tiers(raw: &str) -> Result<Vec<QuotaTier>> {
    Ok(serde_json::from_str(raw)?)
}

#[derive(Clone, Debug, Default, PartialEq)]
struct QuotaInfo {
    name: String,
    is_updated: bool,
    rate_limit: RateLimitConfig,
}

/// A resolved capacity tier
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Quota {
    info: Arc<QuotaInfo>,
    product_configs: BTreeMap<ProductName, BTreeMap<String, ResourceConfig>>,
}

impl Quota {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// True when the tier was freshly selected and must be applied exactly
    pub fn is_updated(&self) -> bool {
        self.info.is_updated
    }

    /// Product configs handed out before this call keep the old flag
    pub fn set_is_updated(&mut self, is_updated: bool) {
        Arc::make_mut(&mut self.info).is_updated = is_updated;
    }

    pub fn rate_limit_config(&self) -> &RateLimitConfig {
        &self.info.rate_limit
    }

    /// Products that have an entry in the static workload map
    pub fn products(&self) -> impl Iterator<Item = &ProductName> {
        self.product_configs.keys()
    }

    /// The slice of this tier for one product.
    ///
    /// Products without workloads get an empty config that still reports
    /// the tier name and rate limit.
    pub fn product(&self, product: ProductName) -> QuotaProductConfig {
        QuotaProductConfig {
            product,
            resource_configs: self
                .product_configs
                .get(&product)
                .cloned()
                .unwrap_or_default(),
            quota: Arc::clone(&self.info),
        }
    }
}

/// Per-product view of a `Quota`
#[derive(Clone, Debug, PartialEq)]
pub struct QuotaProductConfig {
    product: ProductName,
    resource_configs: BTreeMap<String, ResourceConfig>,
    quota: Arc<QuotaInfo>,
}

impl QuotaProductConfig {
    pub fn product_name(&self) -> ProductName {
        self.product
    }

    pub fn resource_config(&self, workload: &str) -> Option<&ResourceConfig> {
        self.resource_configs.get(workload)
    }

    pub fn workloads(&self) -> impl Iterator<Item = &str> {
        self.resource_configs.keys().map(String::as_str)
    }

    pub fn replicas(&self, workload: &str) -> i32 {
        self.resource_configs
            .get(workload)
            .map(|c| c.replicas)
            .unwrap_or(0)
    }

    pub fn rate_limit_config(&self) -> &RateLimitConfig {
        &self.quota.rate_limit
    }

    pub fn active_quota(&self) -> &str {
        &self.quota.name
    }

    pub fn is_updated(&self) -> bool {
        self.quota.is_updated
    }

    /// Apply this product's replica and resource settings to a workload
    pub fn configure(&self, target: WorkloadTarget<'_>) -> Result<()> {
        target.apply(self)
    }
}

/// Select the tier whose `param` matches and expand it per product.
///
/// Every product in the static workload map gets an entry for each of its
/// workloads; workloads the tier does not mention get a zero config.
pub fn get_quota(quota_param: &str, config_map: &ConfigMap) -> Result<Quota> {
    let raw = config_map
        .data
        .as_ref()
        .and_then(|d| d.get(CONFIG_MAP_DATA))
        .ok_or_else(|| {
            Error::QuotaError(format!("quota config map has no '{CONFIG_MAP_DATA}' key"))
        })?;

    let tiers = parse_tiers(raw)?;
    let tier = tiers
        .into_iter()
        .find(|t| t.param == quota_param)
        .filter(|t| !t.name.is_empty())
        .ok_or_else(|| Error::QuotaNotFoundError(quota_param.to_string()))?;
    tier.validate()?;

    let product_configs = PRODUCT_WORKLOADS
        .iter()
        .map(|(product, workloads)| {
            let configs = workloads
                .iter()
                .map(|w| {
                    (
                        w.to_string(),
                        tier.resources.get(*w).cloned().unwrap_or_default(),
                    )
                })
                .collect();
            (*product, configs)
        })
        .collect();

    Ok(Quota {
        info: Arc::new(QuotaInfo {
            name: tier.name,
            is_updated: false,
            rate_limit: tier.rate_limit,
        }),
        product_configs,
    })
}
