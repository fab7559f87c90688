//! Capacity tiers and workload sizing
//!
//! A tier maps workload names to replica counts and CPU/memory requests and
//! limits. The tier table lives in a config map so it can be changed without
//! a new operator build; `default_config.json` seeds it.

pub mod config;
pub mod configure;
pub mod quantity;

pub use config::{
    QuotaProductConfig, QuotaTier, Quota, RateLimitConfig, ResourceConfig, WorkloadResources,
    get_quota, parse_tiers,
};
pub use configure::{WorkloadTarget, merge_replicas, merge_resource_list};

use crate::crd::ProductName;

/// Name of the config map holding the tier table
pub const CONFIG_MAP_NAME: &str = "quota-config-managed-api-service";

/// Data key holding the JSON array of tiers
pub const CONFIG_MAP_DATA: &str = "quota-configs";

/// Built-in tier table used to seed the config map
pub const DEFAULT_CONFIG: &str = include_str!("default_config.json");

pub const BACKEND_LISTENER: &str = "backend_listener";
pub const BACKEND_WORKER: &str = "backend_worker";
pub const APICAST_PRODUCTION: &str = "apicast_production";
pub const APICAST_STAGING: &str = "apicast_staging";
pub const KEYCLOAK: &str = "rhssouser";
pub const RATE_LIMIT: &str = "ratelimit";
pub const GRAFANA: &str = "grafana";

/// Workloads sized by a tier, per product
pub const PRODUCT_WORKLOADS: [(ProductName, &[&str]); 4] = [
    (
        ProductName::ThreeScale,
        &[
            BACKEND_LISTENER,
            BACKEND_WORKER,
            APICAST_PRODUCTION,
            APICAST_STAGING,
        ],
    ),
    (ProductName::RhssoUser, &[KEYCLOAK]),
    (ProductName::Marin3r, &[RATE_LIMIT]),
    (ProductName::Grafana, &[GRAFANA]),
];
