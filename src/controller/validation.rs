//! Validation of the operator environment and installation spec
//!
//! These run as the first preflight checks:
//! - Environment variables the operator depends on
//! - `spec.useClusterStorage`

use crate::config::OperatorConfig;
use crate::controller::error::{Error, Result};
use crate::crd::RHMI;

pub const ANTI_AFFINITY_REQUIRED: &str = "ANTI_AFFINITY_REQUIRED";
pub const ALERT_SMTP_FROM: &str = "ALERT_SMTP_FROM";

/// Message recorded when `useClusterStorage` is neither true nor false
pub const USE_CLUSTER_STORAGE_MESSAGE: &str =
    "Spec.useClusterStorage must be set to either 'true' or 'false' to continue";

/// Validate the environment variables used by the operator
pub fn validate_env(config: &OperatorConfig) -> Result<()> {
    // Optional, but must be a bool when present
    if let Some(value) = &config.anti_affinity_required {
        parse_bool(value).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "env var {ANTI_AFFINITY_REQUIRED} is not a valid bool: {value:?}"
            ))
        })?;
    }

    if config.alert_smtp_from.is_none() {
        return Err(Error::InvalidConfig(format!(
            "env var {ALERT_SMTP_FROM} is required"
        )));
    }

    Ok(())
}

/// `spec.useClusterStorage` must be "true" or "false", in any case
pub fn validate_use_cluster_storage(installation: &RHMI) -> Result<()> {
    let value = installation.spec.use_cluster_storage.to_lowercase();
    if value != "true" && value != "false" {
        return Err(Error::PreflightError(USE_CLUSTER_STORAGE_MESSAGE.to_string()));
    }
    Ok(())
}

/// Boolean parsing with the spellings accepted by the rest of the platform
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
