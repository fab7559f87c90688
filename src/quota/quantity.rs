//! Kubernetes resource quantity helpers
//!
//! Quantities in the quota config may be written as strings ("250m", "1Gi")
//! or as bare JSON numbers (0.25, 450). Both forms are normalised to
//! `Quantity` on the way in and compared numerically.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Deserializer};

use crate::controller::error::{Error, Result};

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";

const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ei", 1_152_921_504_606_846_976.0),
];

const DECIMAL_SUFFIXES: [(&str, f64); 9] = [
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a quantity string into its value in base units (cores or bytes)
pub fn parse_quantity(raw: &str) -> Result<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(Error::QuotaError("empty quantity".to_string()));
    }

    let (number, multiplier) = BINARY_SUFFIXES
        .iter()
        .chain(DECIMAL_SUFFIXES.iter())
        .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((s, 1.0));

    let value: f64 = number
        .parse()
        .map_err(|_| Error::QuotaError(format!("invalid quantity '{raw}'")))?;
    if !value.is_finite() {
        return Err(Error::QuotaError(format!("invalid quantity '{raw}'")));
    }

    Ok(value * multiplier)
}

/// Numeric comparison of two quantities. Unparseable values compare as zero.
pub fn compare(a: &Quantity, b: &Quantity) -> Ordering {
    let a = parse_quantity(&a.0).unwrap_or(0.0);
    let b = parse_quantity(&b.0).unwrap_or(0.0);
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

pub fn is_zero(q: &Quantity) -> bool {
    parse_quantity(&q.0).map(|v| v == 0.0).unwrap_or(true)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawQuantity> for Quantity {
    fn from(raw: RawQuantity) -> Self {
        match raw {
            RawQuantity::Text(s) => Quantity(s),
            RawQuantity::Number(n) => Quantity(n.to_string()),
        }
    }
}

/// Deserialize a resource list whose values may be strings or numbers
pub fn deserialize_resource_list<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, Quantity>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, RawQuantity>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, Quantity::from(v)))
        .collect())
}
