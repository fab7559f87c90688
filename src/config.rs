//! Operator configuration loaded from environment variables

/// Namespace used when neither `WATCH_NAMESPACE` nor `POD_NAMESPACE` is set
pub const DEFAULT_WATCH_NAMESPACE: &str = "redhat-rhoam-operator";

pub const DEFAULT_INSTALLATION_NAME: &str = "rhoam";
pub const DEFAULT_INSTALLATION_TYPE: &str = "managed-api";
pub const DEFAULT_PRIORITY_CLASS_NAME: &str = "rhoam-pod-priority";
pub const DEFAULT_CLUSTER_PACKAGE: &str = "observability-operator";
pub const DEFAULT_SUBSCRIPTION: &str = "addon-managed-api-service";

/// Everything the controller reads from its environment.
///
/// Read once at startup and shared through the controller context.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Namespace holding the installation and its config maps
    pub watch_namespace: String,
    /// `INSTALLATION_CONFIG_MAP`; defaults to `<prefix>installation-config`
    pub installation_config_map: Option<String>,
    /// `ALERTING_EMAIL_ADDRESS`
    pub alerting_email_address: Option<String>,
    /// `BU_ALERTING_EMAIL_ADDRESS`
    pub bu_alerting_email_address: Option<String>,
    /// `INSTALLATION_TYPE`, used when creating the installation
    pub installation_type: String,
    /// `PRIORITY_CLASS_NAME`
    pub priority_class_name: String,
    /// `USE_CLUSTER_STORAGE`, copied verbatim into a new installation
    pub use_cluster_storage: String,
    /// `REBALANCE_PODS`; enabled unless set to something other than "true"
    pub rebalance_pods: bool,
    /// `MTR_RECONCILED`
    pub mtr_reconciled: Option<String>,
    /// `QUOTA`, the fallback capacity tier parameter
    pub quota: Option<String>,
    /// `ALERT_SMTP_FROM`, checked by preflight
    pub alert_smtp_from: Option<String>,
    /// `ANTI_AFFINITY_REQUIRED`, checked by preflight
    pub anti_affinity_required: Option<String>,
    /// Version this build installs
    pub target_version: String,
    /// ClusterPackage that must be available before installing
    pub cluster_package: String,
    /// Subscription removed at the end of an uninstall
    pub subscription: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl OperatorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let watch_namespace = get("WATCH_NAMESPACE")
            .or_else(|| get("POD_NAMESPACE"))
            .unwrap_or_else(|| DEFAULT_WATCH_NAMESPACE.to_string());

        Self {
            watch_namespace,
            installation_config_map: get("INSTALLATION_CONFIG_MAP"),
            alerting_email_address: get("ALERTING_EMAIL_ADDRESS"),
            bu_alerting_email_address: get("BU_ALERTING_EMAIL_ADDRESS"),
            installation_type: get("INSTALLATION_TYPE")
                .unwrap_or_else(|| DEFAULT_INSTALLATION_TYPE.to_string()),
            priority_class_name: get("PRIORITY_CLASS_NAME")
                .unwrap_or_else(|| DEFAULT_PRIORITY_CLASS_NAME.to_string()),
            use_cluster_storage: get("USE_CLUSTER_STORAGE").unwrap_or_default(),
            rebalance_pods: get("REBALANCE_PODS").is_none_or(|v| v == "true"),
            mtr_reconciled: get("MTR_RECONCILED"),
            quota: get("QUOTA"),
            alert_smtp_from: get("ALERT_SMTP_FROM"),
            // kept raw, preflight reports an unparseable value
            anti_affinity_required: lookup("ANTI_AFFINITY_REQUIRED"),
            target_version: get("OPERATOR_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            cluster_package: get("CLUSTER_PACKAGE_NAME")
                .unwrap_or_else(|| DEFAULT_CLUSTER_PACKAGE.to_string()),
            subscription: DEFAULT_SUBSCRIPTION.to_string(),
        }
    }

    /// Namespace prefix derived from the watch namespace: the first two
    /// dash separated segments, e.g. "redhat-rhoam-operator" gives "redhat-rhoam-"
    pub fn namespace_prefix(&self) -> String {
        let segments: Vec<&str> = self.watch_namespace.splitn(3, '-').collect();
        match segments.as_slice() {
            [first, second, ..] => format!("{first}-{second}-"),
            [only] => format!("{only}-"),
            [] => String::new(),
        }
    }

    /// Installation config map name for an installation with `prefix`
    pub fn installation_config_map_name(&self, prefix: &str) -> String {
        self.installation_config_map
            .clone()
            .unwrap_or_else(|| format!("{prefix}installation-config"))
    }
}
