use async_trait::async_trait;
use kube::Client;
use tracing::info;

use crate::controller::error::Result;
use crate::crd::{OBSERVABILITY_FINALIZER, RHMI, StatusPhase};
use crate::products::{BootstrapReconciler, ensure_namespace, remove_namespace};

/// Bootstrap stage: owns the observability namespace that every product
/// reports into.
pub struct ObservabilityBootstrap {
    client: Client,
    namespace: String,
}

impl ObservabilityBootstrap {
    pub fn new(client: Client, namespace_prefix: &str) -> Self {
        Self {
            client,
            namespace: format!("{namespace_prefix}observability"),
        }
    }
}

#[async_trait]
impl BootstrapReconciler for ObservabilityBootstrap {
    async fn reconcile(&self, installation: &mut RHMI) -> Result<StatusPhase> {
        if installation.add_finalizer(OBSERVABILITY_FINALIZER) {
            info!(namespace = %self.namespace, "added observability finalizer");
        }
        ensure_namespace(&self.client, &self.namespace).await?;
        Ok(StatusPhase::Completed)
    }

    async fn uninstall(&self, installation: &mut RHMI) -> Result<StatusPhase> {
        if !remove_namespace(&self.client, &self.namespace).await? {
            return Ok(StatusPhase::InProgress);
        }
        installation.remove_finalizer(OBSERVABILITY_FINALIZER);
        Ok(StatusPhase::Completed)
    }
}
