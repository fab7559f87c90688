//! Persistence of installation changes
//!
//! A reconcile works on a local copy of the installation. Status and object
//! are written back separately, and only when they differ from what was read.

use std::collections::BTreeMap;

use tracing::debug;

use crate::controller::client::InstallationClient;
use crate::controller::error::Result;
use crate::crd::{RHMI, RHMISpec, RHMIStatus};

/// What an installation looked like when it was read
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    status: Option<RHMIStatus>,
    spec: RHMISpec,
    finalizers: Option<Vec<String>>,
    labels: Option<BTreeMap<String, String>>,
    annotations: Option<BTreeMap<String, String>>,
}

impl Snapshot {
    pub fn of(installation: &RHMI) -> Self {
        Self {
            status: installation.status.clone(),
            spec: installation.spec.clone(),
            finalizers: installation.metadata.finalizers.clone(),
            labels: installation.metadata.labels.clone(),
            annotations: installation.metadata.annotations.clone(),
        }
    }

    pub fn status_changed(&self, installation: &RHMI) -> bool {
        self.status != installation.status
    }

    /// Spec or the metadata the operator manages
    pub fn object_changed(&self, installation: &RHMI) -> bool {
        self.spec != installation.spec
            || normalized(&self.finalizers) != normalized(&installation.metadata.finalizers)
            || self.labels != installation.metadata.labels
            || self.annotations != installation.metadata.annotations
    }
}

fn normalized(finalizers: &Option<Vec<String>>) -> &[String] {
    finalizers.as_deref().unwrap_or_default()
}

/// Writes installations back to the API server
pub struct StatusManager<'a> {
    client: &'a dyn InstallationClient,
}

impl<'a> StatusManager<'a> {
    pub fn new(client: &'a dyn InstallationClient) -> Self {
        Self { client }
    }

    /// Write the status subresource
    pub async fn update_status(&self, installation: &mut RHMI) -> Result<()> {
        let updated = self.client.update_status(installation).await?;
        installation.metadata.resource_version = updated.metadata.resource_version;
        Ok(())
    }

    /// Write metadata and spec, keeping the local status
    pub async fn update_object(&self, installation: &mut RHMI) -> Result<()> {
        let updated = self.client.update_installation(installation).await?;
        installation.metadata = updated.metadata;
        Ok(())
    }

    /// Write status, then the object, each only if it changed since `before`
    pub async fn persist(&self, before: &Snapshot, installation: &mut RHMI) -> Result<()> {
        if before.status_changed(installation) {
            debug!("status changed, updating");
            self.update_status(installation).await?;
        }
        if before.object_changed(installation) {
            debug!("object changed, updating");
            self.update_object(installation).await?;
        }
        Ok(())
    }
}
