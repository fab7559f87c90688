//! Install and uninstall stage graphs per installation type

use crate::controller::error::{Error, Result};
use crate::crd::{InstallationType, ProductName, StageName};

/// An ordered group of products. Every product in a stage must complete
/// before the next stage starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stage {
    pub name: StageName,
    pub products: Vec<ProductName>,
}

impl Stage {
    fn new(name: StageName, products: &[ProductName]) -> Self {
        Self {
            name,
            products: products.to_vec(),
        }
    }
}

/// Stage topology for one installation type
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageGraph {
    pub installation_type: InstallationType,
    install: Vec<Stage>,
    uninstall: Vec<Stage>,
}

impl StageGraph {
    /// Resolve the graph from `spec.type`
    pub fn for_type(installation_type: &str) -> Result<Self> {
        let parsed: InstallationType = installation_type.parse().map_err(|_| {
            Error::InstallationTypeError(format!(
                "unknown installation type: {installation_type}"
            ))
        })?;
        Ok(Self::new(parsed))
    }

    pub fn new(installation_type: InstallationType) -> Self {
        use ProductName::*;

        // Multitenant installs have no customer facing SSO
        let (install_products, uninstall_products): (&[ProductName], &[ProductName]) =
            match installation_type {
                InstallationType::ManagedApi => (
                    &[CloudResources, Rhsso, ThreeScale, RhssoUser, Marin3r, Grafana],
                    &[Rhsso, ThreeScale, RhssoUser, Marin3r, Grafana],
                ),
                InstallationType::MultitenantManagedApi => (
                    &[CloudResources, Rhsso, ThreeScale, Marin3r, Grafana],
                    &[Rhsso, ThreeScale, Marin3r, Grafana],
                ),
            };

        Self {
            installation_type,
            install: vec![
                Stage::new(StageName::Bootstrap, &[]),
                Stage::new(StageName::Installation, install_products),
            ],
            uninstall: vec![
                Stage::new(StageName::UninstallProducts, uninstall_products),
                Stage::new(StageName::UninstallCloudResources, &[CloudResources]),
                Stage::new(StageName::UninstallBootstrap, &[]),
            ],
        }
    }

    /// Build a graph from explicit stage lists
    pub fn from_stages(
        installation_type: InstallationType,
        install: Vec<Stage>,
        uninstall: Vec<Stage>,
    ) -> Self {
        Self {
            installation_type,
            install,
            uninstall,
        }
    }

    pub fn install_stages(&self) -> &[Stage] {
        &self.install
    }

    pub fn uninstall_stages(&self) -> &[Stage] {
        &self.uninstall
    }

    /// Products installed by this graph, in stage order
    pub fn install_products(&self) -> impl Iterator<Item = ProductName> + '_ {
        self.install
            .iter()
            .flat_map(|stage| stage.products.iter().copied())
    }
}
