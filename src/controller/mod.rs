pub mod bootstrap;
pub mod client;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod informer;
pub mod preflight;
pub mod reconciler;
pub mod stages;
pub mod status;
pub mod uninstall;
pub mod validation;

pub use client::{InstallationClient, KubeInstallationClient, PreflightObject};
pub use context::Context;
pub use error::{BackoffConfig, Error, MultiError, Result};
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
pub use executor::{StageExecutor, StageOutcome};
pub use informer::{CustomInformerManager, WatchRegistry};
pub use reconciler::{error_policy, reconcile};
pub use stages::{Stage, StageGraph};
pub use status::{Snapshot, StatusManager};
pub use validation::{validate_env, validate_use_cluster_storage};
