use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use kube::Resource;
use kube::runtime::events::EventType;

use crate::config::OperatorConfig;
use crate::controller::client::InstallationClient;
use crate::controller::events::{EventPublisher, NoopEventPublisher};
use crate::controller::informer::WatchRegistry;
use crate::crd::RHMI;
use crate::health::HealthState;
use crate::products::ProductFactory;

/// Shared context for the controller
pub struct Context {
    /// Kubernetes access for the control loop
    pub client: Arc<dyn InstallationClient>,
    /// Operator configuration
    pub config: OperatorConfig,
    /// Builds product and bootstrap reconcilers
    pub factory: Arc<dyn ProductFactory>,
    /// Watches registered for completed products
    pub informers: Arc<dyn WatchRegistry>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Health state and metrics
    pub health: Option<Arc<HealthState>>,
    /// Consecutive failures per installation, for error backoff
    failures: Mutex<HashMap<String, u32>>,
}

impl Context {
    pub fn new(
        client: Arc<dyn InstallationClient>,
        config: OperatorConfig,
        factory: Arc<dyn ProductFactory>,
        informers: Arc<dyn WatchRegistry>,
    ) -> Self {
        Self {
            client,
            config,
            factory,
            informers,
            events: Arc::new(NoopEventPublisher),
            health: None,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    /// Publish an event about the installation
    pub async fn publish_event(
        &self,
        installation: &RHMI,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let reference = installation.object_ref(&());
        self.events
            .publish(&reference, type_, reason, action, note)
            .await;
    }

    /// Count a failure and return how many came before it
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.to_string()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    pub fn reset_failures(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
