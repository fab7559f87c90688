//! Informer registration and reuse

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use integreatly_operator::controller::informer::{
    CustomInformerManager, InformerHandle, InformerKey, WatchRegistry, WatchStarter,
};
use integreatly_operator::controller::{Error, Result};
use kube::api::GroupVersionKind;
use tokio::sync::watch;

/// Starts fake watches that are either synced from the start or never sync
struct CountingStarter {
    starts: Arc<AtomicUsize>,
    synced: bool,
    fail: bool,
    // Senders are kept so the handles never observe a closed channel
    senders: Mutex<Vec<watch::Sender<bool>>>,
}

impl CountingStarter {
    fn new(synced: bool) -> Self {
        Self {
            starts: Arc::new(AtomicUsize::new(0)),
            synced,
            fail: false,
            senders: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(false)
        }
    }
}

impl WatchStarter for CountingStarter {
    fn start(&self, key: &InformerKey) -> Result<InformerHandle> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::InformerError(format!("failed to create informer for {key}")));
        }
        let (tx, rx) = watch::channel(self.synced);
        self.senders.lock().unwrap().push(tx);
        Ok(InformerHandle::new(rx, None))
    }
}

fn api_manager() -> GroupVersionKind {
    GroupVersionKind::gvk("apps.3scale.net", "v1alpha1", "APIManager")
}

fn keycloak() -> GroupVersionKind {
    GroupVersionKind::gvk("keycloak.org", "v1alpha1", "Keycloak")
}

#[tokio::test]
async fn test_same_kind_and_namespace_starts_one_watch() {
    let starter = CountingStarter::new(true);
    let starts = starter.starts.clone();
    let manager = CustomInformerManager::with_starter(starter, Duration::from_secs(10));

    for _ in 0..3 {
        assert!(
            manager
                .ensure_watch(&api_manager(), "redhat-rhoam-3scale")
                .await
                .unwrap()
        );
    }
    assert_eq!(manager.len().await, 1);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_distinct_keys_get_their_own_watch() {
    let manager =
        CustomInformerManager::with_starter(CountingStarter::new(true), Duration::from_secs(10));

    manager
        .ensure_watch(&api_manager(), "redhat-rhoam-3scale")
        .await
        .unwrap();
    manager
        .ensure_watch(&api_manager(), "sandbox-rhoam-3scale")
        .await
        .unwrap();
    manager
        .ensure_watch(&keycloak(), "redhat-rhoam-user-sso")
        .await
        .unwrap();
    assert_eq!(manager.len().await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_unsynced_watch_is_reported_then_reused() {
    let starter = CountingStarter::new(false);
    let starts = starter.starts.clone();
    let manager = CustomInformerManager::with_starter(starter, Duration::from_secs(10));

    let err = manager
        .ensure_watch(&api_manager(), "redhat-rhoam-3scale")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InformerError(_)));

    // Kept, not restarted
    let synced = manager
        .ensure_watch(&api_manager(), "redhat-rhoam-3scale")
        .await
        .unwrap();
    assert!(!synced);
    assert_eq!(manager.len().await, 1);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_start_is_not_recorded() {
    let manager =
        CustomInformerManager::with_starter(CountingStarter::failing(), Duration::from_secs(10));

    assert!(
        manager
            .ensure_watch(&api_manager(), "redhat-rhoam-3scale")
            .await
            .is_err()
    );
    assert!(manager.is_empty().await);
}
