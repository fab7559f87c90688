//! Dynamic watches on product custom resources
//!
//! Once a product reports Completed, the custom resources it lists as
//! watchable get a namespaced watch. Events on objects annotated with
//! `integreatly-namespace` / `integreatly-name` are routed back to the owning
//! installation through the controller's trigger channel.

use std::collections::HashMap;
use std::future;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::UnboundedSender;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::reflector::{self, ObjectRef, store::Writer};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::controller::error::{Error, Result};
use crate::crd::RHMI;

pub const NAMESPACE_ANNOTATION: &str = "integreatly-namespace";
pub const NAME_ANNOTATION: &str = "integreatly-name";

/// Bound on the wait for a new informer's initial list
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// One informer per kind per namespace
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InformerKey {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
}

impl InformerKey {
    pub fn new(gvk: &GroupVersionKind, namespace: &str) -> Self {
        Self {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            namespace: namespace.to_string(),
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

impl std::fmt::Display for InformerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}, Kind={} in {}",
            self.group, self.version, self.kind, self.namespace
        )
    }
}

/// The installation an object belongs to, from its annotations
pub fn owner_ref(obj: &DynamicObject) -> Option<ObjectRef<RHMI>> {
    let annotations = obj.metadata.annotations.as_ref()?;
    let namespace = annotations.get(NAMESPACE_ANNOTATION).filter(|v| !v.is_empty())?;
    let name = annotations.get(NAME_ANNOTATION).filter(|v| !v.is_empty())?;
    Some(ObjectRef::new(name).within(namespace))
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait WatchRegistry: Send + Sync {
    /// Make sure a watch exists for the kind in `namespace`.
    ///
    /// Returns `Ok(true)` once the watch is synced and `Ok(false)` for an
    /// earlier registration that has still not synced. Failing to start or
    /// sync a new watch is an error.
    async fn ensure_watch(&self, gvk: &GroupVersionKind, namespace: &str) -> Result<bool>;
}

/// A running watch
pub struct InformerHandle {
    ready: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl InformerHandle {
    pub fn new(ready: watch::Receiver<bool>, task: Option<JoinHandle<()>>) -> Self {
        Self { ready, task }
    }

    pub fn is_synced(&self) -> bool {
        *self.ready.borrow()
    }

    async fn wait_synced(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.ready.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        )
    }
}

impl Drop for InformerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Starts the watch behind an informer
pub trait WatchStarter: Send + Sync {
    fn start(&self, key: &InformerKey) -> Result<InformerHandle>;
}

/// Spawns a reflector backed watcher and forwards owner references
pub struct KubeWatchStarter {
    client: Client,
    trigger: UnboundedSender<ObjectRef<RHMI>>,
}

impl KubeWatchStarter {
    pub fn new(client: Client, trigger: UnboundedSender<ObjectRef<RHMI>>) -> Self {
        Self { client, trigger }
    }
}

impl WatchStarter for KubeWatchStarter {
    fn start(&self, key: &InformerKey) -> Result<InformerHandle> {
        let resource = ApiResource::from_gvk(&key.gvk());
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &key.namespace, &resource);

        let writer = Writer::<DynamicObject>::new(resource);
        let reader = writer.as_reader();
        let (ready_tx, ready_rx) = watch::channel(false);
        let trigger = self.trigger.clone();
        let label = key.to_string();

        let events = reflector::reflector(
            writer,
            watcher(api, watcher::Config::default()).default_backoff(),
        )
        .touched_objects();

        let task = tokio::spawn(async move {
            let ready = async move {
                if reader.wait_until_ready().await.is_ok() {
                    let _ = ready_tx.send(true);
                }
            };
            let forward = events.for_each(|event| {
                match event {
                    Ok(obj) => match owner_ref(&obj) {
                        Some(owner) => {
                            if trigger.unbounded_send(owner).is_err() {
                                debug!(informer = %label, "controller trigger channel closed");
                            }
                        }
                        None => debug!(informer = %label, "event without owner annotations dropped"),
                    },
                    Err(e) => warn!(informer = %label, error = %e, "watch error"),
                }
                future::ready(())
            });
            futures::join!(ready, forward);
        });

        Ok(InformerHandle::new(ready_rx, Some(task)))
    }
}

/// Tracks every informer registered by product stages.
///
/// Dropping the manager stops all watches.
pub struct CustomInformerManager<S = KubeWatchStarter> {
    starter: S,
    informers: Mutex<HashMap<InformerKey, InformerHandle>>,
    sync_timeout: Duration,
}

impl CustomInformerManager<KubeWatchStarter> {
    pub fn new(client: Client, trigger: UnboundedSender<ObjectRef<RHMI>>) -> Self {
        Self::with_starter(KubeWatchStarter::new(client, trigger), SYNC_TIMEOUT)
    }
}

impl<S: WatchStarter> CustomInformerManager<S> {
    pub fn with_starter(starter: S, sync_timeout: Duration) -> Self {
        Self {
            starter,
            informers: Mutex::new(HashMap::new()),
            sync_timeout,
        }
    }

    pub async fn len(&self) -> usize {
        self.informers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.informers.lock().await.is_empty()
    }
}

#[async_trait]
impl<S: WatchStarter> WatchRegistry for CustomInformerManager<S> {
    async fn ensure_watch(&self, gvk: &GroupVersionKind, namespace: &str) -> Result<bool> {
        let key = InformerKey::new(gvk, namespace);
        let mut informers = self.informers.lock().await;

        if let Some(existing) = informers.get(&key) {
            return Ok(existing.is_synced());
        }

        let mut handle = self.starter.start(&key)?;
        let synced = handle.wait_synced(self.sync_timeout).await;
        // Kept even when unsynced so the next pass reports it instead of starting another
        informers.insert(key.clone(), handle);

        if !synced {
            return Err(Error::InformerError(format!(
                "cache for {key} did not sync within {:?}",
                self.sync_timeout
            )));
        }
        info!(informer = %key, "watch registered");
        Ok(true)
    }
}
