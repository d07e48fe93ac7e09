//! Watched collections of entities.
//!
//! A [`WatchedCollection`] mirrors the children of one path as loaded entities. It lists
//! the children lazily on first access and then follows a children [`ReactiveWatch`].
//! A child is only loaded once its completion marker exists; until then it is tracked
//! as pending and a marker watch triggers a re-sync when it appears.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::await_or_signal;
use super::is_complete;
use super::is_reserved_name;
use super::ListenerId;
use super::ListenerSet;
use super::ReactiveWatch;
use super::WatchHandler;
use super::WatchKind;
use super::WatchSnapshot;
use crate::metrics::LOADED_ENTITIES;
use crate::store::children_or_empty;
use crate::store::delete_recursive;
use crate::store::join_path;
use crate::utils::async_task::spawn_task;
use crate::CoordinationStore;
use crate::Result;

/// An entity held by a [`WatchedCollection`].
pub trait CollectionEntity: Send + Sync + 'static {
    /// Stops the entity's watches. Called when it leaves the collection.
    fn close_watches(&self);
}

/// Builds an entity from a complete child node.
#[async_trait]
pub trait EntityLoader<E>: Send + Sync + 'static {
    /// Returns `None` when the child vanished or should be skipped.
    async fn load(
        &self,
        name: &str,
        path: &str,
    ) -> Result<Option<E>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    Added(String),
    Removed(String),
}

pub(super) struct CollectionInner<E: CollectionEntity> {
    store: Arc<dyn CoordinationStore>,
    path: String,
    /// Metric label naming the kind of entity
    kind: &'static str,
    loader: Arc<dyn EntityLoader<E>>,
    entities: RwLock<BTreeMap<String, Arc<E>>>,
    /// Children waiting for their completion marker, each with the token of its wait
    pub(super) pending: Mutex<HashMap<String, CancellationToken>>,
    sync_lock: tokio::sync::Mutex<()>,
    loaded: OnceCell<()>,
    watch: Mutex<Option<ReactiveWatch>>,
    listeners: ListenerSet<CollectionEvent>,
    pub(super) cancel: CancellationToken,
}

impl<E: CollectionEntity> CollectionInner<E> {
    async fn ensure_loaded(self: &Arc<Self>) -> Result<()> {
        self.loaded
            .get_or_try_init(|| async {
                let handler = Arc::new(CollectionWatchHandler {
                    inner: Arc::downgrade(self),
                });
                let (watch, snapshot) =
                    ReactiveWatch::arm(self.store.clone(), self.path.as_str(), WatchKind::Children, handler)
                        .await?;
                *self.watch.lock() = Some(watch);
                let names = match snapshot {
                    WatchSnapshot::Children(names) => names.unwrap_or_default(),
                    WatchSnapshot::Data(_) => Vec::new(),
                };
                self.sync(names).await?;
                debug!(path = %self.path, "collection loaded");
                Ok::<(), crate::Error>(())
            })
            .await?;
        Ok(())
    }

    /// Reconciles the cache with the listed child names.
    async fn sync(
        self: &Arc<Self>,
        names: Vec<String>,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        let _guard = self.sync_lock.lock().await;
        let names: BTreeSet<String> = names.into_iter().filter(|n| !is_reserved_name(n)).collect();

        let removed: Vec<(String, Arc<E>)> = {
            let mut entities = self.entities.write();
            let gone: Vec<String> = entities.keys().filter(|k| !names.contains(*k)).cloned().collect();
            gone.into_iter()
                .filter_map(|name| entities.remove(&name).map(|e| (name, e)))
                .collect()
        };
        self.pending.lock().retain(|name, wait| {
            let keep = names.contains(name);
            if !keep {
                wait.cancel();
            }
            keep
        });
        for (name, entity) in removed {
            entity.close_watches();
            debug!(path = %self.path, %name, "entity removed");
            self.listeners.notify(&CollectionEvent::Removed(name));
        }

        for name in names {
            if self.entities.read().contains_key(&name) {
                continue;
            }
            let child_path = join_path(&self.path, &name);
            if !is_complete(self.store.as_ref(), &child_path).await? {
                self.defer(&name, &child_path).await?;
                continue;
            }
            match self.loader.load(&name, &child_path).await {
                Ok(Some(entity)) => {
                    self.forget_pending(&name);
                    self.install(&name, entity);
                }
                Ok(None) => debug!(path = %child_path, "child skipped by loader"),
                Err(e) if e.is_not_found() => debug!(path = %child_path, "child vanished while loading"),
                Err(e) => return Err(e),
            }
        }

        LOADED_ENTITIES
            .with_label_values(&[self.kind])
            .set(self.entities.read().len() as i64);
        Ok(())
    }

    /// Installs a marker watch for an incomplete child, once per child.
    async fn defer(
        self: &Arc<Self>,
        name: &str,
        child_path: &str,
    ) -> Result<()> {
        let wait = {
            let mut pending = self.pending.lock();
            if pending.contains_key(name) {
                return Ok(());
            }
            let wait = self.cancel.child_token();
            pending.insert(name.to_string(), wait.clone());
            wait
        };
        debug!(path = %child_path, "child incomplete, deferring");
        let weak = Arc::downgrade(self);
        await_or_signal(
            self.store.clone(),
            child_path,
            wait,
            move || {
                if let Some(inner) = weak.upgrade() {
                    spawn_task("collection resync", move || inner.resync());
                }
            },
        )
        .await?;
        Ok(())
    }

    fn forget_pending(
        &self,
        name: &str,
    ) {
        if let Some(wait) = self.pending.lock().remove(name) {
            wait.cancel();
        }
    }

    /// Inserts `entity` unless one is already cached. Returns the cached instance.
    fn install(
        &self,
        name: &str,
        entity: E,
    ) -> Arc<E> {
        let existing = self.entities.read().get(name).cloned();
        if let Some(existing) = existing {
            // Lost to a concurrent load; the newcomer is discarded
            entity.close_watches();
            return existing;
        }
        let entity = Arc::new(entity);
        let winner = self
            .entities
            .write()
            .entry(name.to_string())
            .or_insert_with(|| entity.clone())
            .clone();
        if Arc::ptr_eq(&winner, &entity) {
            debug!(path = %self.path, %name, "entity added");
            self.listeners.notify(&CollectionEvent::Added(name.to_string()));
        } else {
            entity.close_watches();
        }
        winner
    }

    fn resync(self: Arc<Self>) -> BoxFuture<'static, Result<()>> {
        async move {
            let names = children_or_empty(self.store.as_ref(), &self.path).await?;
            self.sync(names).await
        }
        .boxed()
    }
}

struct CollectionWatchHandler<E: CollectionEntity> {
    inner: Weak<CollectionInner<E>>,
}

#[async_trait]
impl<E: CollectionEntity> WatchHandler for CollectionWatchHandler<E> {
    async fn on_change(
        &self,
        snapshot: WatchSnapshot,
    ) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let WatchSnapshot::Children(names) = snapshot else {
            return;
        };
        if let Err(e) = inner.sync(names.unwrap_or_default()).await {
            warn!(path = %inner.path, "collection sync failed: {:?}", e);
        }
    }
}

/// Name-to-entity mapping mirroring the children of one path.
///
/// Cloning yields another handle on the same cache.
pub struct WatchedCollection<E: CollectionEntity> {
    pub(super) inner: Arc<CollectionInner<E>>,
}

impl<E: CollectionEntity> Clone for WatchedCollection<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: CollectionEntity> Debug for WatchedCollection<E> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchedCollection")
            .field("path", &self.inner.path)
            .field("loaded", &self.inner.entities.read().len())
            .finish()
    }
}

/// Non-owning handle on a [`WatchedCollection`], held by entities that validate against
/// a collection they do not own.
pub struct WeakCollection<E: CollectionEntity> {
    inner: Weak<CollectionInner<E>>,
}

impl<E: CollectionEntity> Clone for WeakCollection<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: CollectionEntity> WeakCollection<E> {
    pub fn upgrade(&self) -> Option<WatchedCollection<E>> {
        self.inner.upgrade().map(|inner| WatchedCollection { inner })
    }
}

impl<E: CollectionEntity> WatchedCollection<E> {
    /// Creates the collection without touching the store; the first access lists it.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        path: impl Into<String>,
        kind: &'static str,
        loader: Arc<dyn EntityLoader<E>>,
    ) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                store,
                path: path.into(),
                kind,
                loader,
                entities: RwLock::new(BTreeMap::new()),
                pending: Mutex::new(HashMap::new()),
                sync_lock: tokio::sync::Mutex::new(()),
                loaded: OnceCell::new(),
                watch: Mutex::new(None),
                listeners: ListenerSet::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn downgrade(&self) -> WeakCollection<E> {
        WeakCollection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn child_path(
        &self,
        name: &str,
    ) -> String {
        join_path(&self.inner.path, name)
    }

    pub async fn get(
        &self,
        name: &str,
    ) -> Result<Option<Arc<E>>> {
        self.inner.ensure_loaded().await?;
        Ok(self.inner.entities.read().get(name).cloned())
    }

    /// All complete entities, ordered by name.
    pub async fn values(&self) -> Result<Vec<Arc<E>>> {
        self.inner.ensure_loaded().await?;
        Ok(self.inner.entities.read().values().cloned().collect())
    }

    /// Names paired with entities, ordered by name.
    pub async fn entries(&self) -> Result<Vec<(String, Arc<E>)>> {
        self.inner.ensure_loaded().await?;
        Ok(self
            .inner
            .entities
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.inner.ensure_loaded().await?;
        Ok(self.inner.entities.read().keys().cloned().collect())
    }

    pub async fn contains(
        &self,
        name: &str,
    ) -> Result<bool> {
        self.inner.ensure_loaded().await?;
        Ok(self.inner.entities.read().contains_key(name))
    }

    pub async fn len(&self) -> Result<usize> {
        self.inner.ensure_loaded().await?;
        Ok(self.inner.entities.read().len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Caches an entity the caller just constructed (and marked complete) in the store.
    ///
    /// If the watch already loaded the same name, the cached instance wins and is returned;
    /// `entity` is closed.
    pub async fn put(
        &self,
        name: &str,
        entity: E,
    ) -> Result<Arc<E>> {
        self.inner.ensure_loaded().await?;
        self.inner.forget_pending(name);
        Ok(self.inner.install(name, entity))
    }

    /// Deletes the child subtree and drops the cached entity. Returns whether anything
    /// was cached under `name` before the delete.
    pub async fn remove(
        &self,
        name: &str,
    ) -> Result<bool> {
        self.inner.ensure_loaded().await?;
        let existed = self.inner.entities.read().contains_key(name);
        delete_recursive(self.inner.store.as_ref(), &self.child_path(name)).await?;
        // The children watch may already have dropped it
        self.evict(name);
        Ok(existed)
    }

    /// Drops the cached entity without touching the store. A later sync reloads it if
    /// the child still exists.
    pub fn evict(
        &self,
        name: &str,
    ) -> bool {
        let removed = self.inner.entities.write().remove(name);
        match removed {
            Some(entity) => {
                entity.close_watches();
                self.inner.listeners.notify(&CollectionEvent::Removed(name.to_string()));
                true
            }
            None => false,
        }
    }

    /// Re-lists the children and reconciles the cache.
    pub async fn reload(&self) -> Result<()> {
        if self.inner.loaded.initialized() {
            self.inner.clone().resync().await
        } else {
            self.inner.ensure_loaded().await
        }
    }

    pub fn add_listener(
        &self,
        listener: impl Fn(&CollectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Stops all watches and closes every cached entity.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        if let Some(watch) = self.inner.watch.lock().take() {
            watch.cancel();
        }
        let entities = std::mem::take(&mut *self.inner.entities.write());
        for entity in entities.into_values() {
            entity.close_watches();
        }
        for (_, wait) in self.inner.pending.lock().drain() {
            wait.cancel();
        }
        info!(path = %self.inner.path, "collection closed");
    }
}
