use std::fmt::Debug;
use std::sync::Arc;
use std::sync::Weak;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::ListenerId;
use super::ListenerSet;
use super::ReactiveWatch;
use super::WatchHandler;
use super::WatchKind;
use super::WatchSnapshot;
use crate::config::BackoffPolicy;
use crate::metrics::UPDATE_COMMITS;
use crate::metrics::UPDATE_CONFLICTS;
use crate::store::create_if_absent;
use crate::utils::codec;
use crate::CoordinationStore;
use crate::CreateMode;
use crate::NotFoundError;
use crate::Result;
use crate::StoreError;

/// Types that can be stored in a [`StructuredRecord`].
pub trait RecordValue: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {}

impl<T> RecordValue for T where T: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {}

struct RecordInner<T: RecordValue> {
    store: Arc<dyn CoordinationStore>,
    path: String,
    /// Metric label naming the kind of record
    kind: &'static str,
    retry: BackoffPolicy,
    cached: ArcSwap<Versioned<T>>,
    listeners: ListenerSet<T>,
}

struct Versioned<T> {
    value: Arc<T>,
    version: i32,
}

impl<T: RecordValue> RecordInner<T> {
    /// Caches `value` unless a newer version was already observed.
    fn remember(
        &self,
        value: T,
        version: i32,
    ) {
        let value = Arc::new(value);
        self.cached.rcu(|current| {
            if current.version > version {
                current.clone()
            } else {
                Arc::new(Versioned {
                    value: value.clone(),
                    version,
                })
            }
        });
    }
}

struct RecordWatchHandler<T: RecordValue> {
    inner: Weak<RecordInner<T>>,
}

#[async_trait]
impl<T: RecordValue> WatchHandler for RecordWatchHandler<T> {
    async fn on_change(
        &self,
        snapshot: WatchSnapshot,
    ) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        // A deleted record keeps its last value; the owning entity is going away
        let WatchSnapshot::Data(Some((bytes, stat))) = snapshot else {
            return;
        };
        match codec::decode::<T>(&bytes) {
            Ok(value) => {
                inner.remember(value.clone(), stat.version);
                inner.listeners.notify(&value);
            }
            Err(e) => warn!(path = %inner.path, "ignoring undecodable record: {:?}", e),
        }
    }
}

/// A serialized struct at one path with optimistic read-transform-write updates.
///
/// Updates always start from a fresh read, never from the cache, and are retried on
/// version conflicts. The cache is refreshed by a [`ReactiveWatch`].
pub struct StructuredRecord<T: RecordValue> {
    inner: Arc<RecordInner<T>>,
    watch: ReactiveWatch,
}

impl<T: RecordValue> Debug for StructuredRecord<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StructuredRecord")
            .field("path", &self.inner.path)
            .field("value", &self.inner.cached.load().value)
            .finish()
    }
}

impl<T: RecordValue> StructuredRecord<T> {
    /// Seeds `initial` if the path does not exist yet, then loads whatever is stored.
    ///
    /// Concurrent callers race on the create; the loser adopts the winner's value.
    pub async fn create_or_load(
        store: Arc<dyn CoordinationStore>,
        path: impl Into<String>,
        kind: &'static str,
        initial: &T,
        retry: BackoffPolicy,
    ) -> Result<Self> {
        let path = path.into();
        if create_if_absent(
            store.as_ref(),
            &path,
            codec::encode(initial)?,
            CreateMode::Persistent,
        )
        .await?
        {
            debug!(%path, "record seeded");
        }
        Self::load(store, path, kind, retry).await
    }

    /// Loads an existing record. Fails with not-found when the path is missing.
    pub async fn load(
        store: Arc<dyn CoordinationStore>,
        path: impl Into<String>,
        kind: &'static str,
        retry: BackoffPolicy,
    ) -> Result<Self> {
        let path = path.into();
        let (initial, version) = read_value::<T>(store.as_ref(), &path).await?;
        let inner = Arc::new(RecordInner {
            store: store.clone(),
            path: path.clone(),
            kind,
            retry,
            cached: ArcSwap::from_pointee(Versioned {
                value: Arc::new(initial),
                version,
            }),
            listeners: ListenerSet::new(),
        });
        let handler = Arc::new(RecordWatchHandler {
            inner: Arc::downgrade(&inner),
        });

        let (watch, snapshot) = ReactiveWatch::arm(store, path.as_str(), WatchKind::Data, handler).await?;
        match snapshot {
            WatchSnapshot::Data(Some((bytes, stat))) => {
                inner.remember(codec::decode(&bytes)?, stat.version);
            }
            _ => return Err(NotFoundError::Node(path).into()),
        }

        Ok(Self { inner, watch })
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Last observed value.
    pub fn get(&self) -> Arc<T> {
        self.inner.cached.load().value.clone()
    }

    /// Reads the persisted value, bypassing the cache.
    pub async fn fetch(&self) -> Result<T> {
        let (value, version) = read_value::<T>(self.inner.store.as_ref(), &self.inner.path).await?;
        self.inner.remember(value.clone(), version);
        Ok(value)
    }

    /// Applies `transform` to the freshly read value and writes it back, retrying on
    /// concurrent modification. Returns the committed value.
    ///
    /// `transform` may run several times and must not depend on state captured before
    /// the call.
    pub async fn update<F>(
        &self,
        transform: F,
    ) -> Result<T>
    where
        F: Fn(&mut T) + Send + Sync,
    {
        self.try_update(|value| {
            transform(value);
            Ok(())
        })
        .await
    }

    /// Like [`update`](Self::update), but the transform may abort the whole update
    /// with an error. Nothing is written in that case.
    pub async fn try_update<F>(
        &self,
        transform: F,
    ) -> Result<T>
    where
        F: Fn(&mut T) -> Result<()> + Send + Sync,
    {
        let store = self.inner.store.as_ref();
        let path = self.inner.path.as_str();
        let mut attempts = 0;
        loop {
            let (bytes, stat) = match store.get_data(path, None).await {
                Ok(found) => found,
                Err(StoreError::NoNode(_)) => return Err(NotFoundError::Node(path.to_string()).into()),
                Err(e) => return Err(e.into()),
            };
            let mut value: T = codec::decode(&bytes)?;
            transform(&mut value)?;

            match store.set_data(path, codec::encode(&value)?, Some(stat.version)).await {
                Ok(committed) => {
                    UPDATE_COMMITS.with_label_values(&[self.inner.kind]).inc();
                    self.inner.remember(value.clone(), committed.version);
                    return Ok(value);
                }
                Err(e @ StoreError::BadVersion { .. }) => {
                    attempts += 1;
                    UPDATE_CONFLICTS.with_label_values(&[self.inner.kind]).inc();
                    if !self.inner.retry.allows(attempts) {
                        warn!(%path, attempts, "giving up update after repeated conflicts");
                        return Err(e.into());
                    }
                    debug!(%path, attempts, "update conflict, retrying");
                    tokio::time::sleep(self.inner.retry.delay_for(attempts)).await;
                }
                Err(StoreError::NoNode(_)) => return Err(NotFoundError::Node(path.to_string()).into()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Registers a callback fired with each value the watch observes.
    pub fn add_listener(
        &self,
        listener: impl Fn(&T) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn close(&self) {
        self.watch.cancel();
    }
}

async fn read_value<T: RecordValue>(
    store: &dyn CoordinationStore,
    path: &str,
) -> Result<(T, i32)> {
    match store.get_data(path, None).await {
        Ok((bytes, stat)) => Ok((codec::decode(&bytes)?, stat.version)),
        Err(StoreError::NoNode(_)) => Err(NotFoundError::Node(path.to_string()).into()),
        Err(e) => Err(e.into()),
    }
}
