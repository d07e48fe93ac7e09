use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::*;
use crate::store::read_if_exists;
use crate::test_utils::*;
use crate::CoordinationStore;
use crate::CreateMode;
use crate::MemoryStore;
use crate::Result;
use crate::SessionId;
use crate::SessionState;
use crate::Stat;
use crate::StoreResult;
use crate::Watcher;

struct Item {
    payload: String,
    closed: AtomicBool,
}

impl CollectionEntity for Item {
    fn close_watches(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct ItemLoader {
    store: Arc<dyn CoordinationStore>,
    loads: AtomicUsize,
}

#[async_trait]
impl EntityLoader<Item> for ItemLoader {
    async fn load(
        &self,
        _name: &str,
        path: &str,
    ) -> Result<Option<Item>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(read_if_exists(self.store.as_ref(), path, None).await?.map(|(data, _)| Item {
            payload: String::from_utf8_lossy(&data).into_owned(),
            closed: AtomicBool::new(false),
        }))
    }
}

fn collection(store: &Arc<MemoryStore>) -> (WatchedCollection<Item>, Arc<ItemLoader>) {
    let loader = Arc::new(ItemLoader {
        store: as_dyn(store),
        loads: AtomicUsize::new(0),
    });
    (
        WatchedCollection::new(as_dyn(store), "/items", "item", loader.clone()),
        loader,
    )
}

async fn write_complete_item(
    store: &dyn CoordinationStore,
    name: &str,
    payload: &str,
) {
    let path = format!("/items/{name}");
    put_node(store, &path, payload.as_bytes()).await;
    mark_complete(store, &path).await.unwrap();
}

fn item(payload: &str) -> Item {
    Item {
        payload: payload.to_string(),
        closed: AtomicBool::new(false),
    }
}

#[tokio::test]
async fn test_lazy_load_lists_complete_children_only() {
    let (_cluster, store) = memory_store();
    mkdir(store.as_ref(), "/items").await;
    write_complete_item(store.as_ref(), "a", "alpha").await;
    put_node(store.as_ref(), "/items/b", b"beta").await;
    let (items, loader) = collection(&store);

    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    assert_eq!(items.keys().await.unwrap(), vec!["a".to_string()]);
    assert_eq!(items.get("a").await.unwrap().unwrap().payload, "alpha");
    assert!(items.get("b").await.unwrap().is_none());
    assert!(!items.contains("b").await.unwrap());
    assert_eq!(items.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_missing_collection_path_is_empty() {
    let (_cluster, store) = memory_store();
    let (items, _) = collection(&store);

    assert!(items.is_empty().await.unwrap());
}

/// # Case 1: Incomplete entity becomes visible once its marker appears
///
/// ## Setup
/// - A child exists with every node except the completion marker
///
/// ## Validation criteria
/// - `get`/`values` hide it
/// - Creating the marker fires an `Added` event and makes `get` succeed without re-query
#[tokio::test]
async fn test_marker_creation_publishes_deferred_child() {
    let (cluster, store) = memory_store();
    let writer = cluster.connect();
    mkdir(store.as_ref(), "/items").await;
    put_node(writer.as_ref(), "/items/late", b"payload").await;
    let (items, _) = collection(&store);
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    items.add_listener(move |e| events_clone.lock().push(e.clone()));

    assert!(items.values().await.unwrap().is_empty());

    mark_complete(writer.as_ref(), "/items/late").await.unwrap();

    assert!(wait_until(|| events.lock().contains(&CollectionEvent::Added("late".to_string()))).await);
    assert_eq!(items.get("late").await.unwrap().unwrap().payload, "payload");
}

#[tokio::test]
async fn test_remote_add_and_remove_are_followed() {
    let (cluster, store) = memory_store();
    let writer = cluster.connect();
    mkdir(store.as_ref(), "/items").await;
    let (items, _) = collection(&store);
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    items.add_listener(move |e| events_clone.lock().push(e.clone()));
    assert!(items.is_empty().await.unwrap());

    write_complete_item(writer.as_ref(), "x", "1").await;
    assert!(wait_until(|| events.lock().len() == 1).await);
    let x = items.get("x").await.unwrap().unwrap();

    crate::delete_recursive(writer.as_ref(), "/items/x").await.unwrap();
    assert!(wait_until(|| events.lock().len() == 2).await);

    assert_eq!(
        *events.lock(),
        vec![
            CollectionEvent::Added("x".to_string()),
            CollectionEvent::Removed("x".to_string()),
        ]
    );
    assert!(x.closed.load(Ordering::SeqCst));
    assert!(items.get("x").await.unwrap().is_none());
}

#[tokio::test]
async fn test_reserved_children_are_never_loaded() {
    let (_cluster, store) = memory_store();
    mkdir(store.as_ref(), "/items").await;
    mark_complete(store.as_ref(), "/items").await.unwrap();
    put_node(store.as_ref(), "/items/.lock", b"").await;
    let (items, loader) = collection(&store);

    assert!(items.is_empty().await.unwrap());
    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_put_returns_existing_instance() {
    let (_cluster, store) = memory_store();
    mkdir(store.as_ref(), "/items").await;
    write_complete_item(store.as_ref(), "a", "loaded").await;
    let (items, _) = collection(&store);
    let loaded = items.get("a").await.unwrap().unwrap();

    let returned = items.put("a", item("fresh")).await.unwrap();

    assert!(Arc::ptr_eq(&returned, &loaded));
    assert_eq!(returned.payload, "loaded");
    assert!(!loaded.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_put_caches_new_entity_and_notifies() {
    let (_cluster, store) = memory_store();
    mkdir(store.as_ref(), "/items").await;
    let (items, _) = collection(&store);
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    items.add_listener(move |e| events_clone.lock().push(e.clone()));
    assert!(items.is_empty().await.unwrap());

    write_complete_item(store.as_ref(), "n", "new").await;
    let put = items.put("n", item("new")).await.unwrap();

    assert_eq!(put.payload, "new");
    assert!(items.contains("n").await.unwrap());
    // The watch-driven sync must not announce the same entity twice
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(*events.lock(), vec![CollectionEvent::Added("n".to_string())]);
}

#[tokio::test]
async fn test_remove_deletes_subtree_and_closes_entity() {
    let (cluster, store) = memory_store();
    mkdir(store.as_ref(), "/items").await;
    write_complete_item(store.as_ref(), "gone", "g").await;
    put_node(store.as_ref(), "/items/gone/child", b"").await;
    let (items, _) = collection(&store);
    let entity = items.get("gone").await.unwrap().unwrap();

    assert!(items.remove("gone").await.unwrap());

    assert!(entity.closed.load(Ordering::SeqCst));
    assert!(!cluster.contains("/items/gone"));
    assert!(items.get("gone").await.unwrap().is_none());
    assert!(!items.remove("gone").await.unwrap());
}

/// Store whose deletes return only after watchers had time to react.
struct SlowDeleteStore {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl CoordinationStore for SlowDeleteStore {
    fn session_id(&self) -> SessionId {
        self.inner.session_id()
    }

    fn session_state(&self) -> SessionState {
        self.inner.session_state()
    }

    fn subscribe_session(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.inner.subscribe_session()
    }

    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> StoreResult<String> {
        self.inner.create(path, data, mode).await
    }

    async fn get_data(
        &self,
        path: &str,
        watcher: Option<Watcher>,
    ) -> StoreResult<(Vec<u8>, Stat)> {
        self.inner.get_data(path, watcher).await
    }

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<i32>,
    ) -> StoreResult<Stat> {
        self.inner.set_data(path, data, expected_version).await
    }

    async fn delete(
        &self,
        path: &str,
        expected_version: Option<i32>,
    ) -> StoreResult<()> {
        self.inner.delete(path, expected_version).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    async fn exists(
        &self,
        path: &str,
        watcher: Option<Watcher>,
    ) -> StoreResult<Option<Stat>> {
        self.inner.exists(path, watcher).await
    }

    async fn get_children(
        &self,
        path: &str,
        watcher: Option<Watcher>,
    ) -> StoreResult<Vec<String>> {
        self.inner.get_children(path, watcher).await
    }
}

/// # Case 1: Remove reports an existing child even when the watch evicts it first
///
/// ## Setup
/// Deletes are slow enough that the children watch syncs before `remove` finishes.
///
/// ## Validation criteria
/// 1. `remove` returns true for a cached child
/// 2. The entity is closed and gone from the cache
#[tokio::test]
async fn test_remove_reports_existence_when_watch_evicts_first() {
    let (cluster, store) = memory_store();
    mkdir(store.as_ref(), "/items").await;
    write_complete_item(store.as_ref(), "a", "alpha").await;
    let slow: Arc<dyn CoordinationStore> = Arc::new(SlowDeleteStore { inner: store.clone() });
    let loader = Arc::new(ItemLoader {
        store: slow.clone(),
        loads: AtomicUsize::new(0),
    });
    let items = WatchedCollection::new(slow, "/items", "item", loader);
    let entity = items.get("a").await.unwrap().unwrap();

    assert!(items.remove("a").await.unwrap());

    assert!(entity.closed.load(Ordering::SeqCst));
    assert!(!cluster.contains("/items/a"));
    assert!(!items.contains("a").await.unwrap());
}

/// # Case 2: Deleting an incomplete child ends its marker wait
///
/// ## Validation criteria
/// 1. The child is tracked as pending while its marker is missing
/// 2. Once the child is deleted, its wait is cancelled and it leaves the pending set
/// 3. The collection itself keeps following
#[tokio::test]
async fn test_deleted_incomplete_child_cancels_its_wait() {
    let (_cluster, store) = memory_store();
    mkdir(store.as_ref(), "/items").await;
    put_node(store.as_ref(), "/items/draft", b"d").await;
    let (items, _) = collection(&store);
    assert!(items.is_empty().await.unwrap());
    let wait = items.inner.pending.lock().get("draft").cloned().unwrap();
    assert!(!wait.is_cancelled());

    crate::delete_recursive(store.as_ref(), "/items/draft").await.unwrap();

    assert!(wait_until(|| wait.is_cancelled()).await);
    assert!(items.inner.pending.lock().is_empty());
    assert!(!items.inner.cancel.is_cancelled());
}

#[tokio::test]
async fn test_evict_then_reload_refreshes_entity() {
    let (_cluster, store) = memory_store();
    mkdir(store.as_ref(), "/items").await;
    write_complete_item(store.as_ref(), "a", "v1").await;
    let (items, loader) = collection(&store);
    assert_eq!(items.get("a").await.unwrap().unwrap().payload, "v1");

    store.set_data("/items/a", b"v2".to_vec(), None).await.unwrap();
    assert!(items.evict("a"));
    items.reload().await.unwrap();

    assert_eq!(items.get("a").await.unwrap().unwrap().payload, "v2");
    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_close_closes_entities_and_stops_following() {
    let (cluster, store) = memory_store();
    let writer = cluster.connect();
    mkdir(store.as_ref(), "/items").await;
    write_complete_item(store.as_ref(), "a", "1").await;
    let (items, loader) = collection(&store);
    let a = items.get("a").await.unwrap().unwrap();

    items.close();
    assert!(a.closed.load(Ordering::SeqCst));

    write_complete_item(writer.as_ref(), "b", "2").await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
}
