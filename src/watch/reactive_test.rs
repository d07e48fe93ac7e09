use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::*;
use crate::test_utils::*;
use crate::CoordinationStore;
use crate::CreateMode;

fn data_of(snapshot: &WatchSnapshot) -> Option<Vec<u8>> {
    match snapshot {
        WatchSnapshot::Data(found) => found.as_ref().map(|(data, _)| data.clone()),
        other => panic!("expected data snapshot, got {:?}", other),
    }
}

#[tokio::test]
async fn test_arm_returns_initial_snapshot_without_calling_handler() {
    let (_cluster, store) = memory_store();
    put_node(store.as_ref(), "/n", b"v0").await;
    let (handler, mut rx) = RecordingHandler::new();

    let (_watch, snapshot) = ReactiveWatch::arm(as_dyn(&store), "/n", WatchKind::Data, handler)
        .await
        .unwrap();

    assert_eq!(data_of(&snapshot), Some(b"v0".to_vec()));
    assert_quiet(&mut rx).await;
}

/// # Case 1: Every change is observed, with a fresh value
#[tokio::test]
async fn test_data_watch_delivers_each_change() {
    let (_cluster, store) = memory_store();
    let (handler, mut rx) = RecordingHandler::new();
    let (_watch, snapshot) = ReactiveWatch::arm(as_dyn(&store), "/n", WatchKind::Data, handler)
        .await
        .unwrap();
    assert_eq!(snapshot, WatchSnapshot::Data(None));

    put_node(store.as_ref(), "/n", b"v1").await;
    assert_eq!(data_of(&recv_within(&mut rx).await), Some(b"v1".to_vec()));

    store.set_data("/n", b"v2".to_vec(), None).await.unwrap();
    assert_eq!(data_of(&recv_within(&mut rx).await), Some(b"v2".to_vec()));

    store.delete("/n", None).await.unwrap();
    assert_eq!(data_of(&recv_within(&mut rx).await), None);
}

#[tokio::test]
async fn test_children_watch_follows_creation_of_missing_parent() {
    let (_cluster, store) = memory_store();
    let (handler, mut rx) = RecordingHandler::new();
    let (_watch, snapshot) =
        ReactiveWatch::arm(as_dyn(&store), "/p", WatchKind::Children, handler)
            .await
            .unwrap();
    assert_eq!(snapshot, WatchSnapshot::Children(None));

    put_node(store.as_ref(), "/p", b"").await;
    assert_eq!(
        recv_within(&mut rx).await,
        WatchSnapshot::Children(Some(vec![]))
    );

    put_node(store.as_ref(), "/p/b", b"").await;
    put_node(store.as_ref(), "/p/a", b"").await;

    // Two structural changes may coalesce into one notification; the last one is complete
    let mut last = recv_within(&mut rx).await;
    while last != WatchSnapshot::Children(Some(vec!["a".to_string(), "b".to_string()])) {
        last = recv_within(&mut rx).await;
    }
}

/// Writes the watched node from inside the handler on the first call.
struct WriteBackHandler {
    store: Arc<dyn CoordinationStore>,
    calls: AtomicUsize,
    tx: mpsc::UnboundedSender<WatchSnapshot>,
}

#[async_trait]
impl WatchHandler for WriteBackHandler {
    async fn on_change(
        &self,
        snapshot: WatchSnapshot,
    ) {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.store.set_data("/n", b"from-handler".to_vec(), None).await.unwrap();
        }
        let _ = self.tx.send(snapshot);
    }
}

/// # Case 2: Re-arm happens before the handler runs
///
/// ## Validation criteria
/// - A write performed by the handler itself is observed by the next notification
#[tokio::test]
async fn test_rearm_precedes_handler() {
    let (_cluster, store) = memory_store();
    put_node(store.as_ref(), "/n", b"v0").await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = Arc::new(WriteBackHandler {
        store: as_dyn(&store),
        calls: AtomicUsize::new(0),
        tx,
    });
    let (_watch, _) = ReactiveWatch::arm(as_dyn(&store), "/n", WatchKind::Data, handler)
        .await
        .unwrap();

    store.set_data("/n", b"v1".to_vec(), None).await.unwrap();

    assert_eq!(data_of(&recv_within(&mut rx).await), Some(b"v1".to_vec()));
    assert_eq!(data_of(&recv_within(&mut rx).await), Some(b"from-handler".to_vec()));
}

struct SlowHandler {
    running: AtomicUsize,
    max_running: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl WatchHandler for SlowHandler {
    async fn on_change(
        &self,
        _snapshot: WatchSnapshot,
    ) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handler_invocations_never_overlap() {
    let (_cluster, store) = memory_store();
    put_node(store.as_ref(), "/n", b"").await;
    let handler = Arc::new(SlowHandler {
        running: AtomicUsize::new(0),
        max_running: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
    });
    let (_watch, _) = ReactiveWatch::arm(as_dyn(&store), "/n", WatchKind::Data, handler.clone())
        .await
        .unwrap();

    for i in 0..20u8 {
        store.set_data("/n", vec![i], None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(wait_until(|| handler.calls.load(Ordering::SeqCst) >= 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_stops_notifications() {
    let (_cluster, store) = memory_store();
    put_node(store.as_ref(), "/n", b"").await;
    let (handler, mut rx) = RecordingHandler::new();
    let (watch, _) = ReactiveWatch::arm(as_dyn(&store), "/n", WatchKind::Data, handler)
        .await
        .unwrap();

    watch.cancel();
    watch.cancel();
    assert!(watch.is_cancelled());

    store.set_data("/n", b"x".to_vec(), None).await.unwrap();
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_drop_cancels_watch() {
    let (_cluster, store) = memory_store();
    put_node(store.as_ref(), "/n", b"").await;
    let (handler, mut rx) = RecordingHandler::new();
    {
        let (_watch, _) = ReactiveWatch::arm(as_dyn(&store), "/n", WatchKind::Data, handler)
            .await
            .unwrap();
    }

    store.set_data("/n", b"x".to_vec(), None).await.unwrap();
    assert_quiet(&mut rx).await;
}

/// # Case 3: Reload on reconnect
///
/// ## Setup
/// - The session disconnects; another session changes the node meanwhile
///
/// ## Validation criteria
/// - Nothing is delivered while disconnected
/// - After reconnecting, exactly one fresh snapshot carries the missed change
#[tokio::test]
async fn test_reconnect_delivers_fresh_snapshot() {
    let (cluster, store) = memory_store();
    let writer = cluster.connect();
    put_node(store.as_ref(), "/n", b"before").await;
    let (handler, mut rx) = RecordingHandler::new();
    let (_watch, _) = ReactiveWatch::arm(as_dyn(&store), "/n", WatchKind::Data, handler)
        .await
        .unwrap();

    store.disconnect();
    writer.set_data("/n", b"while-away".to_vec(), None).await.unwrap();
    assert_quiet(&mut rx).await;

    store.reconnect();
    assert_eq!(data_of(&recv_within(&mut rx).await), Some(b"while-away".to_vec()));
    assert_quiet(&mut rx).await;

    // The watch keeps working afterwards
    writer.set_data("/n", b"after".to_vec(), None).await.unwrap();
    assert_eq!(data_of(&recv_within(&mut rx).await), Some(b"after".to_vec()));
}

#[tokio::test]
async fn test_session_expiry_stops_watch() {
    let (cluster, store) = memory_store();
    let writer = cluster.connect();
    put_node(writer.as_ref(), "/n", b"").await;
    let (handler, mut rx) = RecordingHandler::new();
    let (_watch, _) = ReactiveWatch::arm(as_dyn(&store), "/n", WatchKind::Data, handler)
        .await
        .unwrap();

    cluster.expire_session(store.session_id());
    writer.set_data("/n", b"x".to_vec(), None).await.unwrap();

    assert_quiet(&mut rx).await;
}
