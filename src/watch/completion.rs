//! Completion marker protocol.
//!
//! A multi-node entity is written child by child, then the [`COMPLETION_MARKER`] child
//! is created last. Readers treat the entity as absent until the marker exists, which
//! makes construction look atomic without multi-path transactions.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::constants::COMPLETION_MARKER;
use crate::store::join_path;
use crate::CoordinationStore;
use crate::CreateMode;
use crate::EventType;
use crate::Result;
use crate::SessionState;
use crate::StoreError;

pub fn marker_path(root: &str) -> String {
    join_path(root, COMPLETION_MARKER)
}

/// Whether `name` may be used for a real entity.
pub fn is_reserved_name(name: &str) -> bool {
    name == COMPLETION_MARKER || name.starts_with('.')
}

/// Publishes the entity rooted at `root`. Idempotent.
pub async fn mark_complete(
    store: &dyn CoordinationStore,
    root: &str,
) -> Result<()> {
    match store.create(&marker_path(root), Vec::new(), CreateMode::Persistent).await {
        Ok(_) | Err(StoreError::NodeExists(_)) => {
            trace!(%root, "marked complete");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn is_complete(
    store: &dyn CoordinationStore,
    root: &str,
) -> Result<bool> {
    Ok(store.exists(&marker_path(root), None).await?.is_some())
}

/// Invokes `callback` exactly once when the entity at `root` is complete.
///
/// When the marker already exists the callback runs before this returns and the result
/// is `true`. Otherwise a background watch waits for the marker and the result is
/// `false`. The wait ends without calling back if `cancel` fires or the session expires.
pub async fn await_or_signal<F>(
    store: Arc<dyn CoordinationStore>,
    root: &str,
    cancel: CancellationToken,
    callback: F,
) -> Result<bool>
where
    F: FnOnce() + Send + 'static,
{
    let marker = marker_path(root);
    let (tx, rx) = oneshot::channel();
    if store.exists(&marker, Some(tx)).await?.is_some() {
        callback();
        return Ok(true);
    }

    debug!(%root, "waiting for completion marker");
    tokio::spawn(async move {
        match wait_for_marker(store.as_ref(), &marker, rx, &cancel).await {
            Ok(true) => callback(),
            Ok(false) => trace!(%marker, "completion wait abandoned"),
            Err(e) => debug!(%marker, "completion wait failed: {:?}", e),
        }
    });
    Ok(false)
}

/// Waits until the entity at `root` is complete.
///
/// Used on construction paths that must not return before the entity is readable.
/// Wrap in `tokio::time::timeout` to bound the wait.
pub async fn wait_complete(
    store: &dyn CoordinationStore,
    root: &str,
) -> Result<()> {
    let marker = marker_path(root);
    let (tx, rx) = oneshot::channel();
    if store.exists(&marker, Some(tx)).await?.is_some() {
        return Ok(());
    }
    if wait_for_marker(store, &marker, rx, &CancellationToken::new()).await? {
        Ok(())
    } else {
        Err(StoreError::SessionExpired.into())
    }
}

/// Follows watch events on the marker until it exists. Returns `false` when the wait
/// was cancelled or the session expired.
async fn wait_for_marker(
    store: &dyn CoordinationStore,
    marker: &str,
    mut rx: oneshot::Receiver<crate::WatchedEvent>,
    cancel: &CancellationToken,
) -> Result<bool> {
    let mut session = store.subscribe_session();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            event = &mut rx => event,
        };
        if matches!(&event, Ok(e) if e.event_type == EventType::NodeCreated) {
            return Ok(true);
        }

        // Session event or discarded registration: wait for the session, then re-check
        loop {
            match *session.borrow_and_update() {
                SessionState::Connected => break,
                SessionState::Expired => return Ok(false),
                SessionState::Disconnected => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                changed = session.changed() => {
                    if changed.is_err() {
                        return Ok(false);
                    }
                }
            }
        }
        let (tx, next_rx) = oneshot::channel();
        match store.exists(marker, Some(tx)).await {
            Ok(Some(_)) => return Ok(true),
            Ok(None) => rx = next_rx,
            Err(StoreError::SessionExpired) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
    }
}
