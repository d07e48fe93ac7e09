//! Re-arming watch.
//!
//! A store watch fires once. [`ReactiveWatch`] turns it into a stream of snapshots:
//!
//! 1. wait for the one-shot notification
//! 2. read the path again with a fresh one-shot watch attached (re-arm)
//! 3. hand the fresh snapshot to the [`WatchHandler`]
//!
//! Step 2 always happens before step 3, so a change made while the handler runs is
//! never missed. The loop runs on one task per watch and awaits the handler, so handler
//! calls for one watch never overlap.
//!
//! # Session policy
//! A notification that arrives while the session is not connected is dropped and the
//! watch parks. Once the session is connected again the watch re-arms and delivers one
//! fresh snapshot, so holders reload after a reconnect instead of staying stale. An
//! expired session stops the watch for good.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::metrics::DROPPED_NOTIFICATIONS;
use crate::metrics::WATCH_NOTIFICATIONS;
use crate::CoordinationStore;
use crate::EventType;
use crate::Result;
use crate::SessionState;
use crate::Stat;
use crate::StoreError;
use crate::WatchedEvent;

/// Pause before re-arming after a failed read or a discarded registration.
const REARM_RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// Node data and existence
    Data,
    /// Child list
    Children,
}

impl WatchKind {
    fn label(&self) -> &'static str {
        match self {
            WatchKind::Data => "data",
            WatchKind::Children => "children",
        }
    }
}

/// State of the watched path as read while re-arming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSnapshot {
    /// `None` when the node does not exist
    Data(Option<(Vec<u8>, Stat)>),
    /// Sorted child names, `None` when the node does not exist
    Children(Option<Vec<String>>),
}

#[async_trait]
pub trait WatchHandler: Send + Sync + 'static {
    async fn on_change(
        &self,
        snapshot: WatchSnapshot,
    );
}

/// Handle to a running re-arming watch. Dropping it cancels the watch.
pub struct ReactiveWatch {
    path: String,
    kind: WatchKind,
    cancel: CancellationToken,
}

impl Debug for ReactiveWatch {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ReactiveWatch")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ReactiveWatch {
    /// Installs the watch and returns the snapshot read while installing it.
    ///
    /// The handler is not called for the initial snapshot.
    pub async fn arm(
        store: Arc<dyn CoordinationStore>,
        path: impl Into<String>,
        kind: WatchKind,
        handler: Arc<dyn WatchHandler>,
    ) -> Result<(Self, WatchSnapshot)> {
        let path = path.into();
        let (snapshot, rx) = read_snapshot(store.as_ref(), &path, kind).await?;
        let cancel = CancellationToken::new();

        trace!(%path, ?kind, "watch armed");
        tokio::spawn(run(store, path.clone(), kind, handler, rx, cancel.clone()));

        Ok((Self { path, kind, cancel }, snapshot))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> WatchKind {
        self.kind
    }

    /// Stops re-arming and handler invocation. Idempotent.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(path = %self.path, kind = ?self.kind, "watch cancelled");
            self.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ReactiveWatch {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run(
    store: Arc<dyn CoordinationStore>,
    path: String,
    kind: WatchKind,
    handler: Arc<dyn WatchHandler>,
    mut rx: oneshot::Receiver<WatchedEvent>,
    cancel: CancellationToken,
) {
    let mut session = store.subscribe_session();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = &mut rx => event,
        };

        let usable = match &event {
            Ok(event) => {
                event.event_type != EventType::Session
                    && store.session_state() == SessionState::Connected
            }
            // The store discarded the registration without an event
            Err(_) => false,
        };
        if !usable {
            DROPPED_NOTIFICATIONS.with_label_values(&[kind.label()]).inc();
            debug!(%path, ?event, "notification dropped while session not connected");
            if event.is_err() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(REARM_RETRY_DELAY) => {}
                }
            }
        }

        let next = loop {
            if !wait_connected(&mut session, &cancel).await {
                debug!(%path, "watch stopped");
                return;
            }
            match read_snapshot(store.as_ref(), &path, kind).await {
                Ok(next) => break next,
                Err(e) if e.is_session_expired() => {
                    debug!(%path, "watch stopped: session expired");
                    return;
                }
                Err(e) => {
                    warn!(%path, "failed to re-arm watch: {:?}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(REARM_RETRY_DELAY) => {}
                    }
                }
            }
        };
        let (snapshot, next_rx) = next;
        rx = next_rx;

        if cancel.is_cancelled() {
            return;
        }
        WATCH_NOTIFICATIONS.with_label_values(&[kind.label()]).inc();
        trace!(%path, ?kind, "watch fired");
        handler.on_change(snapshot).await;
    }
}

/// Waits until the session is connected. Returns `false` when the watch should stop.
async fn wait_connected(
    session: &mut watch::Receiver<SessionState>,
    cancel: &CancellationToken,
) -> bool {
    loop {
        match *session.borrow_and_update() {
            SessionState::Connected => return true,
            SessionState::Expired => return false,
            SessionState::Disconnected => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            changed = session.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

/// Reads the current state of `path` with a one-shot watch attached.
pub(crate) async fn read_snapshot(
    store: &dyn CoordinationStore,
    path: &str,
    kind: WatchKind,
) -> Result<(WatchSnapshot, oneshot::Receiver<WatchedEvent>)> {
    match kind {
        WatchKind::Data => {
            let (tx, rx) = oneshot::channel();
            if store.exists(path, Some(tx)).await?.is_none() {
                return Ok((WatchSnapshot::Data(None), rx));
            }
            // A delete racing this read is reported by the exists watch
            match store.get_data(path, None).await {
                Ok(found) => Ok((WatchSnapshot::Data(Some(found)), rx)),
                Err(StoreError::NoNode(_)) => Ok((WatchSnapshot::Data(None), rx)),
                Err(e) => Err(e.into()),
            }
        }
        WatchKind::Children => loop {
            let (tx, rx) = oneshot::channel();
            match store.get_children(path, Some(tx)).await {
                Ok(mut children) => {
                    children.sort();
                    return Ok((WatchSnapshot::Children(Some(children)), rx));
                }
                Err(StoreError::NoNode(_)) => {}
                Err(e) => return Err(e.into()),
            }
            // Missing node: watch for its creation instead
            let (tx, rx) = oneshot::channel();
            if store.exists(path, Some(tx)).await?.is_none() {
                return Ok((WatchSnapshot::Children(None), rx));
            }
        },
    }
}
