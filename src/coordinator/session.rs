use std::sync::atomic::Ordering;
use std::sync::Weak;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::CoordinatorInner;
use crate::metrics::SESSION_EVENTS;
use crate::Result;
use crate::SessionState;

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Connected => "connected",
        SessionState::Disconnected => "disconnected",
        SessionState::Expired => "expired",
    }
}

/// Follows the store session for the lifetime of a coordinator.
///
/// After a `Disconnected -> Connected` transition every top-level collection is
/// reloaded (when configured). Expiry is recorded and ends the task; it never fails
/// a caller by itself.
pub(super) async fn supervise_session(
    inner: Weak<CoordinatorInner>,
    mut session: watch::Receiver<SessionState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut last = *session.borrow_and_update();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("session supervisor stopped");
                return Ok(());
            }
            changed = session.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }

        let state = *session.borrow_and_update();
        if state == last {
            continue;
        }
        SESSION_EVENTS.with_label_values(&[state_label(state)]).inc();
        let Some(inner) = inner.upgrade() else {
            return Ok(());
        };

        match state {
            SessionState::Disconnected => warn!("coordination session disconnected"),
            SessionState::Connected => {
                info!("coordination session reconnected");
                if inner.ctx.config.session.reload_on_reconnect {
                    if let Err(e) = inner.reload().await {
                        warn!("reload after reconnect failed: {:?}", e);
                    }
                }
            }
            SessionState::Expired => {
                error!("coordination session expired; a new coordinator is required");
                inner.session_expired.store(true, Ordering::SeqCst);
                return Ok(());
            }
        }
        last = state;
    }
}
