use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

/// Session handling for the coordination-service client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// Session timeout (milliseconds). `Coordinator::connect` stops retrying
    /// connection loss after this long.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Reload every top-level collection after the session reconnects.
    /// Watches that dropped notifications while disconnected re-arm either way.
    #[serde(default = "default_reload_on_reconnect")]
    pub reload_on_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout_ms(),
            reload_on_reconnect: default_reload_on_reconnect(),
        }
    }
}

impl SessionConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_timeout_ms == 0 {
            return Err(invalid("session.session_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

fn default_session_timeout_ms() -> u64 {
    30_000
}
fn default_reload_on_reconnect() -> bool {
    true
}
