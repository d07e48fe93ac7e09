//! Coordinator settings.
//!
//! Values are layered, each layer overriding the previous one:
//! - built-in defaults
//! - an optional file named by `CONFIG_PATH`
//! - `RINGKEEPER__*` environment variables (`__` separates nested keys, e.g.
//!   `RINGKEEPER__PATHS__ROOT=/prod`)
//!
//! Loading never validates; [`CoordinatorConfig::validate`] does, and
//! [`Coordinator::connect`](crate::Coordinator::connect) calls it.
mod paths;
mod retry;
mod session;
mod versions;
pub use paths::*;
pub use retry::*;
pub use session::*;
pub use versions::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

pub(crate) const ENV_PREFIX: &str = "RINGKEEPER";

/// Everything a [`Coordinator`](crate::Coordinator) can be tuned with.
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct CoordinatorConfig {
    /// Layout of the persisted namespace
    #[serde(default)]
    pub paths: PathsConfig,
    /// Session handling and reconnect policy
    #[serde(default)]
    pub session: SessionConfig,
    /// Backoff applied between optimistic-write retries
    #[serde(default)]
    pub retry: BackoffPolicy,
    /// Domain version lifecycle policy
    #[serde(default)]
    pub versions: VersionPolicy,
}

impl Debug for CoordinatorConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("paths", &self.paths)
            .field("versions", &self.versions)
            .finish()
    }
}

fn env_overrides() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

impl CoordinatorConfig {
    /// Defaults, then `CONFIG_PATH` if set, then the environment. Unvalidated, so
    /// callers can still layer [`with_override_config`](Self::with_override_config).
    pub fn new() -> Result<Self> {
        let mut layers = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Ok(config_path) = env::var("CONFIG_PATH") {
            layers = layers.add_source(File::with_name(&config_path).required(true));
        }
        let merged = layers.add_source(env_overrides()).build()?;
        Ok(merged.try_deserialize()?)
    }

    /// Layers the file at `path` over this configuration. The environment is applied
    /// again on top, so it keeps the last word.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let merged = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_overrides())
            .build()?;
        Ok(merged.try_deserialize()?)
    }

    /// Checks every section and hands the configuration back when all pass.
    ///
    /// Fails on a relative or malformed root, colliding collection names, a zero
    /// session timeout or inverted backoff bounds.
    pub fn validate(self) -> Result<Self> {
        self.paths.validate()?;
        self.session.validate()?;
        self.retry.validate()?;
        Ok(self)
    }
}

pub(crate) fn invalid(message: String) -> Error {
    Error::Config(ConfigError::Message(message))
}
