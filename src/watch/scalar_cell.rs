use std::fmt::Debug;
use std::sync::Arc;
use std::sync::Weak;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use tracing::warn;

use super::ListenerId;
use super::ListenerSet;
use super::ReactiveWatch;
use super::WatchHandler;
use super::WatchKind;
use super::WatchSnapshot;
use crate::store::create_if_absent;
use crate::store::delete_if_exists;
use crate::store::read_if_exists;
use crate::CoordinationStore;
use crate::CreateMode;
use crate::Result;
use crate::SerializationError;
use crate::StoreError;

/// A value that can live in a [`ScalarCell`].
///
/// Encodings are plain text so cells stay readable with generic store tooling.
pub trait CellValue: Clone + PartialEq + Debug + Send + Sync + 'static {
    fn encode(&self) -> Vec<u8>;

    fn decode(bytes: &[u8]) -> Result<Self>;
}

pub(crate) fn invalid_value(
    kind: &'static str,
    bytes: &[u8],
) -> crate::Error {
    SerializationError::InvalidValue {
        kind,
        value: String::from_utf8_lossy(bytes).into_owned(),
    }
    .into()
}

impl CellValue for String {
    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid_value("string", bytes))
    }
}

impl CellValue for Vec<u8> {
    fn encode(&self) -> Vec<u8> {
        self.clone()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl CellValue for bool {
    fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes {
            b"true" => Ok(true),
            b"false" => Ok(false),
            _ => Err(invalid_value("bool", bytes)),
        }
    }
}

macro_rules! numeric_cell_value {
    ($($ty:ty),*) => {
        $(
            impl CellValue for $ty {
                fn encode(&self) -> Vec<u8> {
                    self.to_string().into_bytes()
                }

                fn decode(bytes: &[u8]) -> Result<Self> {
                    std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|s| s.trim().parse().ok())
                        .ok_or_else(|| invalid_value(stringify!($ty), bytes))
                }
            }
        )*
    };
}

numeric_cell_value!(u32, u64, i64);

struct CellInner<V: CellValue> {
    store: Arc<dyn CoordinationStore>,
    path: String,
    ephemeral: bool,
    cached: ArcSwapOption<V>,
    /// Last value seen by the watch, used to detect confirmed changes
    observed: Mutex<Option<V>>,
    listeners: ListenerSet<Option<V>>,
}

impl<V: CellValue> CellInner<V> {
    fn decode_snapshot(
        path: &str,
        snapshot: &WatchSnapshot,
    ) -> Option<V> {
        match snapshot {
            WatchSnapshot::Data(Some((bytes, _))) => match V::decode(bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(%path, "ignoring undecodable cell value: {:?}", e);
                    None
                }
            },
            _ => None,
        }
    }
}

struct CellWatchHandler<V: CellValue> {
    inner: Weak<CellInner<V>>,
}

#[async_trait]
impl<V: CellValue> WatchHandler for CellWatchHandler<V> {
    async fn on_change(
        &self,
        snapshot: WatchSnapshot,
    ) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let value = CellInner::<V>::decode_snapshot(&inner.path, &snapshot);
        inner.cached.store(value.clone().map(Arc::new));

        let changed = {
            let mut observed = inner.observed.lock();
            if *observed == value {
                false
            } else {
                *observed = value.clone();
                true
            }
        };
        if changed {
            debug!(path = %inner.path, ?value, "cell changed");
            inner.listeners.notify(&value);
        }
    }
}

/// A typed single value stored at one path, kept current by a [`ReactiveWatch`].
///
/// Absence of the node is a meaningful state (`None`), e.g. an offline host.
pub struct ScalarCell<V: CellValue> {
    inner: Arc<CellInner<V>>,
    watch: ReactiveWatch,
}

impl<V: CellValue> Debug for ScalarCell<V> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ScalarCell")
            .field("path", &self.inner.path)
            .field("ephemeral", &self.inner.ephemeral)
            .field("value", &self.get())
            .finish()
    }
}

impl<V: CellValue> ScalarCell<V> {
    /// Opens a cell over `path`. The node need not exist; its parent must exist before
    /// the first [`set`](Self::set).
    ///
    /// An ephemeral cell creates its node in ephemeral mode, so the value disappears
    /// when the writing session ends.
    pub async fn open(
        store: Arc<dyn CoordinationStore>,
        path: impl Into<String>,
        ephemeral: bool,
    ) -> Result<Self> {
        let path = path.into();
        let inner = Arc::new(CellInner {
            store: store.clone(),
            path: path.clone(),
            ephemeral,
            cached: ArcSwapOption::empty(),
            observed: Mutex::new(None),
            listeners: ListenerSet::new(),
        });
        let handler = Arc::new(CellWatchHandler {
            inner: Arc::downgrade(&inner),
        });

        let (watch, snapshot) = ReactiveWatch::arm(store, path.as_str(), WatchKind::Data, handler).await?;
        let value = match &snapshot {
            WatchSnapshot::Data(Some((bytes, _))) => Some(V::decode(bytes)?),
            _ => None,
        };
        *inner.observed.lock() = value.clone();
        inner.cached.store(value.map(Arc::new));

        Ok(Self { inner, watch })
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn is_ephemeral(&self) -> bool {
        self.inner.ephemeral
    }

    /// Last observed value.
    pub fn get(&self) -> Option<V> {
        self.inner.cached.load_full().map(|v| (*v).clone())
    }

    pub fn get_or(
        &self,
        default: V,
    ) -> V {
        self.get().unwrap_or(default)
    }

    /// Reads the current value from the store, bypassing the cache.
    pub async fn fetch(&self) -> Result<Option<V>> {
        match read_if_exists(self.inner.store.as_ref(), &self.inner.path, None).await? {
            Some((bytes, _)) => Ok(Some(V::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes `value`, creating the node if needed. `None` deletes the node.
    pub async fn set(
        &self,
        value: Option<V>,
    ) -> Result<()> {
        let store = self.inner.store.as_ref();
        let path = self.inner.path.as_str();
        match &value {
            Some(v) => loop {
                match store.set_data(path, v.encode(), None).await {
                    Ok(_) => break,
                    Err(StoreError::NoNode(_)) => {}
                    Err(e) => return Err(e.into()),
                }
                match store.create(path, v.encode(), self.create_mode()).await {
                    Ok(_) => break,
                    // Lost a creation race; overwrite the winner
                    Err(StoreError::NodeExists(_)) => continue,
                    Err(e) => return Err(e.into()),
                }
            },
            None => {
                delete_if_exists(store, path).await?;
            }
        }
        self.inner.cached.store(value.map(Arc::new));
        Ok(())
    }

    /// Creates the node with `value` unless it exists. Returns whether this call created it.
    pub async fn create_if_absent(
        &self,
        value: V,
    ) -> Result<bool> {
        let created = create_if_absent(
            self.inner.store.as_ref(),
            &self.inner.path,
            value.encode(),
            self.create_mode(),
        )
        .await?;
        if created {
            self.inner.cached.store(Some(Arc::new(value)));
        }
        Ok(created)
    }

    /// Registers a callback fired with the new value whenever the watch confirms a change.
    pub fn add_listener(
        &self,
        listener: impl Fn(&Option<V>) + Send + Sync + 'static,
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

    fn create_mode(&self) -> CreateMode {
        if self.inner.ephemeral {
            CreateMode::Ephemeral
        } else {
            CreateMode::Persistent
        }
    }
}
