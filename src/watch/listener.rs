use std::fmt::Debug;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned when registering a listener, used to remove it again.
pub type ListenerId = u64;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Per-entity subscription registry.
///
/// Listeners are invoked on the notifying task, outside the registry lock, so a
/// listener may add or remove listeners (including itself) without deadlocking.
pub struct ListenerSet<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E> Debug for ListenerSet<E> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ListenerSet").field("len", &self.len()).finish()
    }
}

impl<E> ListenerSet<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        listener: impl Fn(&E) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns whether a listener was registered under `id`.
    pub fn remove(
        &self,
        id: ListenerId,
    ) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(
        &self,
        event: &E,
    ) {
        let snapshot: Vec<Listener<E>> =
            self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(event);
        }
    }
}
