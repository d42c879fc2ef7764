//! Per-browser viewer sessions.
//!
//! Each session owns one [`Viewer`] behind its own mutex. The store lock is
//! only held to look a session up, and handlers drop the viewer lock while a
//! round is in flight, so one slow store never stalls another session.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use tcv_merge::Viewer;

pub type SharedViewer = Arc<Mutex<Viewer>>;

#[derive(Default)]
struct Sessions {
    viewers: HashMap<Uuid, SharedViewer>,
    /// Creation order, oldest first.
    order: VecDeque<Uuid>,
}

pub struct SessionStore {
    inner: RwLock<Sessions>,
    capacity: usize,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Sessions::default()),
            capacity: capacity.max(1),
        }
    }

    /// Register a viewer, evicting the oldest sessions past capacity.
    pub async fn insert(&self, viewer: Viewer) -> (Uuid, SharedViewer) {
        let id = Uuid::new_v4();
        let shared = Arc::new(Mutex::new(viewer));

        let mut inner = self.inner.write().await;
        inner.viewers.insert(id, shared.clone());
        inner.order.push_back(id);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.viewers.remove(&oldest);
                tracing::debug!("Evicted session {}", oldest);
            }
        }

        (id, shared)
    }

    pub async fn get(&self, id: &Uuid) -> Option<SharedViewer> {
        self.inner.read().await.viewers.get(id).cloned()
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        let mut inner = self.inner.write().await;
        inner.order.retain(|s| s != id);
        inner.viewers.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.viewers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcv_core::ViewerSettings;

    fn viewer() -> Viewer {
        Viewer::new(Vec::new(), &ViewerSettings::default())
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let store = SessionStore::new(4);
        let (id, _) = store.insert(viewer()).await;

        assert!(store.get(&id).await.is_some());
        assert!(store.remove(&id).await);
        assert!(store.get(&id).await.is_none());
        assert!(!store.remove(&id).await);
    }

    #[tokio::test]
    async fn test_oldest_session_is_evicted() {
        let store = SessionStore::new(2);
        let (first, _) = store.insert(viewer()).await;
        let (second, _) = store.insert(viewer()).await;
        let (third, _) = store.insert(viewer()).await;

        assert_eq!(store.len().await, 2);
        assert!(store.get(&first).await.is_none());
        assert!(store.get(&second).await.is_some());
        assert!(store.get(&third).await.is_some());
    }

    #[tokio::test]
    async fn test_evicted_viewer_stays_usable_by_holder() {
        let store = SessionStore::new(1);
        let (_, held) = store.insert(viewer()).await;
        store.insert(viewer()).await;

        let feed = held.lock().await.more().await;
        assert!(feed.exhausted);
    }
}
