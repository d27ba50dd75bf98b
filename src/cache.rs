use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::{DeletionPlan, RelocationPlan, SearchHit};

pub(crate) const HANDLE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub(crate) enum HandlePayload {
    Search(Vec<SearchHit>),
    Deletion(DeletionPlan),
    Relocation(RelocationPlan),
}

struct HandleEntry {
    payload: HandlePayload,
    created: Instant,
}

/// Short-lived server-side store for anything too big to ride in a callback
/// payload. Buttons carry an opaque id; the bulky state lives here until it
/// expires or is consumed. Expiry is enforced both lazily on lookup and by a
/// periodic sweep, so an abandoned keyboard cannot pin memory.
pub(crate) struct HandleCache {
    entries: Mutex<HashMap<String, HandleEntry>>,
    counter: AtomicU64,
    ttl: Duration,
}

impl HandleCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        HandleCache { entries: Mutex::new(HashMap::new()), counter: AtomicU64::new(1), ttl }
    }

    pub(crate) fn put(&self, payload: HandlePayload) -> String {
        let id = format!("h{:x}", self.counter.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(id.clone(), HandleEntry { payload, created: Instant::now() });
        id
    }

    pub(crate) fn get(&self, id: &str) -> Option<HandlePayload> {
        self.get_at(id, Instant::now())
    }

    fn get_at(&self, id: &str, now: Instant) -> Option<HandlePayload> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(id) {
            Some(entry) if now.duration_since(entry.created) < self.ttl => {
                Some(entry.payload.clone())
            }
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    pub(crate) fn search(&self, id: &str) -> Option<Vec<SearchHit>> {
        match self.get(id) {
            Some(HandlePayload::Search(hits)) => Some(hits),
            _ => None,
        }
    }

    pub(crate) fn deletion(&self, id: &str) -> Option<DeletionPlan> {
        match self.get(id) {
            Some(HandlePayload::Deletion(plan)) => Some(plan),
            _ => None,
        }
    }

    pub(crate) fn relocation(&self, id: &str) -> Option<RelocationPlan> {
        match self.get(id) {
            Some(HandlePayload::Relocation(plan)) => Some(plan),
            _ => None,
        }
    }

    /// Remove a consumed handle so its buttons go stale immediately.
    pub(crate) fn discard(&self, id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(id);
    }

    pub(crate) fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.created) < self.ttl);
        before - entries.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_payload() -> HandlePayload {
        HandlePayload::Search(vec![SearchHit {
            item_id: "1".into(),
            name: "Arrival".into(),
            kind: "Movie".into(),
            year: Some(2016),
            series_name: None,
        }])
    }

    #[test]
    fn ids_are_unique_and_opaque() {
        let cache = HandleCache::new(HANDLE_TTL);
        let a = cache.put(search_payload());
        let b = cache.put(search_payload());
        assert_ne!(a, b);
        assert!(a.starts_with('h'));
    }

    #[test]
    fn live_before_ttl_gone_after() {
        let cache = HandleCache::new(Duration::from_secs(600));
        let id = cache.put(search_payload());
        let created = Instant::now();
        let just_before = created + Duration::from_secs(599);
        let just_after = created + Duration::from_secs(601);
        assert!(cache.get_at(&id, just_before).is_some());
        assert!(cache.get_at(&id, just_after).is_none());
        // The expired entry was evicted by the lookup itself.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn sweep_only_evicts_expired() {
        let cache = HandleCache::new(Duration::from_secs(600));
        let _old = cache.put(search_payload());
        let late = Instant::now() + Duration::from_secs(700);
        assert_eq!(cache.sweep_at(Instant::now()), 0);
        assert_eq!(cache.sweep_at(late), 1);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn typed_accessor_rejects_wrong_kind() {
        let cache = HandleCache::new(HANDLE_TTL);
        let id = cache.put(search_payload());
        assert!(cache.search(&id).is_some());
        assert!(cache.deletion(&id).is_none());
    }

    #[test]
    fn discard_makes_handle_stale() {
        let cache = HandleCache::new(HANDLE_TTL);
        let id = cache.put(HandlePayload::Deletion(DeletionPlan {
            title: "Foo".into(),
            targets: vec![],
        }));
        assert!(cache.deletion(&id).is_some());
        cache.discard(&id);
        assert!(cache.deletion(&id).is_none());
    }
}
