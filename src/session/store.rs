//! Concurrent session registry.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::observability::metrics;
use crate::session::cookies::StoredCookie;
use crate::session::headers::HeaderSet;
use crate::session::record::{short_id, ClientSettings, SessionRecord};
use crate::session::SessionError;

/// Registry summary.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub session_timeout_secs: u64,
    /// Idle time of the least recently used session.
    pub oldest_idle_secs: u64,
}

/// Thread-safe map from session id to record.
///
/// The map is sharded, so every operation on one id only locks that id's
/// shard, and only for the duration of the map operation itself.
pub struct SessionStore {
    sessions: DashMap<String, Arc<SessionRecord>>,
    timeout_ms: AtomicU64,
    client_settings: ClientSettings,
}

impl SessionStore {
    pub fn new(timeout: Duration, client_settings: ClientSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout_ms: AtomicU64::new(timeout.as_millis() as u64),
            client_settings,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Change the idle timeout for all sessions, live ones included.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(timeout.as_millis() as u64, Ordering::Relaxed);
        tracing::info!(timeout_secs = timeout.as_secs(), "Session timeout updated");
    }

    /// Create a session and return its id.
    pub fn create(&self, client_ip: &str, user_agent: &str) -> Result<String, SessionError> {
        let client = self.client_settings.build()?;

        let id = loop {
            let id = Uuid::new_v4().to_string();
            match self.sessions.entry(id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(SessionRecord::new(
                        id.clone(),
                        client_ip.to_string(),
                        user_agent.to_string(),
                        client,
                    )));
                    break id;
                }
            }
        };

        metrics::record_session_created();
        metrics::record_active_sessions(self.sessions.len());
        tracing::info!(session = %short_id(&id), client_ip, "Session created");
        Ok(id)
    }

    /// Live record for `id`. Does not check the timeout.
    pub fn get(&self, id: &str) -> Result<Arc<SessionRecord>, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(SessionError::NotFound)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// True if `id` is live and not idle past the timeout. An expired record
    /// is evicted as part of the same check.
    pub fn is_valid(&self, id: &str) -> bool {
        self.check(id, Instant::now(), false).is_ok()
    }

    /// Validate and touch `id` in one step.
    ///
    /// Used by the gateway so a session cannot expire between being
    /// validated and being touched.
    pub fn resolve(&self, id: &str) -> Result<Arc<SessionRecord>, SessionError> {
        self.check(id, Instant::now(), true)
    }

    /// Validity check at an explicit instant.
    pub fn is_valid_at(&self, id: &str, now: Instant) -> bool {
        self.check(id, now, false).is_ok()
    }

    fn check(&self, id: &str, now: Instant, touch: bool) -> Result<Arc<SessionRecord>, SessionError> {
        let timeout = self.timeout();
        // The entry holds the shard lock, so a concurrent touch or delete of
        // this id cannot interleave with the compare.
        let evicted = match self.sessions.entry(id.to_string()) {
            Entry::Vacant(_) => return Err(SessionError::NotFound),
            Entry::Occupied(entry) => {
                if !entry.get().is_expired(now, timeout) {
                    if touch {
                        entry.get().touch(now);
                    }
                    return Ok(entry.get().clone());
                }
                entry.remove()
            }
        };

        evicted.release();
        metrics::record_session_evicted("expired");
        metrics::record_active_sessions(self.sessions.len());
        tracing::info!(session = %short_id(id), "Expired session removed");
        Err(SessionError::Expired)
    }

    /// Mark activity on `id`. No-op if absent.
    pub fn touch(&self, id: &str) {
        if let Some(entry) = self.sessions.get(id) {
            entry.value().touch(Instant::now());
        }
    }

    /// Replace the header set of `id` wholesale.
    pub fn set_headers(&self, id: &str, headers: HeaderSet) -> Result<(), SessionError> {
        self.get(id)?.set_headers(headers);
        Ok(())
    }

    pub fn headers(&self, id: &str) -> Result<HeaderSet, SessionError> {
        Ok(self.get(id)?.headers())
    }

    /// Insert/overwrite cookies of `id` by `(name, domain, path)`.
    pub fn merge_cookies<I>(&self, id: &str, cookies: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = StoredCookie>,
    {
        self.get(id)?.merge_cookies(cookies);
        Ok(())
    }

    pub fn cookies(&self, id: &str) -> Result<Vec<StoredCookie>, SessionError> {
        Ok(self.get(id)?.cookies())
    }

    /// Clear the headers and cookies of `id` and give it a fresh client.
    /// The id stays live.
    pub fn reset(&self, id: &str) -> Result<(), SessionError> {
        let record = self.get(id)?;
        let client = self.client_settings.build()?;
        if !record.reset(client) {
            return Err(SessionError::NotFound);
        }
        tracing::info!(session = %short_id(id), "Session reset");
        Ok(())
    }

    /// Remove `id` and release its client. Returns whether it existed.
    pub fn delete(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((_, record)) => {
                record.release();
                metrics::record_session_evicted("deleted");
                metrics::record_active_sessions(self.sessions.len());
                tracing::info!(session = %short_id(id), "Session deleted");
                true
            }
            None => false,
        }
    }

    /// Evict every session idle past the timeout as of `now`.
    ///
    /// The key set is snapshotted first; each key is then re-checked under
    /// its own shard lock, so sessions touched during the scan survive.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let timeout = self.timeout();
        let ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();

        let mut evicted = 0;
        for id in ids {
            if let Some((_, record)) = self
                .sessions
                .remove_if(&id, |_, record| record.is_expired(now, timeout))
            {
                record.release();
                evicted += 1;
            }
        }

        if evicted > 0 {
            metrics::record_sessions_swept(evicted);
            metrics::record_active_sessions(self.sessions.len());
            tracing::info!(evicted, remaining = self.sessions.len(), "Cleaned up expired sessions");
        }
        evicted
    }

    /// Delete every session. Used at shutdown.
    pub fn clear(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter(|id| self.delete(id)).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self) -> SessionStats {
        let oldest_idle = self
            .sessions
            .iter()
            .map(|entry| entry.value().idle())
            .max()
            .unwrap_or_default();
        SessionStats {
            active_sessions: self.sessions.len(),
            session_timeout_secs: self.timeout().as_secs(),
            oldest_idle_secs: oldest_idle.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn store(timeout: Duration) -> SessionStore {
        SessionStore::new(timeout, ClientSettings::default())
    }

    #[test]
    fn test_create_is_immediately_valid() {
        let store = store(Duration::from_secs(60));
        let id = store.create("10.0.0.1", "curl/8").unwrap();

        assert!(store.is_valid(&id));
        let rec = store.get(&id).unwrap();
        assert_eq!(rec.client_ip(), "10.0.0.1");
        assert_eq!(rec.user_agent(), "curl/8");
        assert!(rec.headers().is_empty());
        assert!(rec.cookies().is_empty());
    }

    #[test]
    fn test_unknown_and_deleted_ids() {
        let store = store(Duration::from_secs(60));
        assert!(!store.is_valid("nope"));
        assert!(matches!(store.get("nope"), Err(SessionError::NotFound)));

        let id = store.create("ip", "ua").unwrap();
        let rec = store.get(&id).unwrap();
        assert!(store.delete(&id));
        assert!(!store.delete(&id));
        assert!(!store.is_valid(&id));
        assert!(matches!(store.get(&id), Err(SessionError::NotFound)));
        assert!(rec.is_released());
    }

    #[test]
    fn test_reset_keeps_the_id_live() {
        let store = store(Duration::from_secs(60));
        let id = store.create("ip", "ua").unwrap();
        store
            .set_headers(&id, HeaderSet::try_from_pairs([("X-Test", "1")]).unwrap())
            .unwrap();
        store.merge_cookies(&id, [StoredCookie::new("a", "1", "d", "/")]).unwrap();

        store.reset(&id).unwrap();
        assert!(store.is_valid(&id));
        assert!(store.headers(&id).unwrap().is_empty());
        assert!(store.cookies(&id).unwrap().is_empty());
        assert!(!store.get(&id).unwrap().is_released());

        assert!(matches!(store.reset("nope"), Err(SessionError::NotFound)));
    }

    #[test]
    fn test_ids_are_unique() {
        let store = store(Duration::from_secs(60));
        let ids: HashSet<_> = (0..100).map(|_| store.create("ip", "ua").unwrap()).collect();
        assert_eq!(ids.len(), 100);
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn test_self_eviction_happens_once() {
        let store = store(Duration::from_secs(5));
        let id = store.create("ip", "ua").unwrap();
        let rec = store.get(&id).unwrap();

        let later = Instant::now() + Duration::from_secs(6);
        assert!(store.is_valid_at(&id, Instant::now()));
        assert!(!store.is_valid_at(&id, later));
        assert!(rec.is_released());
        // already gone: reported as not found, not re-released
        assert!(!store.is_valid_at(&id, later));
        assert!(matches!(store.get(&id), Err(SessionError::NotFound)));
    }

    #[test]
    fn test_resolve_touches_and_reports_expiry() {
        let store = store(Duration::from_millis(50));
        let id = store.create("ip", "ua").unwrap();

        let rec = store.resolve(&id).unwrap();
        assert_eq!(rec.request_count(), 1);
        store.touch(&id);
        assert_eq!(rec.request_count(), 2);

        std::thread::sleep(Duration::from_millis(80));
        assert!(matches!(store.resolve(&id), Err(SessionError::Expired)));
        assert!(matches!(store.resolve(&id), Err(SessionError::NotFound)));
    }

    #[test]
    fn test_set_headers_replaces() {
        let store = store(Duration::from_secs(60));
        let id = store.create("ip", "ua").unwrap();

        store
            .set_headers(&id, HeaderSet::try_from_pairs([("X-A", "1"), ("X-B", "2")]).unwrap())
            .unwrap();
        store
            .set_headers(&id, HeaderSet::try_from_pairs([("X-Test", "1")]).unwrap())
            .unwrap();

        let headers = store.headers(&id).unwrap();
        assert_eq!(headers, HeaderSet::try_from_pairs([("X-Test", "1")]).unwrap());
    }

    #[test]
    fn test_merge_cookies_overwrites() {
        let store = store(Duration::from_secs(60));
        let id = store.create("ip", "ua").unwrap();

        store.merge_cookies(&id, [StoredCookie::new("a", "1", "d", "/")]).unwrap();
        store.merge_cookies(&id, [StoredCookie::new("a", "2", "d", "/")]).unwrap();

        assert_eq!(store.cookies(&id).unwrap(), vec![StoredCookie::new("a", "2", "d", "/")]);
    }

    #[test]
    fn test_sweep_skips_recently_touched() {
        let store = store(Duration::from_secs(10));
        let stale = store.create("ip", "ua").unwrap();
        let fresh = store.create("ip", "ua").unwrap();
        let stale_rec = store.get(&stale).unwrap();

        store.get(&fresh).unwrap().touch(Instant::now() + Duration::from_secs(8));

        let evicted = store.sweep_expired(Instant::now() + Duration::from_secs(12));
        assert_eq!(evicted, 1);
        assert!(!store.contains(&stale));
        assert!(store.contains(&fresh));
        assert!(stale_rec.is_released());
    }

    #[test]
    fn test_clear_releases_everything() {
        let store = store(Duration::from_secs(60));
        let recs: Vec<_> = (0..3)
            .map(|_| store.create("ip", "ua").unwrap())
            .map(|id| store.get(&id).unwrap())
            .collect();

        assert_eq!(store.clear(), 3);
        assert!(store.is_empty());
        assert!(recs.iter().all(|r| r.is_released()));
    }

    #[test]
    fn test_concurrent_touch_and_sweep() {
        let store = Arc::new(store(Duration::from_secs(60)));
        let ids: Vec<_> = (0..32).map(|_| store.create("ip", "ua").unwrap()).collect();

        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        assert!(store.resolve(&id).is_ok());
                    }
                })
            })
            .collect();
        for _ in 0..10 {
            assert_eq!(store.sweep_expired(Instant::now()), 0);
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.len(), 32);
        assert!(ids.iter().all(|id| store.get(id).unwrap().request_count() == 50));
    }
}
