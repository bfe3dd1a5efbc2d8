//! Session registry implementation
//!
//! The registry is the single source of truth for which sessions are live.
//! Teardown is claimed by removing the entry: whoever gets `Some` back from
//! [`SessionRegistry::remove`] owns the cleanup.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex, RwLock};

use super::entry::{SessionCommand, SessionEntry, SessionInfo};
use crate::error::SessionError;

/// Live sessions keyed by session id
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,

    /// Per tunnel-name locks serializing remove-then-create
    tunnel_locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            tunnel_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new session
    ///
    /// Fails if the id is already live.
    pub async fn insert(&self, entry: SessionEntry) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(&entry.scid) {
            return Err(SessionError::AlreadyExists(entry.scid));
        }

        tracing::info!(
            scid = %entry.scid,
            device = %entry.device_id,
            streams = entry.streams.len(),
            "Session registered"
        );
        sessions.insert(entry.scid.clone(), entry);

        Ok(())
    }

    /// Record the bound listener port
    pub async fn set_port(&self, scid: &str, port: u16) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(scid) {
            Some(entry) => {
                entry.port = port;
                true
            }
            None => false,
        }
    }

    /// Remove a session, claiming its teardown
    pub async fn remove(&self, scid: &str) -> Option<SessionEntry> {
        let removed = self.sessions.write().await.remove(scid);

        if let Some(entry) = &removed {
            tracing::info!(
                scid = %scid,
                device = %entry.device_id,
                age_secs = entry.created_at.elapsed().as_secs(),
                "Session unregistered"
            );
        }

        removed
    }

    pub async fn contains(&self, scid: &str) -> bool {
        self.sessions.read().await.contains_key(scid)
    }

    pub async fn get(&self, scid: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(scid).map(SessionEntry::info)
    }

    /// Command channel of a live session
    pub async fn commands(&self, scid: &str) -> Option<mpsc::Sender<SessionCommand>> {
        self.sessions
            .read()
            .await
            .get(scid)
            .map(|entry| entry.commands.clone())
    }

    /// Ids of all live sessions, sorted
    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Lock for one reverse tunnel on one device
    ///
    /// Locks are shared while any holder keeps the `Arc`; unused ones are
    /// pruned on the next lookup.
    pub async fn tunnel_lock(&self, device_id: &str, tunnel: &str) -> Arc<Mutex<()>> {
        let mut locks = self.tunnel_locks.lock().await;
        locks.retain(|_, lock| lock.strong_count() > 0);

        let key = format!("{}/{}", device_id, tunnel);
        if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
            return lock;
        }

        let lock = Arc::new(Mutex::new(()));
        locks.insert(key, Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    async fn tunnel_lock_count(&self) -> usize {
        let mut locks = self.tunnel_locks.lock().await;
        locks.retain(|_, lock| lock.strong_count() > 0);
        locks.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StreamSet;

    fn entry(scid: &str, device: &str) -> (SessionEntry, mpsc::Receiver<SessionCommand>) {
        let (tx, rx) = mpsc::channel(4);
        (
            SessionEntry::new(scid, device, StreamSet::new(true, false, false), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn test_insert_and_remove() {
        let registry = SessionRegistry::new();
        let (first, _rx) = entry("0000abcd", "emulator-5554");

        registry.insert(first).await.unwrap();
        assert!(registry.contains("0000abcd").await);
        assert_eq!(registry.session_count().await, 1);

        let removed = registry.remove("0000abcd").await.unwrap();
        assert_eq!(removed.device_id, "emulator-5554");

        // Second removal loses the race
        assert!(registry.remove("0000abcd").await.is_none());
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = entry("0000abcd", "emulator-5554");
        let (second, _rx2) = entry("0000abcd", "emulator-5556");

        registry.insert(first).await.unwrap();
        let result = registry.insert(second).await;
        assert!(matches!(result, Err(SessionError::AlreadyExists(id)) if id == "0000abcd"));
        assert_eq!(
            registry.get("0000abcd").await.unwrap().device_id,
            "emulator-5554"
        );
    }

    #[tokio::test]
    async fn test_set_port_and_lookup() {
        let registry = SessionRegistry::new();
        let (first, _rx) = entry("0000abcd", "emulator-5554");
        registry.insert(first).await.unwrap();

        assert!(registry.set_port("0000abcd", 27183).await);
        assert!(!registry.set_port("ffffffff", 27183).await);
        assert_eq!(registry.get("0000abcd").await.unwrap().port, 27183);
        assert!(registry.commands("0000abcd").await.is_some());
        assert!(registry.commands("ffffffff").await.is_none());
    }

    #[tokio::test]
    async fn test_session_ids_sorted() {
        let registry = SessionRegistry::new();
        let (a, _ra) = entry("0000000b", "emulator-5554");
        let (b, _rb) = entry("0000000a", "emulator-5554");
        let (c, _rc) = entry("0000000c", "R58M12345");
        registry.insert(a).await.unwrap();
        registry.insert(b).await.unwrap();
        registry.insert(c).await.unwrap();

        assert_eq!(
            registry.session_ids().await,
            vec!["0000000a", "0000000b", "0000000c"]
        );
    }

    #[tokio::test]
    async fn test_tunnel_lock_shared_and_pruned() {
        let registry = SessionRegistry::new();

        let first = registry.tunnel_lock("emulator-5554", "localabstract:scrcpy_0000abcd").await;
        let again = registry.tunnel_lock("emulator-5554", "localabstract:scrcpy_0000abcd").await;
        let other = registry.tunnel_lock("emulator-5554", "localabstract:scrcpy_0000beef").await;

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.tunnel_lock_count().await, 2);

        drop(first);
        drop(again);
        assert_eq!(registry.tunnel_lock_count().await, 1);
    }
}
