use std::sync::Arc;

use serde_json::{Map, Value};

use vendi_core::{Role, Session, SessionStore, SessionStoreError, TurnRecord};

/// Owns session existence, the history bound, timestamp maintenance,
/// and the persistence boundary. Nothing else mutates history or
/// talks to the store.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    max_history_length: usize,
    session_ttl_secs: u64,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, max_history_length: usize, session_ttl_secs: u64) -> Self {
        Self { store, max_history_length: max_history_length.max(1), session_ttl_secs }
    }

    /// Loads the session for `id`, synthesizing a fresh one when the
    /// backend has nothing. Malformed stored shapes were already
    /// normalized by the lenient session decode, so the result is
    /// always usable.
    pub async fn load(&self, id: &str) -> Result<Session, SessionStoreError> {
        match self.store.get(id).await? {
            Some(mut session) => {
                if session.id.is_empty() {
                    session.id = id.to_string();
                }
                Ok(session)
            }
            None => Ok(Session::new(id)),
        }
    }

    /// Appends one turn, trims to the bound (oldest first), and
    /// touches `last_activity`.
    pub fn append_message(
        &self,
        session: &mut Session,
        role: Role,
        text: &str,
        metadata: Map<String, Value>,
    ) {
        session.history.push(TurnRecord::new(role, text, metadata));
        session.trim_history(self.max_history_length);
        session.touch();
    }

    /// Persists the session: defensive re-trim, touch, backend save,
    /// then TTL refresh. The TTL call always runs, even against
    /// backends whose save already arms expiry, so the store contract
    /// stays backend-agnostic.
    pub async fn save(&self, id: &str, session: &mut Session) -> Result<(), SessionStoreError> {
        session.trim_history(self.max_history_length);
        session.touch();
        self.store.save(id, session).await?;
        self.store.update_ttl(id, self.session_ttl_secs).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use vendi_core::{Role, Session, SessionStore, SessionStoreError};

    use super::SessionManager;

    /// Store double that counts calls and can serve a canned session.
    #[derive(Default)]
    struct CountingStore {
        stored: Mutex<Option<Session>>,
        saves: AtomicUsize,
        ttl_updates: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for CountingStore {
        async fn get(&self, _id: &str) -> Result<Option<Session>, SessionStoreError> {
            Ok(self.stored.lock().await.clone())
        }

        async fn save(&self, _id: &str, session: &Session) -> Result<(), SessionStoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.stored.lock().await = Some(session.clone());
            Ok(())
        }

        async fn delete(&self, _id: &str) -> Result<(), SessionStoreError> {
            *self.stored.lock().await = None;
            Ok(())
        }

        async fn update_ttl(&self, _id: &str, _ttl_secs: u64) -> Result<(), SessionStoreError> {
            self.ttl_updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn load_synthesizes_a_fresh_session() {
        let store = Arc::new(CountingStore::default());
        let manager = SessionManager::new(store, 20, 3600);

        let session = manager.load("s-1").await.expect("load");
        assert_eq!(session.id, "s-1");
        assert!(session.history.is_empty());
        assert!(session.cart.is_empty());
        assert!(session.customer.is_none());
    }

    #[tokio::test]
    async fn history_never_exceeds_the_bound_and_keeps_recency() {
        let store = Arc::new(CountingStore::default());
        let manager = SessionManager::new(store, 5, 3600);
        let mut session = manager.load("s-1").await.expect("load");

        for index in 0..23 {
            manager.append_message(
                &mut session,
                Role::User,
                &format!("message {index}"),
                serde_json::Map::new(),
            );
            assert!(session.history.len() <= 5);
        }

        let texts: Vec<&str> =
            session.history.iter().map(|turn| turn.text.as_str()).collect();
        assert_eq!(texts, ["message 18", "message 19", "message 20", "message 21", "message 22"]);
    }

    #[tokio::test]
    async fn save_runs_backend_save_and_ttl_refresh() {
        let store = Arc::new(CountingStore::default());
        let store_dyn: Arc<dyn SessionStore> = store.clone();
        let manager = SessionManager::new(store_dyn, 20, 3600);
        let mut session = manager.load("s-1").await.expect("load");

        let before = session.last_activity;
        manager.save("s-1", &mut session).await.expect("save");

        assert_eq!(store.saves.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.ttl_updates.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(session.last_activity >= before);
    }

    #[tokio::test]
    async fn load_fills_in_a_missing_id() {
        let store = Arc::new(CountingStore::default());
        let mut stored = Session::new("");
        stored.context.insert("seen".to_string(), serde_json::json!(true));
        *store.stored.lock().await = Some(stored);

        let store_dyn: Arc<dyn SessionStore> = store.clone();
        let manager = SessionManager::new(store_dyn, 20, 3600);
        let session = manager.load("s-9").await.expect("load");
        assert_eq!(session.id, "s-9");
        assert_eq!(session.context.get("seen"), Some(&serde_json::json!(true)));
    }
}
