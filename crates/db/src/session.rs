use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use tokio::sync::RwLock;

use vendi_core::{Session, SessionStore, SessionStoreError};

use crate::DbPool;

struct StoredEntry {
    session: Session,
    expires_at: Option<DateTime<Utc>>,
}

/// Process-local session store with the same expiry semantics as the
/// networked one: `save` preserves whatever TTL is armed, and
/// `update_ttl` re-arms it. Expired entries read as absent.
pub struct MemorySessionStore {
    default_ttl_secs: Option<u64>,
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemorySessionStore {
    pub fn new(default_ttl_secs: Option<u64>) -> Self {
        Self { default_ttl_secs, entries: RwLock::new(HashMap::new()) }
    }

    fn expiry_from(ttl_secs: Option<u64>) -> Option<DateTime<Utc>> {
        ttl_secs.and_then(|secs| {
            (secs > 0).then(|| Utc::now() + Duration::seconds(secs as i64))
        })
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, SessionStoreError> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(id) {
                None => return Ok(None),
                Some(entry) => match entry.expires_at {
                    Some(expires_at) if Utc::now() > expires_at => true,
                    _ => return Ok(Some(entry.session.clone())),
                },
            }
        };

        if expired {
            self.entries.write().await.remove(id);
        }
        Ok(None)
    }

    async fn save(&self, id: &str, session: &Session) -> Result<(), SessionStoreError> {
        let mut entries = self.entries.write().await;
        let expires_at = entries
            .get(id)
            .and_then(|entry| entry.expires_at)
            .or_else(|| Self::expiry_from(self.default_ttl_secs));
        entries.insert(id.to_string(), StoredEntry { session: session.clone(), expires_at });
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SessionStoreError> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn update_ttl(&self, id: &str, ttl_secs: u64) -> Result<(), SessionStoreError> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(id) {
            entry.expires_at = Self::expiry_from(Some(ttl_secs));
        }
        Ok(())
    }
}

/// Session store backed by the `sessions` table: one JSON document
/// per key plus an `expires_at` column. Rows past their expiry read
/// as absent and are lazily removed; undecodable documents also read
/// as absent rather than poisoning the session key.
pub struct SqlSessionStore {
    pool: DbPool,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn backend(error: sqlx::Error) -> SessionStoreError {
    SessionStoreError::Backend(error.to_string())
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, SessionStoreError> {
        let row = sqlx::query("SELECT data, expires_at FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: Option<String> = row.try_get("expires_at").map_err(backend)?;
        let expired = expires_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .is_some_and(|expiry| Utc::now() > expiry.with_timezone(&Utc));
        if expired {
            sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            return Ok(None);
        }

        let data: String = row.try_get("data").map_err(backend)?;
        Ok(serde_json::from_str::<Session>(&data).ok())
    }

    async fn save(&self, id: &str, session: &Session) -> Result<(), SessionStoreError> {
        let data = serde_json::to_string(session)
            .map_err(|err| SessionStoreError::Backend(format!("could not encode session: {err}")))?;

        sqlx::query(
            "INSERT INTO sessions (id, data, expires_at, updated_at)
             VALUES (?, ?, NULL, ?)
             ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at",
        )
        .bind(id)
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SessionStoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn update_ttl(&self, id: &str, ttl_secs: u64) -> Result<(), SessionStoreError> {
        let expires_at = (Utc::now() + Duration::seconds(ttl_secs as i64)).to_rfc3339();
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE id = ?")
            .bind(expires_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use vendi_core::{Session, SessionStore};

    use crate::{connect_with_settings, migrations};

    use super::{MemorySessionStore, SqlSessionStore};

    #[tokio::test]
    async fn memory_store_round_trips_and_expires() {
        let store = MemorySessionStore::default();
        let session = Session::new("s-1");

        store.save("s-1", &session).await.expect("save");
        assert!(store.get("s-1").await.expect("get").is_some());

        // Zero TTL disarms expiry rather than expiring immediately.
        store.update_ttl("s-1", 0).await.expect("ttl");
        assert!(store.get("s-1").await.expect("get").is_some());

        store.update_ttl("s-1", 3600).await.expect("ttl");
        assert!(store.get("s-1").await.expect("get").is_some());

        store.delete("s-1").await.expect("delete");
        assert!(store.get("s-1").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn memory_store_save_preserves_armed_ttl() {
        let store = MemorySessionStore::new(Some(3600));
        let session = Session::new("s-2");

        store.save("s-2", &session).await.expect("save");
        store.update_ttl("s-2", 7200).await.expect("ttl");
        store.save("s-2", &session).await.expect("second save");

        let entries = store.entries.read().await;
        let expiry = entries.get("s-2").and_then(|entry| entry.expires_at).expect("armed expiry");
        assert!(expiry > Utc::now() + Duration::seconds(3600 + 60));
    }

    #[tokio::test]
    async fn sql_store_round_trips_and_honors_expiry() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let store = SqlSessionStore::new(pool.clone());

        let mut session = Session::new("s-3");
        session.context.insert("channel".to_string(), serde_json::json!("web"));

        store.save("s-3", &session).await.expect("save");
        store.update_ttl("s-3", 3600).await.expect("ttl");

        let loaded = store.get("s-3").await.expect("get").expect("present");
        assert_eq!(loaded.context.get("channel"), Some(&serde_json::json!("web")));

        // Arm an expiry in the past and confirm the row reads as gone.
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE id = ?")
            .bind((Utc::now() - Duration::seconds(10)).to_rfc3339())
            .bind("s-3")
            .execute(&pool)
            .await
            .expect("force expiry");
        assert!(store.get("s-3").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn sql_store_treats_undecodable_documents_as_absent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let store = SqlSessionStore::new(pool.clone());

        sqlx::query("INSERT INTO sessions (id, data, expires_at, updated_at) VALUES (?, ?, NULL, ?)")
            .bind("s-4")
            .bind("this is not json")
            .bind(Utc::now().to_rfc3339())
            .execute(&pool)
            .await
            .expect("insert garbage");

        assert!(store.get("s-4").await.expect("get").is_none());
    }
}
