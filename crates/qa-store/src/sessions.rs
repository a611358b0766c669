use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qa_core::{Message, Session};
use qa_error::{QaError, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::rows::{message_from_row, metadata_to_text, session_from_row, to_millis};
use crate::TenantDb;

/// 会话持久化
///
/// 过期会话视同不存在：`load` 返回 `NotFound`，`append_message` 返回 `SessionExpired`。
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 保存会话及其全部消息（幂等）
    async fn save(&self, session: &Session) -> Result<()>;

    async fn load(&self, session_id: &str) -> Result<Session>;

    async fn append_message(&self, session_id: &str, message: &Message) -> Result<()>;

    async fn delete(&self, session_id: &str) -> Result<()>;

    async fn exists(&self, session_id: &str) -> Result<bool>;

    /// 清理过期会话，返回清理数量
    async fn delete_expired(&self) -> Result<u64>;

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Session>>;

    async fn count(&self) -> Result<i64>;

    async fn update_expiration(&self, session_id: &str, expires_at: DateTime<Utc>) -> Result<()>;

    /// 按时间顺序返回消息；`limit` 限定为最近 N 条
    async fn get_messages(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<Message>>;
}

#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(db: &TenantDb) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query("SELECT * FROM messages WHERE session_id = ? ORDER BY seq ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn expires_at(&self, session_id: &str) -> Result<Option<i64>> {
        let expires: Option<i64> =
            sqlx::query_scalar("SELECT expires_at FROM sessions WHERE id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(expires)
    }
}

fn session_not_found(session_id: &str) -> QaError {
    QaError::not_found(format!("session {}", session_id))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save(&self, session: &Session) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO sessions (id, tenant_id, metadata, created_at, updated_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   metadata = excluded.metadata,
                   updated_at = excluded.updated_at,
                   expires_at = excluded.expires_at"#,
        )
        .bind(&session.id)
        .bind(&session.tenant_id)
        .bind(metadata_to_text(&session.metadata)?)
        .bind(to_millis(session.created_at))
        .bind(to_millis(session.updated_at))
        .bind(to_millis(session.expires_at))
        .execute(&mut *tx)
        .await?;

        for (seq, message) in session.messages.iter().enumerate() {
            sqlx::query(
                r#"INSERT OR IGNORE INTO messages (id, session_id, seq, role, content, metadata, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&message.id)
            .bind(&session.id)
            .bind(seq as i64)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(metadata_to_text(&message.metadata)?)
            .bind(to_millis(message.timestamp))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(session_id = %session.id, messages = session.messages.len(), "session saved");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Session> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| session_not_found(session_id))?;
        let mut session = session_from_row(&row)?;
        if session.is_expired() {
            return Err(session_not_found(session_id));
        }
        session.messages = self.load_messages(session_id).await?;
        Ok(session)
    }

    async fn append_message(&self, session_id: &str, message: &Message) -> Result<()> {
        let expires_at = self
            .expires_at(session_id)
            .await?
            .ok_or_else(|| session_not_found(session_id))?;
        let now = to_millis(Utc::now());
        if now > expires_at {
            return Err(QaError::SessionExpired {
                session_id: session_id.to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO messages (id, session_id, seq, role, content, metadata, created_at)
               VALUES (?, ?, (SELECT COALESCE(MAX(seq), -1) + 1 FROM messages WHERE session_id = ?), ?, ?, ?, ?)"#,
        )
        .bind(&message.id)
        .bind(session_id)
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(metadata_to_text(&message.metadata)?)
        .bind(to_millis(message.timestamp))
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let done = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(session_not_found(session_id));
        }
        Ok(())
    }

    async fn exists(&self, session_id: &str) -> Result<bool> {
        match self.expires_at(session_id).await? {
            Some(expires_at) => Ok(to_millis(Utc::now()) <= expires_at),
            None => Ok(false),
        }
    }

    async fn delete_expired(&self) -> Result<u64> {
        let done = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(to_millis(Utc::now()))
            .execute(&self.pool)
            .await?;
        let removed = done.rows_affected();
        if removed > 0 {
            info!(removed, "expired sessions deleted");
        }
        Ok(removed)
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE tenant_id = ? AND expires_at >= ? ORDER BY updated_at DESC",
        )
        .bind(tenant_id)
        .bind(to_millis(Utc::now()))
        .fetch_all(&self.pool)
        .await?;
        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut session = session_from_row(row)?;
            session.messages = self.load_messages(&session.id).await?;
            sessions.push(session);
        }
        Ok(sessions)
    }

    async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE expires_at >= ?")
            .bind(to_millis(Utc::now()))
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn update_expiration(&self, session_id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let done = sqlx::query("UPDATE sessions SET expires_at = ?, updated_at = ? WHERE id = ?")
            .bind(to_millis(expires_at))
            .bind(to_millis(Utc::now()))
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(session_not_found(session_id));
        }
        Ok(())
    }

    async fn get_messages(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<Message>> {
        let mut messages = self.load_messages(session_id).await?;
        if let Some(n) = limit {
            let start = messages.len().saturating_sub(n);
            messages.drain(..start);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DatabaseProvisioner, InMemoryProvisioner};
    use qa_core::{Role, Tenant};

    async fn store() -> SqliteSessionStore {
        InMemoryProvisioner::new()
            .open(&Tenant::new("t1", "").unwrap())
            .await
            .unwrap()
            .sessions()
    }

    fn ttl() -> chrono::Duration {
        chrono::Duration::minutes(30)
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let store = store().await;
        let mut session = Session::new("t1", ttl());
        session.add_message(Message::user("你好").unwrap()).unwrap();
        session
            .add_message(Message::assistant("您好，有什么可以帮您？").unwrap())
            .unwrap();
        store.save(&session).await.unwrap();
        // 再次保存不会重复插入消息
        store.save(&session).await.unwrap();

        let loaded = store.load(&session.id).await.unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].role, Role::User);
        assert_eq!(loaded.messages[1].content, "您好，有什么可以帮您？");
        assert_eq!(loaded.tenant_id, "t1");
        assert!(store.exists(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_keeps_order() {
        let store = store().await;
        let session = Session::new("t1", ttl());
        store.save(&session).await.unwrap();
        for i in 0..5 {
            store
                .append_message(&session.id, &Message::user(format!("m{}", i)).unwrap())
                .await
                .unwrap();
        }
        let last_two = store.get_messages(&session.id, Some(2)).await.unwrap();
        let contents: Vec<_> = last_two.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);

        let missing = store
            .append_message("sess_missing", &Message::user("x").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(missing, QaError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_expired_session_is_absent() {
        let store = store().await;
        let mut session = Session::new("t1", ttl());
        session.add_message(Message::user("hi").unwrap()).unwrap();
        session.expires_at = Utc::now() - chrono::Duration::seconds(5);
        store.save(&session).await.unwrap();

        assert!(matches!(
            store.load(&session.id).await,
            Err(QaError::NotFound { .. })
        ));
        assert!(!store.exists(&session.id).await.unwrap());
        assert!(matches!(
            store
                .append_message(&session.id, &Message::user("again").unwrap())
                .await,
            Err(QaError::SessionExpired { .. })
        ));

        let live = Session::new("t1", ttl());
        store.save(&live).await.unwrap();
        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
        // 级联删除消息
        assert!(store.get_messages(&session.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_expiration_and_delete() {
        let store = store().await;
        let session = Session::new("t1", ttl());
        store.save(&session).await.unwrap();

        store
            .update_expiration(&session.id, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert!(store.load(&session.id).await.is_err());
        store
            .update_expiration(&session.id, Utc::now() + ttl())
            .await
            .unwrap();
        assert_eq!(store.list_by_tenant("t1").await.unwrap().len(), 1);
        assert!(store.list_by_tenant("t2").await.unwrap().is_empty());

        store.delete(&session.id).await.unwrap();
        assert!(matches!(
            store.delete(&session.id).await,
            Err(QaError::NotFound { .. })
        ));
    }
}
