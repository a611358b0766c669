use chrono::{DateTime, Utc};
use qa_error::{QaError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// 会话消息，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(QaError::validation("message content must not be empty"));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            content,
            role,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        })
    }

    pub fn user(content: impl Into<String>) -> Result<Self> {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Result<Self> {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Result<Self> {
        Self::new(Role::System, content)
    }
}

/// 会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub tenant_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Session {
    pub fn new(tenant_id: &str, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Self::generate_id(),
            tenant_id: tenant_id.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            metadata: Metadata::new(),
        }
    }

    pub fn generate_id() -> String {
        format!("sess_{}", Uuid::new_v4().simple())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// 从当前时间起续期
    pub fn extend(&mut self, ttl: chrono::Duration) {
        let now = Utc::now();
        self.expires_at = now + ttl;
        self.updated_at = now;
    }

    /// 追加消息，过期会话拒绝写入
    pub fn add_message(&mut self, message: Message) -> Result<()> {
        if self.is_expired() {
            return Err(QaError::SessionExpired {
                session_id: self.id.clone(),
            });
        }
        self.messages.push(message);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 最近 n 条消息
    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_format() {
        let session = Session::new("t1", chrono::Duration::minutes(30));
        assert!(session.id.starts_with("sess_"));
        assert_eq!(session.id.len(), "sess_".len() + 32);
        assert!(!session.is_expired());
    }

    #[test]
    fn test_expired_session_rejects_append() {
        let mut session = Session::new("t1", chrono::Duration::minutes(30));
        session.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let err = session
            .add_message(Message::user("hello").unwrap())
            .unwrap_err();
        assert!(matches!(err, QaError::SessionExpired { .. }));
        assert!(session.messages.is_empty());

        session.extend(chrono::Duration::minutes(5));
        session.add_message(Message::user("hello").unwrap()).unwrap();
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn test_recent_messages_window() {
        let mut session = Session::new("t1", chrono::Duration::minutes(30));
        for i in 0..10 {
            session
                .add_message(Message::user(format!("m{}", i)).unwrap())
                .unwrap();
        }
        let recent = session.recent_messages(6);
        assert_eq!(recent.len(), 6);
        assert_eq!(recent[0].content, "m4");
        assert_eq!(session.recent_messages(50).len(), 10);
    }

    #[test]
    fn test_empty_message_rejected() {
        assert!(Message::assistant("   ").is_err());
        assert_eq!(Role::parse("system"), Some(Role::System));
        assert_eq!(Role::parse("tool"), None);
    }
}
