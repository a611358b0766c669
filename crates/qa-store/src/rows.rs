//! 行与领域实体之间的显式映射

use chrono::{DateTime, Utc};
use qa_core::{Message, Metadata, MissedQuery, Order, OrderStatus, Role, Session};
use qa_error::{QaError, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| corrupt("timestamp", &ms.to_string()))
}

pub(crate) fn metadata_to_text(metadata: &Metadata) -> Result<String> {
    Ok(serde_json::to_string(metadata)?)
}

fn metadata_from_text(raw: &str) -> Result<Metadata> {
    if raw.is_empty() {
        return Ok(Metadata::new());
    }
    Ok(serde_json::from_str(raw)?)
}

fn corrupt(column: &str, value: &str) -> QaError {
    QaError::Database {
        operation: "decode_row".to_string(),
        message: format!("invalid {} value: {}", column, value),
    }
}

pub(crate) fn order_from_row(row: &SqliteRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        course_name: row.try_get("course_name")?,
        amount: row.try_get("amount")?,
        status: OrderStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        tenant_id: row.try_get("tenant_id")?,
        metadata: metadata_from_text(&row.try_get::<String, _>("metadata")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

/// 会话行不含消息，消息由调用方另行加载
pub(crate) fn session_from_row(row: &SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        messages: Vec::new(),
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
        metadata: metadata_from_text(&row.try_get::<String, _>("metadata")?)?,
    })
}

pub(crate) fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let role: String = row.try_get("role")?;
    Ok(Message {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        role: Role::parse(&role).ok_or_else(|| corrupt("role", &role))?,
        timestamp: from_millis(row.try_get("created_at")?)?,
        metadata: metadata_from_text(&row.try_get::<String, _>("metadata")?)?,
    })
}

pub(crate) fn missed_query_from_row(row: &SqliteRow) -> Result<MissedQuery> {
    Ok(MissedQuery {
        id: row.try_get("id")?,
        query: row.try_get("query")?,
        session_id: row.try_get("session_id")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}
