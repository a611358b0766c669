use chrono::{DateTime, Utc};
use qa_core::MissedQuery;
use qa_error::Result;
use sqlx::SqlitePool;

use crate::rows::{missed_query_from_row, to_millis};
use crate::TenantDb;

/// 知识库未命中的查询日志，供运营补充文档
#[derive(Clone)]
pub struct MissedQueryRepository {
    pool: SqlitePool,
}

impl MissedQueryRepository {
    pub fn new(db: &TenantDb) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn record(&self, query: &str, session_id: Option<&str>) -> Result<i64> {
        let done = sqlx::query(
            "INSERT INTO missed_queries (query, session_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(query)
        .bind(session_id)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(done.last_insert_rowid())
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<MissedQuery>> {
        let rows = sqlx::query(
            "SELECT * FROM missed_queries ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(missed_query_from_row).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM missed_queries")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM missed_queries WHERE created_at < ?")
            .bind(to_millis(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}
