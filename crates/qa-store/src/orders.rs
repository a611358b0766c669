use chrono::Utc;
use qa_core::{Order, OrderStatus};
use qa_error::{QaError, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::rows::{metadata_to_text, order_from_row, to_millis};
use crate::{validate_safe_query, TenantDb};

const FIND_BY_ID: &str = "SELECT * FROM orders WHERE id = ? AND tenant_id = ?";

/// 订单仓储，所有读写都限定在所属租户内
#[derive(Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
    tenant_id: String,
}

impl OrderRepository {
    pub fn new(db: &TenantDb) -> Self {
        Self {
            pool: db.pool().clone(),
            tenant_id: db.tenant_id().to_string(),
        }
    }

    /// 按订单号查询，查询语句先经过只读校验
    pub async fn find_by_id(&self, order_id: &str) -> Result<Order> {
        validate_safe_query(FIND_BY_ID)?;
        let row = sqlx::query(FIND_BY_ID)
            .bind(order_id)
            .bind(&self.tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => order_from_row(&row),
            None => Err(QaError::not_found(format!("order {}", order_id))),
        }
    }

    /// 执行任意只读查询，参数按位置绑定为文本
    pub async fn query_read_only(&self, sql: &str, params: &[&str]) -> Result<Vec<Order>> {
        validate_safe_query(sql)?;
        debug!(tenant_id = %self.tenant_id, sql, "read-only order query");
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(*param);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(order_from_row).collect()
    }

    pub async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE user_id = ? AND tenant_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .bind(&self.tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    pub async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE status = ? AND tenant_id = ? ORDER BY created_at DESC",
        )
        .bind(status.as_str())
        .bind(&self.tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    pub async fn create(&self, order: &Order) -> Result<()> {
        if !Order::is_valid_id(&order.id) {
            return Err(QaError::validation(format!("invalid order id: {}", order.id)));
        }
        if order.tenant_id != self.tenant_id {
            return Err(QaError::validation(format!(
                "order belongs to tenant {}, not {}",
                order.tenant_id, self.tenant_id
            )));
        }
        let result = sqlx::query(
            r#"INSERT INTO orders (id, user_id, course_name, amount, status, tenant_id, metadata, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(&order.course_name)
        .bind(order.amount)
        .bind(order.status.as_str())
        .bind(&order.tenant_id)
        .bind(metadata_to_text(&order.metadata)?)
        .bind(to_millis(order.created_at))
        .bind(to_millis(order.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(tenant_id = %self.tenant_id, order_id = %order.id, "order created");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(QaError::Conflict {
                details: format!("order {} already exists", order.id),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update_status(&self, order_id: &str, status: OrderStatus) -> Result<()> {
        let done = sqlx::query(
            "UPDATE orders SET status = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
        )
        .bind(status.as_str())
        .bind(to_millis(Utc::now()))
        .bind(order_id)
        .bind(&self.tenant_id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(QaError::not_found(format!("order {}", order_id)));
        }
        Ok(())
    }

    pub async fn delete(&self, order_id: &str) -> Result<()> {
        let done = sqlx::query("DELETE FROM orders WHERE id = ? AND tenant_id = ?")
            .bind(order_id)
            .bind(&self.tenant_id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(QaError::not_found(format!("order {}", order_id)));
        }
        Ok(())
    }

    /// 分页列出，按创建时间倒序
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE tenant_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(&self.tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE tenant_id = ?")
            .bind(&self.tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DatabaseProvisioner, InMemoryProvisioner};
    use qa_core::Tenant;

    async fn repo(tenant: &str) -> OrderRepository {
        InMemoryProvisioner::new()
            .open(&Tenant::new(tenant, "").unwrap())
            .await
            .unwrap()
            .orders()
    }

    fn order(id: &str, tenant: &str, user: &str) -> Order {
        Order::new(id, tenant, user, "Rust 入门", 199.0).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = repo("t1").await;
        repo.create(&order("#20251114001", "t1", "u1")).await.unwrap();

        let found = repo.find_by_id("#20251114001").await.unwrap();
        assert_eq!(found.user_id, "u1");
        assert_eq!(found.status, OrderStatus::Pending);
        assert_eq!(found.amount, 199.0);

        let missing = repo.find_by_id("#20251114002").await.unwrap_err();
        assert!(matches!(missing, QaError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let repo = repo("t1").await;
        repo.create(&order("#20251114001", "t1", "u1")).await.unwrap();
        let err = repo
            .create(&order("#20251114001", "t1", "u2"))
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_rejects_foreign_tenant_order() {
        let repo = repo("t1").await;
        let err = repo
            .create(&order("#20251114001", "t2", "u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_status_and_listing() {
        let repo = repo("t1").await;
        repo.create(&order("#20251114001", "t1", "u1")).await.unwrap();
        repo.create(&order("#20251114002", "t1", "u1")).await.unwrap();
        repo.create(&order("#20251114003", "t1", "u2")).await.unwrap();

        repo.update_status("#20251114002", OrderStatus::Paid)
            .await
            .unwrap();
        assert_eq!(repo.find_by_status(OrderStatus::Paid).await.unwrap().len(), 1);
        assert_eq!(repo.find_by_user("u1").await.unwrap().len(), 2);
        assert_eq!(repo.count().await.unwrap(), 3);
        assert_eq!(repo.list(2, 0).await.unwrap().len(), 2);
        assert_eq!(repo.list(10, 2).await.unwrap().len(), 1);

        assert!(matches!(
            repo.update_status("#20251114009", OrderStatus::Paid).await,
            Err(QaError::NotFound { .. })
        ));
        repo.delete("#20251114003").await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_read_only_query_gate() {
        let repo = repo("t1").await;
        repo.create(&order("#20251114001", "t1", "u1")).await.unwrap();

        let rows = repo
            .query_read_only("SELECT * FROM orders WHERE user_id = ?", &["u1"])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let err = repo
            .query_read_only("DELETE FROM orders", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::UnsafeQueryRejected { .. }));
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
