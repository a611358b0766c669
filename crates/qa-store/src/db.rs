use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use qa_core::Tenant;
use qa_error::{QaError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{MissedQueryRepository, OrderRepository, SqliteSessionStore};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// 单个租户的数据库句柄
#[derive(Clone, Debug)]
pub struct TenantDb {
    tenant_id: String,
    location: String,
    pool: SqlitePool,
}

impl TenantDb {
    /// 执行迁移后返回句柄
    pub async fn open(tenant_id: &str, location: &str, pool: SqlitePool) -> Result<Self> {
        MIGRATOR.run(&pool).await?;
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            location: location.to_string(),
            pool,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self)
    }

    pub fn sessions(&self) -> SqliteSessionStore {
        SqliteSessionStore::new(self)
    }

    pub fn missed_queries(&self) -> MissedQueryRepository {
        MissedQueryRepository::new(self)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// 数据库生命周期管理
#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    /// 打开（必要时创建）并迁移租户数据库
    async fn open(&self, tenant: &Tenant) -> Result<TenantDb>;

    async fn exists(&self, tenant: &Tenant) -> Result<bool>;

    /// 删除租户数据库；句柄应已关闭
    async fn remove(&self, tenant: &Tenant) -> Result<()>;

    fn location(&self, tenant: &Tenant) -> String;
}

/// 每个租户一个 SQLite 文件：`{base_path}/{tenant_id}.db`
pub struct SqliteProvisioner {
    base_path: PathBuf,
    max_connections: u32,
}

impl SqliteProvisioner {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            max_connections: 5,
        }
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }

    fn path(&self, tenant: &Tenant) -> PathBuf {
        self.base_path.join(&tenant.database)
    }
}

#[async_trait]
impl DatabaseProvisioner for SqliteProvisioner {
    async fn open(&self, tenant: &Tenant) -> Result<TenantDb> {
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| QaError::Database {
                operation: "create_dir".to_string(),
                message: e.to_string(),
            })?;
        let path = self.path(tenant);
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await?;
        let location = path.display().to_string();
        let db = TenantDb::open(&tenant.id, &location, pool).await?;
        info!(tenant_id = %tenant.id, path = %location, "opened tenant database");
        Ok(db)
    }

    async fn exists(&self, tenant: &Tenant) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path(tenant))
            .await
            .unwrap_or(false))
    }

    async fn remove(&self, tenant: &Tenant) -> Result<()> {
        let path = self.path(tenant);
        for suffix in ["", "-wal", "-shm"] {
            let file = PathBuf::from(format!("{}{}", path.display(), suffix));
            match tokio::fs::remove_file(&file).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "failed to remove database file");
                    return Err(QaError::Database {
                        operation: "remove_file".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        info!(tenant_id = %tenant.id, "removed tenant database");
        Ok(())
    }

    fn location(&self, tenant: &Tenant) -> String {
        self.path(tenant).display().to_string()
    }
}

/// 内存数据库，每个租户独立，进程退出即丢失
#[derive(Clone, Default)]
pub struct InMemoryProvisioner {
    opened: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatabaseProvisioner for InMemoryProvisioner {
    async fn open(&self, tenant: &Tenant) -> Result<TenantDb> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // 内存库随连接存在，池内只保留一条永不回收的连接
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = TenantDb::open(&tenant.id, &self.location(tenant), pool).await?;
        self.opened.lock().await.insert(tenant.id.clone());
        Ok(db)
    }

    async fn exists(&self, tenant: &Tenant) -> Result<bool> {
        Ok(self.opened.lock().await.contains(&tenant.id))
    }

    async fn remove(&self, tenant: &Tenant) -> Result<()> {
        self.opened.lock().await.remove(&tenant.id);
        Ok(())
    }

    fn location(&self, tenant: &Tenant) -> String {
        format!("memory:{}", tenant.database)
    }
}
