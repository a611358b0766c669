//! 租户资源管理：按租户惰性创建并缓存向量集合与数据库句柄。
//!
//! 所有策略只能经由 [`TenantManager`] 获取租户资源，这里是跨租户隔离的唯一入口。

use std::collections::HashMap;
use std::sync::Arc;

use qa_core::{Tenant, DEFAULT_TENANT_ID};
use qa_error::{QaError, Result};
use qa_store::{DatabaseProvisioner, MissedQueryRepository, OrderRepository, SessionStore, TenantDb};
use qa_vector::{VectorProvisioner, VectorStore};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// 单个租户已就绪的资源
#[derive(Clone)]
pub struct TenantResources {
    pub tenant: Arc<Tenant>,
    pub vectors: Arc<dyn VectorStore>,
    pub db: TenantDb,
    pub sessions: Arc<dyn SessionStore>,
    pub orders: OrderRepository,
    pub missed: MissedQueryRepository,
}

impl TenantResources {
    pub fn tenant_id(&self) -> &str {
        &self.tenant.id
    }
}

/// 租户详情
#[derive(Debug, Clone, Serialize)]
pub struct TenantInfo {
    pub tenant: Tenant,
    pub collection: String,
    pub database: String,
    pub collection_exists: bool,
    pub document_count: u64,
}

pub struct TenantManager {
    vectors: Arc<dyn VectorProvisioner>,
    databases: Arc<dyn DatabaseProvisioner>,
    dimension: usize,
    cache: RwLock<HashMap<String, TenantResources>>,
}

impl TenantManager {
    pub fn new(
        vectors: Arc<dyn VectorProvisioner>,
        databases: Arc<dyn DatabaseProvisioner>,
        dimension: usize,
    ) -> Self {
        Self {
            vectors,
            databases,
            dimension,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 获取租户资源，首次访问时创建
    ///
    /// 读锁命中直接返回；未命中时持写锁二次检查，保证同一租户只初始化一次。
    #[instrument(skip(self))]
    pub async fn resolve(&self, tenant_id: &str) -> Result<TenantResources> {
        let id = Tenant::normalize_id(tenant_id);
        if let Some(resources) = self.cache.read().await.get(id) {
            return Ok(resources.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(resources) = cache.get(id) {
            return Ok(resources.clone());
        }
        let tenant = Tenant::new(id, id)?;
        info!(tenant_id = %tenant.id, "initializing new tenant");
        let resources = self.provision(tenant).await?;
        cache.insert(resources.tenant.id.clone(), resources.clone());
        Ok(resources)
    }

    async fn provision(&self, tenant: Tenant) -> Result<TenantResources> {
        self.vectors
            .ensure_collection(&tenant.collection, self.dimension)
            .await?;
        let db = self.databases.open(&tenant).await?;
        let vectors = self.vectors.open(&tenant.collection, &tenant.id);
        info!(
            tenant_id = %tenant.id,
            collection = %tenant.collection,
            database = %db.location(),
            "tenant initialized"
        );
        Ok(TenantResources {
            sessions: Arc::new(db.sessions()),
            orders: db.orders(),
            missed: db.missed_queries(),
            tenant: Arc::new(tenant),
            vectors,
            db,
        })
    }

    /// 缓存命中，或向量集合与数据库都已存在
    pub async fn exists(&self, tenant_id: &str) -> Result<bool> {
        let id = Tenant::normalize_id(tenant_id);
        if self.cache.read().await.contains_key(id) {
            return Ok(true);
        }
        let tenant = Tenant::new(id, id)?;
        if !self.vectors.collection_exists(&tenant.collection).await? {
            return Ok(false);
        }
        self.databases.exists(&tenant).await
    }

    /// 显式创建租户；已存在时返回现有租户
    #[instrument(skip(self))]
    pub async fn create(&self, tenant_id: &str, name: &str) -> Result<Tenant> {
        if tenant_id.trim().is_empty() {
            return Err(QaError::validation("tenant id cannot be empty"));
        }
        let tenant = Tenant::new(tenant_id, name)?;

        let mut cache = self.cache.write().await;
        if let Some(existing) = cache.get(&tenant.id) {
            info!(tenant_id = %tenant.id, "tenant already exists");
            return Ok(existing.tenant.as_ref().clone());
        }
        let resources = self.provision(tenant).await?;
        let created = resources.tenant.as_ref().clone();
        cache.insert(created.id.clone(), resources);
        info!(tenant_id = %created.id, name = %created.name, "tenant created");
        Ok(created)
    }

    /// 删除租户及其全部资源；默认租户不可删除
    ///
    /// 集合与数据库两侧都尽力删除，失败只记录日志，最后移除缓存。
    #[instrument(skip(self))]
    pub async fn delete(&self, tenant_id: &str) -> Result<()> {
        let id = Tenant::normalize_id(tenant_id);
        if id == DEFAULT_TENANT_ID {
            return Err(QaError::validation("cannot delete default tenant"));
        }
        let tenant = Tenant::new(id, id)?;
        info!(tenant_id = %tenant.id, "deleting tenant");

        let cached = self.cache.read().await.get(id).cloned();
        if let Err(e) = self.vectors.drop_collection(&tenant.collection).await {
            warn!(tenant_id = %tenant.id, error = %e, "failed to drop tenant collection");
        }
        if let Some(resources) = &cached {
            resources.db.close().await;
        }
        if let Err(e) = self.databases.remove(&tenant).await {
            warn!(tenant_id = %tenant.id, error = %e, "failed to remove tenant database");
        }

        self.cache.write().await.remove(id);
        info!(tenant_id = %tenant.id, "tenant deleted");
        Ok(())
    }

    /// 已缓存的租户 ID，按字典序
    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cache.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
        info!("tenant cache cleared");
    }

    pub async fn info(&self, tenant_id: &str) -> Result<TenantInfo> {
        let resources = self.resolve(tenant_id).await?;
        let tenant = resources.tenant.as_ref().clone();
        let collection_exists = self
            .vectors
            .collection_exists(&tenant.collection)
            .await
            .unwrap_or(false);
        let document_count = match resources.vectors.count().await {
            Ok(n) => n,
            Err(e) => {
                warn!(tenant_id = %tenant.id, error = %e, "failed to count documents");
                0
            }
        };
        Ok(TenantInfo {
            collection: tenant.collection.clone(),
            database: resources.db.location().to_string(),
            tenant,
            collection_exists,
            document_count,
        })
    }

    /// 关闭所有已缓存的数据库连接池并清空缓存
    pub async fn close(&self) {
        let mut cache = self.cache.write().await;
        for resources in cache.values() {
            resources.db.close().await;
        }
        cache.clear();
        info!("tenant manager closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qa_core::Document;
    use qa_store::InMemoryProvisioner;
    use qa_vector::MemoryVectorBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 统计创建调用次数，可配置为失败
    #[derive(Default)]
    struct CountingProvisioner {
        inner: MemoryVectorBackend,
        ensure_calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl VectorProvisioner for CountingProvisioner {
        async fn collection_exists(&self, name: &str) -> Result<bool> {
            self.inner.collection_exists(name).await
        }

        async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
            self.ensure_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(QaError::VectorStore {
                    operation: "ensure_collection".to_string(),
                    message: "unavailable".to_string(),
                });
            }
            // 放大竞争窗口
            tokio::task::yield_now().await;
            self.inner.ensure_collection(name, dimension).await
        }

        async fn drop_collection(&self, name: &str) -> Result<()> {
            self.inner.drop_collection(name).await
        }

        fn open(&self, name: &str, tenant_id: &str) -> Arc<dyn VectorStore> {
            self.inner.open(name, tenant_id)
        }
    }

    fn manager_with(vectors: Arc<CountingProvisioner>) -> TenantManager {
        TenantManager::new(vectors, Arc::new(InMemoryProvisioner::new()), 3)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolve_provisions_once() {
        let vectors = Arc::new(CountingProvisioner::default());
        let manager = Arc::new(manager_with(vectors.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.resolve("t1").await.map(|r| r.tenant.id.clone()) })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap(), "t1");
        }
        assert_eq!(vectors.ensure_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.list().await, vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let manager = manager_with(Arc::new(CountingProvisioner::default()));
        let a = manager.resolve("a").await.unwrap();
        let b = manager.resolve("b").await.unwrap();
        assert_ne!(a.vectors.collection(), b.vectors.collection());
        assert_ne!(a.db.location(), b.db.location());

        a.vectors
            .insert(vec![Document::new("a", "退款政策").with_vector(vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(a.vectors.count().await.unwrap(), 1);
        assert_eq!(b.vectors.count().await.unwrap(), 0);

        let hits = b.vectors.search(&[1.0, 0.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_empty_id_resolves_default() {
        let manager = manager_with(Arc::new(CountingProvisioner::default()));
        let resources = manager.resolve("").await.unwrap();
        assert_eq!(resources.tenant_id(), DEFAULT_TENANT_ID);
        assert!(manager.exists("default").await.unwrap());
        assert!(!manager.exists("other").await.unwrap());
        assert!(manager.resolve("bad id!").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let vectors = Arc::new(CountingProvisioner::default());
        let manager = manager_with(vectors.clone());
        manager.resolve("default").await.unwrap();
        let err = manager.delete("").await.unwrap_err();
        assert!(matches!(err, QaError::Validation { .. }));

        let created = manager.create("acme", "Acme 教育").await.unwrap();
        assert_eq!(created.name, "Acme 教育");
        assert_eq!(created.collection, "kb_acme");
        // 重复创建返回已有租户
        assert_eq!(manager.create("acme", "other").await.unwrap().name, "Acme 教育");

        manager.delete("acme").await.unwrap();
        assert_eq!(manager.list().await, vec!["default".to_string()]);
        assert!(!vectors.inner.collection_exists("kb_acme").await.unwrap());
        assert!(!manager.exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_provisioning_leaves_no_cache_entry() {
        let vectors = Arc::new(CountingProvisioner {
            fail: true,
            ..CountingProvisioner::default()
        });
        let manager = manager_with(vectors.clone());
        assert!(manager.resolve("t1").await.is_err());
        assert!(manager.list().await.is_empty());
        // 下次访问会重新尝试
        assert!(manager.resolve("t1").await.is_err());
        assert_eq!(vectors.ensure_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_info_and_close() {
        let manager = manager_with(Arc::new(CountingProvisioner::default()));
        let info = manager.info("t1").await.unwrap();
        assert_eq!(info.collection, "kb_t1");
        assert!(info.collection_exists);
        assert_eq!(info.document_count, 0);

        manager.close().await;
        assert!(manager.list().await.is_empty());
        manager.clear_cache().await;
    }
}
