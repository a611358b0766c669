//! 向量检索能力契约与两种实现：进程内存储与 Qdrant。

use std::sync::Arc;

use async_trait::async_trait;
use qa_core::Document;
use qa_error::Result;

pub mod memory;
pub mod qdrant;

pub use memory::MemoryVectorBackend;
pub use qdrant::QdrantVectorBackend;

/// 单个租户集合上的向量操作
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection(&self) -> &str;

    /// 按相似度降序返回至多 top_k 个文档，`score` 为相似度
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<Document>>;

    /// 写入文档（需带向量），同 id 覆盖
    async fn insert(&self, documents: Vec<Document>) -> Result<usize>;

    async fn delete(&self, ids: &[String]) -> Result<usize>;

    async fn get(&self, id: &str) -> Result<Document>;

    async fn count(&self) -> Result<u64>;
}

/// 集合生命周期管理
#[async_trait]
pub trait VectorProvisioner: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// 幂等：集合已存在时跳过创建
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()>;

    async fn drop_collection(&self, name: &str) -> Result<()>;

    /// 打开集合句柄，结果文档的 tenant_id 取自参数
    fn open(&self, name: &str, tenant_id: &str) -> Arc<dyn VectorStore>;
}

/// 计算余弦相似度
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    let len = a.len().min(b.len());
    for i in 0..len {
        dot_product += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a.sqrt() * norm_b.sqrt())
}
