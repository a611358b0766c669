//! 知识库检索问答与向量内容管理。

mod admin;
mod prompt;
mod retriever;

pub use admin::DocumentAdmin;
pub use retriever::{RetrievalAnswer, Retriever, RetrieverConfig, RetrieverExecutors};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use qa_store::InMemoryProvisioner;
    use qa_tenant::TenantManager;
    use qa_vector::MemoryVectorBackend;

    pub fn tenants() -> Arc<TenantManager> {
        Arc::new(TenantManager::new(
            Arc::new(MemoryVectorBackend::new()),
            Arc::new(InMemoryProvisioner::new()),
            3,
        ))
    }
}
