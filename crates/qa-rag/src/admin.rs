use std::sync::Arc;

use qa_core::{Document, Metadata};
use qa_error::{QaError, Result};
use qa_llm::EmbedModel;
use qa_resilience::{CancellationToken, ResilientExecutor};
use qa_tenant::TenantManager;
use tracing::{info, instrument};

/// 知识库文档管理，所有操作都经由租户管理器定位集合
pub struct DocumentAdmin {
    tenants: Arc<TenantManager>,
    embedder: Arc<dyn EmbedModel>,
    embedding: ResilientExecutor,
}

impl DocumentAdmin {
    pub fn new(tenants: Arc<TenantManager>, embedder: Arc<dyn EmbedModel>) -> Self {
        Self {
            tenants,
            embedder,
            embedding: ResilientExecutor::passthrough("embedding"),
        }
    }

    pub fn with_executor(mut self, embedding: ResilientExecutor) -> Self {
        self.embedding = embedding;
        self
    }

    /// 批量向量化后写入，返回新文档 ID（与输入顺序一致）
    #[instrument(skip(self, texts, metadata, cancel), fields(count = texts.len()))]
    pub async fn add_documents(
        &self,
        tenant_id: &str,
        texts: Vec<String>,
        metadata: Metadata,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Err(QaError::validation("texts cannot be empty"));
        }
        if let Some(i) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(QaError::validation(format!("text at index {} is empty", i)));
        }
        let resources = self.tenants.resolve(tenant_id).await?;

        let vectors = self
            .embedding
            .execute(cancel, || self.embedder.embed(&texts))
            .await?;
        if vectors.len() != texts.len() {
            return Err(QaError::EmbeddingService {
                provider: "embedding".to_string(),
                message: format!("expected {} vectors, got {}", texts.len(), vectors.len()),
                retry_after: None,
            });
        }

        let documents: Vec<Document> = texts
            .into_iter()
            .zip(vectors)
            .map(|(text, vector)| {
                Document::new(resources.tenant_id(), text)
                    .with_vector(vector)
                    .with_metadata(metadata.clone())
            })
            .collect();
        let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
        resources.vectors.insert(documents).await?;

        info!(tenant_id = %resources.tenant_id(), count = ids.len(), "documents added");
        Ok(ids)
    }

    pub async fn delete_documents(&self, tenant_id: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Err(QaError::validation("ids cannot be empty"));
        }
        let resources = self.tenants.resolve(tenant_id).await?;
        let deleted = resources.vectors.delete(ids).await?;
        info!(tenant_id = %resources.tenant_id(), deleted, "documents deleted");
        Ok(deleted)
    }

    pub async fn document_count(&self, tenant_id: &str) -> Result<u64> {
        self.tenants.resolve(tenant_id).await?.vectors.count().await
    }

    pub async fn get_document(&self, tenant_id: &str, id: &str) -> Result<Document> {
        self.tenants.resolve(tenant_id).await?.vectors.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tenants;
    use qa_core::MetaValue;
    use qa_llm::mock::MockEmbedModel;

    #[tokio::test]
    async fn test_add_get_delete() {
        let admin = DocumentAdmin::new(tenants(), Arc::new(MockEmbedModel::new(vec![1.0, 0.0, 0.0])));
        let cancel = CancellationToken::new();
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), MetaValue::from("faq.md"));

        let ids = admin
            .add_documents(
                "t1",
                vec!["Rust 课程 12 课时".to_string(), "支持七天无理由退款".to_string()],
                metadata,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(admin.document_count("t1").await.unwrap(), 2);
        assert_eq!(admin.document_count("t2").await.unwrap(), 0);

        let doc = admin.get_document("t1", &ids[1]).await.unwrap();
        assert_eq!(doc.content, "支持七天无理由退款");
        assert_eq!(doc.metadata["source"].as_str(), Some("faq.md"));
        assert!(matches!(
            admin.get_document("t2", &ids[1]).await,
            Err(QaError::NotFound { .. })
        ));

        assert_eq!(admin.delete_documents("t1", &ids[..1]).await.unwrap(), 1);
        assert_eq!(admin.document_count("t1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_empty_input_and_embed_failure() {
        let admin = DocumentAdmin::new(tenants(), Arc::new(MockEmbedModel::failing()));
        let cancel = CancellationToken::new();
        assert!(matches!(
            admin.add_documents("t1", vec![], Metadata::new(), &cancel).await,
            Err(QaError::Validation { .. })
        ));
        assert!(matches!(
            admin
                .add_documents("t1", vec!["  ".to_string()], Metadata::new(), &cancel)
                .await,
            Err(QaError::Validation { .. })
        ));
        assert!(matches!(
            admin
                .add_documents("t1", vec!["课程".to_string()], Metadata::new(), &cancel)
                .await,
            Err(QaError::EmbeddingService { .. })
        ));
        assert_eq!(admin.document_count("t1").await.unwrap(), 0);
    }
}
