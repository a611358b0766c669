use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qa_core::Document;
use qa_error::{QaError, Result};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::{cosine_similarity, VectorProvisioner, VectorStore};

#[derive(Debug, Default)]
struct CollectionData {
    dimension: usize,
    documents: Vec<Document>,
}

type Collections = Arc<RwLock<HashMap<String, CollectionData>>>;

/// 进程内向量后端，用于开发与测试
#[derive(Clone, Default)]
pub struct MemoryVectorBackend {
    collections: Collections,
}

impl MemoryVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl VectorProvisioner for MemoryVectorBackend {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        if !collections.contains_key(name) {
            collections.insert(
                name.to_string(),
                CollectionData {
                    dimension,
                    documents: Vec::new(),
                },
            );
            info!(collection = %name, dimension, "created memory collection");
        }
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        if self.collections.write().await.remove(name).is_some() {
            info!(collection = %name, "dropped memory collection");
        }
        Ok(())
    }

    fn open(&self, name: &str, tenant_id: &str) -> Arc<dyn VectorStore> {
        Arc::new(MemoryCollection {
            name: name.to_string(),
            tenant_id: tenant_id.to_string(),
            collections: self.collections.clone(),
        })
    }
}

/// 内存集合句柄
pub struct MemoryCollection {
    name: String,
    tenant_id: String,
    collections: Collections,
}

impl MemoryCollection {
    fn missing(&self) -> QaError {
        QaError::VectorStore {
            operation: "open_collection".to_string(),
            message: format!("collection {} does not exist", self.name),
        }
    }
}

#[async_trait]
impl VectorStore for MemoryCollection {
    fn collection(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, vector), fields(collection = %self.name))]
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        let data = collections.get(&self.name).ok_or_else(|| self.missing())?;

        let mut scored: Vec<(f32, &Document)> = data
            .documents
            .iter()
            .map(|doc| {
                let score = doc
                    .vector
                    .as_deref()
                    .map(|v| cosine_similarity(vector, v))
                    .unwrap_or(0.0);
                (score, doc)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let results: Vec<Document> = scored
            .into_iter()
            .take(top_k)
            .map(|(score, doc)| Document {
                score,
                vector: None,
                tenant_id: self.tenant_id.clone(),
                ..doc.clone()
            })
            .collect();
        debug!(hits = results.len(), "memory search completed");
        Ok(results)
    }

    async fn insert(&self, documents: Vec<Document>) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let data = collections.get_mut(&self.name).ok_or_else(|| self.missing())?;

        for doc in &documents {
            match doc.vector.as_ref() {
                Some(v) if v.len() == data.dimension => {}
                Some(v) => {
                    return Err(QaError::validation(format!(
                        "vector dimension {} does not match collection dimension {}",
                        v.len(),
                        data.dimension
                    )))
                }
                None => {
                    return Err(QaError::validation(format!(
                        "document {} has no vector",
                        doc.id
                    )))
                }
            }
        }

        let inserted = documents.len();
        for mut doc in documents {
            doc.tenant_id = self.tenant_id.clone();
            data.documents.retain(|d| d.id != doc.id);
            data.documents.push(doc);
        }
        Ok(inserted)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let data = collections.get_mut(&self.name).ok_or_else(|| self.missing())?;
        let before = data.documents.len();
        data.documents.retain(|d| !ids.contains(&d.id));
        Ok(before - data.documents.len())
    }

    async fn get(&self, id: &str) -> Result<Document> {
        let collections = self.collections.read().await;
        let data = collections.get(&self.name).ok_or_else(|| self.missing())?;
        data.documents
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| QaError::not_found(format!("document {}", id)))
    }

    async fn count(&self) -> Result<u64> {
        let collections = self.collections.read().await;
        let data = collections.get(&self.name).ok_or_else(|| self.missing())?;
        Ok(data.documents.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collection(backend: &MemoryVectorBackend, name: &str) -> Arc<dyn VectorStore> {
        backend.ensure_collection(name, 2).await.unwrap();
        backend.open(name, "t1")
    }

    #[tokio::test]
    async fn test_search_orders_by_score() {
        let backend = MemoryVectorBackend::new();
        let store = collection(&backend, "kb_t1").await;
        store
            .insert(vec![
                Document::new("t1", "far").with_vector(vec![0.0, 1.0]),
                Document::new("t1", "near").with_vector(vec![1.0, 0.1]),
                Document::new("t1", "exact").with_vector(vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "exact");
        assert_eq!(hits[1].content, "near");
        assert!(hits[0].score >= hits[1].score);
        assert!(hits[0].vector.is_none());
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let backend = MemoryVectorBackend::new();
        let a = collection(&backend, "kb_a").await;
        let b = collection(&backend, "kb_b").await;
        a.insert(vec![Document::new("a", "secret").with_vector(vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(a.count().await.unwrap(), 1);
        assert_eq!(b.count().await.unwrap(), 0);
        assert!(b.search(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_crud_and_dimension_check() {
        let backend = MemoryVectorBackend::new();
        let store = collection(&backend, "kb_t1").await;
        let doc = Document::new("t1", "hello").with_vector(vec![0.5, 0.5]);
        let id = doc.id.clone();
        store.insert(vec![doc]).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().content, "hello");

        let bad = Document::new("t1", "bad").with_vector(vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            store.insert(vec![bad]).await,
            Err(QaError::Validation { .. })
        ));

        assert_eq!(store.delete(&[id.clone(), "missing".into()]).await.unwrap(), 1);
        assert!(matches!(store.get(&id).await, Err(QaError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent_and_drop_removes() {
        let backend = MemoryVectorBackend::new();
        let store = collection(&backend, "kb_t1").await;
        store
            .insert(vec![Document::new("t1", "x").with_vector(vec![1.0, 1.0])])
            .await
            .unwrap();
        backend.ensure_collection("kb_t1", 2).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        backend.drop_collection("kb_t1").await.unwrap();
        assert!(!backend.collection_exists("kb_t1").await.unwrap());
        assert!(store.count().await.is_err());
    }
}
