use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qa_core::{Document, Metadata};
use qa_error::{QaError, Result};
use qdrant_client::{
    qdrant::{
        point_id::PointIdOptions, points_selector::PointsSelectorOneOf,
        with_payload_selector::SelectorOptions, CountPoints, CreateCollectionBuilder,
        DeleteCollectionBuilder, DeletePoints, Distance, GetPoints, PointId, PointStruct,
        PointsIdsList, PointsSelector, SearchPoints, UpsertPoints, Value, VectorParamsBuilder,
        WithPayloadSelector,
    },
    Qdrant,
};
use tracing::{info, instrument, warn};

const CONTENT_KEY: &str = "content";
const TENANT_KEY: &str = "tenant_id";
const METADATA_KEY: &str = "metadata";

/// Qdrant 后端，集合名即租户的 collection 名
#[derive(Clone)]
pub struct QdrantVectorBackend {
    client: Qdrant,
}

impl QdrantVectorBackend {
    pub fn connect(url: &str, api_key: Option<String>) -> Result<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder.build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl crate::VectorProvisioner for QdrantVectorBackend {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        Ok(self.client.collection_exists(&name).await?)
    }

    #[instrument(skip(self))]
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let name = name.to_string();
        if self.client.collection_exists(&name).await? {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&name).vectors_config(
                    VectorParamsBuilder::new(dimension as u64, Distance::Cosine).build(),
                ),
            )
            .await?;
        info!(collection = %name, dimension, "created qdrant collection");
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        let delete_request = DeleteCollectionBuilder::new(&name).build();
        self.client.delete_collection(delete_request).await?;
        info!(collection = %name, "deleted qdrant collection");
        Ok(())
    }

    fn open(&self, name: &str, tenant_id: &str) -> Arc<dyn crate::VectorStore> {
        Arc::new(QdrantCollection {
            client: self.client.clone(),
            name: name.to_string(),
            tenant_id: tenant_id.to_string(),
        })
    }
}

pub struct QdrantCollection {
    client: Qdrant,
    name: String,
    tenant_id: String,
}

fn with_payload() -> Option<WithPayloadSelector> {
    Some(WithPayloadSelector {
        selector_options: Some(SelectorOptions::Enable(true)),
    })
}

fn string_value(s: String) -> Value {
    Value {
        kind: Some(qdrant_client::qdrant::value::Kind::StringValue(s)),
    }
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(qdrant_client::qdrant::value::Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|p| p.point_id_options) {
        Some(PointIdOptions::Uuid(s)) => s,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

impl QdrantCollection {
    fn to_payload(&self, doc: &Document) -> Result<HashMap<String, Value>> {
        let mut payload = HashMap::new();
        payload.insert(CONTENT_KEY.to_string(), string_value(doc.content.clone()));
        payload.insert(TENANT_KEY.to_string(), string_value(self.tenant_id.clone()));
        payload.insert(
            METADATA_KEY.to_string(),
            string_value(serde_json::to_string(&doc.metadata)?),
        );
        Ok(payload)
    }

    fn from_payload(&self, id: Option<PointId>, payload: HashMap<String, Value>, score: f32) -> Document {
        let metadata: Metadata = payload_str(&payload, METADATA_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Document {
            id: point_id_string(id),
            content: payload_str(&payload, CONTENT_KEY).unwrap_or_default(),
            vector: None,
            score,
            tenant_id: self.tenant_id.clone(),
            metadata,
        }
    }

    fn ids(ids: &[String]) -> Vec<PointId> {
        ids.iter().map(|id| PointId::from(id.clone())).collect()
    }
}

#[async_trait]
impl crate::VectorStore for QdrantCollection {
    fn collection(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, vector), fields(collection = %self.name))]
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<Document>> {
        let request = SearchPoints {
            collection_name: self.name.clone(),
            vector: vector.to_vec(),
            limit: top_k as u64,
            with_payload: with_payload(),
            ..Default::default()
        };
        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| QaError::VectorStore {
                operation: "search".to_string(),
                message: e.to_string(),
            })?;

        Ok(response
            .result
            .into_iter()
            .map(|p| self.from_payload(p.id, p.payload, p.score))
            .collect())
    }

    async fn insert(&self, documents: Vec<Document>) -> Result<usize> {
        let mut points = Vec::with_capacity(documents.len());
        for doc in &documents {
            let vector = doc.vector.clone().ok_or_else(|| {
                QaError::validation(format!("document {} has no vector", doc.id))
            })?;
            points.push(PointStruct {
                id: Some(doc.id.clone().into()),
                vectors: Some(vector.into()),
                payload: self.to_payload(doc)?,
            });
        }
        let count = points.len();
        let request = UpsertPoints {
            collection_name: self.name.clone(),
            wait: Some(true),
            points,
            ..Default::default()
        };
        self.client
            .upsert_points(request)
            .await
            .map_err(|e| QaError::VectorStore {
                operation: "upsert_points".to_string(),
                message: e.to_string(),
            })?;
        info!(collection = %self.name, count, "upserted points");
        Ok(count)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        // Qdrant 不返回删除数量，先查出实际存在的点
        let existing = self
            .client
            .get_points(GetPoints {
                collection_name: self.name.clone(),
                ids: Self::ids(ids),
                ..Default::default()
            })
            .await?
            .result
            .len();

        let request = DeletePoints {
            collection_name: self.name.clone(),
            wait: Some(true),
            points: Some(PointsSelector {
                points_selector_one_of: Some(PointsSelectorOneOf::Points(PointsIdsList {
                    ids: Self::ids(ids),
                })),
            }),
            ..Default::default()
        };
        if let Err(e) = self.client.delete_points(request).await {
            warn!(collection = %self.name, error = %e, "delete points failed");
            return Err(e.into());
        }
        Ok(existing)
    }

    async fn get(&self, id: &str) -> Result<Document> {
        let response = self
            .client
            .get_points(GetPoints {
                collection_name: self.name.clone(),
                ids: Self::ids(&[id.to_string()]),
                with_payload: with_payload(),
                ..Default::default()
            })
            .await?;
        response
            .result
            .into_iter()
            .next()
            .map(|p| self.from_payload(p.id, p.payload, 0.0))
            .ok_or_else(|| QaError::not_found(format!("document {}", id)))
    }

    async fn count(&self) -> Result<u64> {
        let response = self
            .client
            .count(CountPoints {
                collection_name: self.name.clone(),
                exact: Some(true),
                ..Default::default()
            })
            .await?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}
