use chrono::{DateTime, Utc};
use qa_error::{QaError, Result};
use serde::{Deserialize, Serialize};

use crate::Metadata;

/// 保留的默认租户，不允许删除
pub const DEFAULT_TENANT_ID: &str = "default";

const MAX_TENANT_ID_LEN: usize = 64;

/// 租户：拥有独立的向量集合与数据库
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// 向量集合名，由 id 推导
    pub collection: String,
    /// 数据库标识，由 id 推导
    pub database: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: &str, name: &str) -> Result<Self> {
        let id = Self::normalize_id(id);
        Self::validate_id(id)?;
        let name = if name.trim().is_empty() { id } else { name };
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            collection: Self::collection_name(id),
            database: Self::database_name(id),
            metadata: Metadata::new(),
            created_at: Utc::now(),
        })
    }

    /// 空租户 ID 归一化为默认租户
    pub fn normalize_id(id: &str) -> &str {
        let id = id.trim();
        if id.is_empty() {
            DEFAULT_TENANT_ID
        } else {
            id
        }
    }

    /// 租户 ID 只允许 ASCII 字母、数字、`_` 与 `-`，保证推导出的资源名互不冲突
    pub fn validate_id(id: &str) -> Result<()> {
        if id.is_empty() || id.len() > MAX_TENANT_ID_LEN {
            return Err(QaError::validation(format!(
                "tenant id length must be 1..={}",
                MAX_TENANT_ID_LEN
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(QaError::validation(format!(
                "tenant id contains invalid characters: {}",
                id
            )));
        }
        Ok(())
    }

    pub fn collection_name(id: &str) -> String {
        format!("kb_{}", id)
    }

    pub fn database_name(id: &str) -> String {
        format!("{}.db", id)
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_TENANT_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_names() {
        let tenant = Tenant::new("acme", "").unwrap();
        assert_eq!(tenant.collection, "kb_acme");
        assert_eq!(tenant.database, "acme.db");
        assert_eq!(tenant.name, "acme");
    }

    #[test]
    fn test_empty_id_is_default() {
        let tenant = Tenant::new("  ", "Default").unwrap();
        assert!(tenant.is_default());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        assert!(Tenant::new("../etc", "x").is_err());
        assert!(Tenant::new("a b", "x").is_err());
        assert!(Tenant::new(&"x".repeat(65), "x").is_err());
    }

    #[test]
    fn test_distinct_ids_never_share_resources() {
        let ids = ["a", "b", "a_b", "a-b", "kb_a", "A"];
        let tenants: Vec<Tenant> = ids.iter().map(|id| Tenant::new(id, "").unwrap()).collect();
        for (i, x) in tenants.iter().enumerate() {
            for y in tenants.iter().skip(i + 1) {
                assert_ne!(x.collection, y.collection);
                assert_ne!(x.database, y.database);
            }
        }
    }
}
