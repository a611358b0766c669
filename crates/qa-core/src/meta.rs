use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 实体元数据
pub type Metadata = BTreeMap<String, MetaValue>;

/// 元数据值，仅支持可序列化的几类基本值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Map(Metadata),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Number(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl From<Metadata> for MetaValue {
    fn from(value: Metadata) -> Self {
        MetaValue::Map(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_json_shape() {
        let mut inner = Metadata::new();
        inner.insert("page".to_string(), 3.0.into());
        let mut meta = Metadata::new();
        meta.insert("source".to_string(), "faq.md".into());
        meta.insert("pinned".to_string(), true.into());
        meta.insert("loc".to_string(), inner.into());

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"loc": {"page": 3.0}, "pinned": true, "source": "faq.md"})
        );

        let parsed: Metadata = serde_json::from_str(r#"{"n": 7, "s": "x"}"#).unwrap();
        assert_eq!(parsed["n"].as_f64(), Some(7.0));
        assert_eq!(parsed["s"].as_str(), Some("x"));
    }
}
