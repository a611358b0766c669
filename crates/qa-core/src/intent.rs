use serde::{Deserialize, Serialize};

use crate::{MetaValue, Metadata};

/// 路由类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Course,
    Order,
    Direct,
    Handoff,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Course => "course",
            IntentType::Order => "order",
            IntentType::Direct => "direct",
            IntentType::Handoff => "handoff",
        }
    }

    /// 解析分类器输出的标签，大小写与首尾空白不敏感
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "course" => Some(IntentType::Course),
            "order" => Some(IntentType::Order),
            "direct" => Some(IntentType::Direct),
            "handoff" => Some(IntentType::Handoff),
            _ => None,
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 意图识别结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub kind: IntentType,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Intent {
    pub fn new(kind: IntentType, confidence: f64) -> Self {
        Self {
            kind,
            confidence,
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn reason(&self) -> Option<&str> {
        self.metadata.get("reason").and_then(MetaValue::as_str)
    }

    pub fn is_confident(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        assert_eq!(IntentType::parse(" Course "), Some(IntentType::Course));
        assert_eq!(IntentType::parse("ORDER"), Some(IntentType::Order));
        assert_eq!(IntentType::parse("refund"), None);
    }

    #[test]
    fn test_serialized_type_field() {
        let intent = Intent::new(IntentType::Direct, 0.9).with_meta("reason", "问候");
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["type"], "direct");
        assert_eq!(intent.reason(), Some("问候"));
        assert!(intent.is_confident(0.7));
    }
}
