use std::sync::Arc;

use once_cell::sync::Lazy;
use qa_core::Order;
use qa_error::{QaError, Result};
use qa_llm::{ChatMessage, ChatModel};
use qa_resilience::{CancellationToken, ResilientExecutor};
use qa_tenant::TenantManager;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::json::strip_code_fence;

/// 按顺序尝试，首个命中即采用
static ORDER_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"#(\d{11,})",
        r"订单号?\s*[：:]\s*#?(\d{11,})",
        r"(?i)\b(?:order(?:\s*id)?|id)\s*[:：]\s*#?(\d{11,})",
        r"(\d{11,})",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

const EXTRACT_SYSTEM_PROMPT: &str = r#"你是一个订单号提取助手。从用户的查询中提取订单号。

订单号特征：
- 通常是11位或更长的数字
- 可能以 # 开头
- 可能在"订单号"、"订单"等词后面

请以 JSON 格式返回结果：
{
  "order_id": "提取到的订单号（只包含数字，不包含#）",
  "found": true/false
}

如果没有找到订单号，返回：
{
  "order_id": "",
  "found": false
}"#;

const FORMAT_SYSTEM_PROMPT: &str = r#"你是一个专业的客服助手。根据订单信息，用自然、友好的语言回答用户的问题。

要求：
1. 语气友好、专业
2. 信息准确、完整
3. 根据用户的具体问题重点回答
4. 如果订单状态异常，提供相应的建议"#;

pub const MISSING_ORDER_ID_MESSAGE: &str =
    "请提供您的订单号（例如 #20251114001），以便为您查询订单信息。";

pub fn order_not_found_message(order_id: &str) -> String {
    format!("未找到订单号为 {} 的订单，请确认订单号是否正确。", order_id)
}

fn invalid_order_id_message(order_id: &str) -> String {
    format!(
        "订单号 {} 格式不正确，请提供正确的订单号（例如 #20251114001）。",
        order_id
    )
}

#[derive(Debug, Deserialize)]
struct Extraction {
    #[serde(default)]
    order_id: String,
    #[serde(default)]
    found: bool,
}

/// 用正则从文本中提取订单号，统一为 `#digits` 形式
pub fn extract_order_id(text: &str) -> Option<String> {
    ORDER_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| format!("#{}", m.as_str()))
}

/// 订单查询：提取订单号 → 按 (id, tenant) 查询 → 自然语言回复
pub struct OrderLookup {
    tenants: Arc<TenantManager>,
    chat: Arc<dyn ChatModel>,
    llm: ResilientExecutor,
    db: ResilientExecutor,
}

impl OrderLookup {
    pub fn new(tenants: Arc<TenantManager>, chat: Arc<dyn ChatModel>) -> Self {
        Self {
            tenants,
            chat,
            llm: ResilientExecutor::passthrough("order_llm"),
            db: ResilientExecutor::passthrough("order_db"),
        }
    }

    pub fn with_executors(mut self, llm: ResilientExecutor, db: ResilientExecutor) -> Self {
        self.llm = llm;
        self.db = db;
        self
    }

    /// 缺少订单号或订单不存在时返回提示文本而不是错误
    #[instrument(skip(self, cancel), fields(tenant_id = %tenant_id))]
    pub async fn query(&self, tenant_id: &str, query: &str, cancel: &CancellationToken) -> Result<String> {
        let order_id = match extract_order_id(query) {
            Some(id) => id,
            None => match self.extract_with_llm(query, cancel).await? {
                Some(id) => id,
                None => return Ok(MISSING_ORDER_ID_MESSAGE.to_string()),
            },
        };
        if !Order::is_valid_id(&order_id) {
            debug!(order_id = %order_id, "order id has wrong format");
            return Ok(invalid_order_id_message(&order_id));
        }

        let orders = self.tenants.resolve(tenant_id).await?.orders;
        // 未找到属于正常结果，不计入熔断
        let found = self
            .db
            .execute(cancel, || {
                let orders = orders.clone();
                let order_id = order_id.clone();
                async move {
                    match orders.find_by_id(&order_id).await {
                        Ok(order) => Ok(Some(order)),
                        Err(QaError::NotFound { .. }) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        let Some(order) = found else {
            info!(order_id = %order_id, "order not found");
            return Ok(order_not_found_message(&order_id));
        };

        self.format_order(query, &order, cancel).await
    }

    async fn extract_with_llm(&self, query: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        let messages = vec![
            ChatMessage::system(EXTRACT_SYSTEM_PROMPT),
            ChatMessage::user(format!("用户查询：{}\n\n请提取订单号。", query)),
        ];
        let raw = self
            .llm
            .execute(cancel, || self.chat.generate(&messages))
            .await?;
        let extraction: Extraction = serde_json::from_str(strip_code_fence(&raw))?;

        let digits = extraction.order_id.trim().trim_start_matches('#');
        if !extraction.found || digits.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("#{}", digits)))
    }

    async fn format_order(&self, query: &str, order: &Order, cancel: &CancellationToken) -> Result<String> {
        let info = format!(
            "订单信息：\n- 订单号：{}\n- 课程名称：{}\n- 订单金额：{:.2} 元\n- 订单状态：{}\n- 创建时间：{}",
            order.id,
            order.course_name,
            order.amount,
            order.status.label(),
            order.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
        let messages = vec![
            ChatMessage::system(FORMAT_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "{}\n\n用户问题：{}\n\n请根据订单信息回答用户问题。",
                info, query
            )),
        ];
        self.llm
            .execute(cancel, || self.chat.generate(&messages))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tenants;
    use qa_llm::mock::ScriptedChatModel;

    #[test]
    fn test_pattern_order() {
        assert_eq!(
            extract_order_id("帮我查一下订单 #20251114001 的状态").as_deref(),
            Some("#20251114001")
        );
        assert_eq!(
            extract_order_id("订单号：20251114002").as_deref(),
            Some("#20251114002")
        );
        assert_eq!(
            extract_order_id("Order ID: 20251114003 please").as_deref(),
            Some("#20251114003")
        );
        assert_eq!(
            extract_order_id("我的订单20251114004怎么还没到").as_deref(),
            Some("#20251114004")
        );
        // 带 # 的优先于其他数字
        assert_eq!(
            extract_order_id("电话 13800138000，订单 #20251114005").as_deref(),
            Some("#20251114005")
        );
        assert_eq!(extract_order_id("我的订单还没到"), None);
        assert_eq!(extract_order_id("单号 2025111"), None);
    }

    #[tokio::test]
    async fn test_missing_order_returns_not_found_text() {
        let chat = Arc::new(ScriptedChatModel::fixed("unused"));
        let lookup = OrderLookup::new(tenants(), chat.clone());
        let answer = lookup
            .query("t1", "查询订单 #20251114001", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, order_not_found_message("#20251114001"));
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn test_found_order_is_formatted() {
        let tenants = tenants();
        let resources = tenants.resolve("t1").await.unwrap();
        let mut order = Order::new("#20251114001", "t1", "u1", "Rust 入门", 199.0).unwrap();
        order.update_status(qa_core::OrderStatus::Paid);
        resources.orders.create(&order).await.unwrap();

        let chat = Arc::new(ScriptedChatModel::fixed("您的订单已支付。"));
        let lookup = OrderLookup::new(tenants.clone(), chat.clone());
        let answer = lookup
            .query("t1", "#20251114001 付款了吗", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, "您的订单已支付。");
        let prompt = &chat.calls()[0][1].content;
        assert!(prompt.contains("订单金额：199.00 元"));
        assert!(prompt.contains("订单状态：已支付"));

        // 其他租户看不到这笔订单
        let answer = lookup
            .query("t2", "#20251114001 付款了吗", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, order_not_found_message("#20251114001"));
    }

    #[tokio::test]
    async fn test_llm_extraction_fallback() {
        let chat = Arc::new(ScriptedChatModel::fixed(r#"{"order_id": "", "found": false}"#));
        let lookup = OrderLookup::new(tenants(), chat.clone());
        let answer = lookup
            .query("t1", "我的订单怎么样了", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, MISSING_ORDER_ID_MESSAGE);
        assert_eq!(chat.call_count(), 1);

        let chat = Arc::new(ScriptedChatModel::fixed(r#"{"order_id": "2025111400", "found": true}"#));
        let lookup = OrderLookup::new(tenants(), chat);
        let answer = lookup
            .query("t1", "订单二零二五", &CancellationToken::new())
            .await
            .unwrap();
        assert!(answer.contains("格式不正确"));
    }

    #[tokio::test]
    async fn test_over_long_id_is_rejected_before_lookup() {
        let lookup = OrderLookup::new(tenants(), Arc::new(ScriptedChatModel::fixed("unused")));
        let answer = lookup
            .query("t1", "#202511140019", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, invalid_order_id_message("#202511140019"));
    }
}
