use chrono::{DateTime, NaiveDate, Utc};
use qa_error::{QaError, Result};
use serde::{Deserialize, Serialize};

use crate::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Refunded,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "refunded" => Some(OrderStatus::Refunded),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// 面向用户的中文状态名
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "待支付",
            OrderStatus::Paid => "已支付",
            OrderStatus::Refunded => "已退款",
            OrderStatus::Cancelled => "已取消",
        }
    }
}

/// 订单
///
/// 订单号格式：`#` + 8 位日期 + 3 位序号，例如 `#20251114001`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub course_name: String,
    pub amount: f64,
    pub status: OrderStatus,
    pub tenant_id: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        id: &str,
        tenant_id: &str,
        user_id: &str,
        course_name: &str,
        amount: f64,
    ) -> Result<Self> {
        if !Self::is_valid_id(id) {
            return Err(QaError::validation(format!("invalid order id: {}", id)));
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(QaError::validation("order amount must be >= 0"));
        }
        let now = Utc::now();
        Ok(Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            course_name: course_name.to_string(),
            amount,
            status: OrderStatus::Pending,
            tenant_id: tenant_id.to_string(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// 由日期与当日序号生成订单号
    pub fn generate_id(date: NaiveDate, sequence: u32) -> String {
        format!("#{}{:03}", date.format("%Y%m%d"), sequence % 1000)
    }

    /// 校验规范订单号：`#` 后恰好 11 位数字
    pub fn is_valid_id(id: &str) -> bool {
        match id.strip_prefix('#') {
            Some(digits) => digits.len() == 11 && digits.chars().all(|c| c.is_ascii_digit()),
            None => false,
        }
    }

    /// 任意状态之间均可转换，但总会刷新修改时间
    pub fn update_status(&mut self, status: OrderStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_validate_id() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 14).unwrap();
        let id = Order::generate_id(date, 1);
        assert_eq!(id, "#20251114001");
        assert!(Order::is_valid_id(&id));
        assert!(!Order::is_valid_id("20251114001"));
        assert!(!Order::is_valid_id("#202511140012"));
        assert!(!Order::is_valid_id("#2025111400a"));
    }

    #[test]
    fn test_rejects_negative_amount() {
        assert!(Order::new("#20251114001", "t1", "u1", "Rust", -1.0).is_err());
        assert!(Order::new("#20251114001", "t1", "u1", "Rust", f64::NAN).is_err());
        assert!(Order::new("#20251114001", "t1", "u1", "Rust", 0.0).is_ok());
    }

    #[test]
    fn test_status_update_touches_timestamp() {
        let mut order = Order::new("#20251114001", "t1", "u1", "Rust", 99.0).unwrap();
        let before = order.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        order.update_status(OrderStatus::Refunded);
        assert_eq!(order.status, OrderStatus::Refunded);
        assert!(order.updated_at > before);
        order.update_status(OrderStatus::Pending);
        assert_eq!(order.status, OrderStatus::Pending);
    }
}
