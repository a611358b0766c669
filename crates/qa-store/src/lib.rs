//! 租户独立的 SQLite 数据库：订单、会话与未命中查询。

mod db;
mod missed;
mod orders;
mod rows;
mod safety;
mod sessions;

pub use db::{DatabaseProvisioner, InMemoryProvisioner, SqliteProvisioner, TenantDb};
pub use missed::MissedQueryRepository;
pub use orders::OrderRepository;
pub use safety::validate_safe_query;
pub use sessions::{SessionStore, SqliteSessionStore};
