//! 对话编排：意图识别、订单查询、直接生成，以及同步 / 流式 / 并行三种执行方式。

mod classifier;
mod generator;
mod json;
mod lookup;
mod orchestrator;
mod stream;

pub use classifier::{ClassifierConfig, IntentClassifier};
pub use generator::{error_message, handoff_message, ResponseGenerator, FALLBACK_MESSAGE};
pub use lookup::{extract_order_id, order_not_found_message, OrderLookup, MISSING_ORDER_ID_MESSAGE};
pub use orchestrator::{ChatComponents, ChatConfig, ChatService, ParallelConfig, SessionConfig};
pub use stream::TurnStream;
