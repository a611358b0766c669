mod chat;
mod document;
mod intent;
mod meta;
mod order;
mod session;
mod tenant;

pub use chat::{ChatRequest, ChatTurnResult, MissedQuery, StreamChunk, TurnMetadata};
pub use document::Document;
pub use intent::{Intent, IntentType};
pub use meta::{MetaValue, Metadata};
pub use order::{Order, OrderStatus};
pub use session::{Message, Role, Session};
pub use tenant::{Tenant, DEFAULT_TENANT_ID};

pub use qa_error::{QaError as Error, Result};
