//! 会话层：消息模型、会话上下文（状态 + 历史）、单写者会话服务

pub mod context;
pub mod message;
pub mod service;

pub use context::{Branch, ContextSnapshot, SessionContext, SessionIds, StateMap};
pub use message::{Message, Part, Role};
pub use service::{InMemorySessionService, SessionLease};
