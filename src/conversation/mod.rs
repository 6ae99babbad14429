//! Conversation state
//!
//! - `message` - stored message types
//! - `history` - append-only log for one conversation
//! - `render` - translation to LLM messages with tool-call pairing repair
//! - `store` - concurrent map of conversations with optional persistence

pub mod history;
pub mod message;
pub mod render;
pub mod store;

pub use history::Conversation;
pub use message::{Message, Role, ToolCallRequest};
pub use render::{render_messages, Rendered};
pub use store::{ConversationStore, ConversationSummary};
