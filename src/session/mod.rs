//! Conversation state: messages, per-session context and preset modes.

pub mod context;
pub mod modes;
pub mod types;

pub use context::{is_valid_session_id, ChatOverrides, ConversationContext, EffectiveParams};
pub use modes::Mode;
pub use types::{ChatEvent, Message, Role, SendOutcome, Usage};
