//! TallyChat: a budget-aware chat client with a persistent response cache.
//!
//! Every request flows through [`pipeline::ChatPipeline`]: the cache is
//! consulted first, the budget gate second, and only then is the remote
//! model called. Successful replies are billed to the session ledger and
//! stored in the cache.

pub mod budget;
pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod session;
pub mod utils;

#[cfg(feature = "web")]
pub mod api;

pub use budget::{BudgetReport, BudgetStatus, BudgetTracker, CallRecord, PriceTable};
pub use cache::{derive_key, CacheStats, ResponseCache, SharedCache};
pub use config::Config;
pub use error::{Result, TallyError};
pub use pipeline::{ChatPipeline, DetailedReport, SendResponse, StatusSnapshot};
pub use providers::{AnthropicProvider, LLMProvider};
pub use session::{ChatEvent, ChatOverrides, ConversationContext, Message, Mode, Role, SendOutcome};
