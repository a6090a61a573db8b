//! Conversations and the manager that owns them.
//!
//! Front ends hold an `Arc<SessionManager>` and read snapshots; they never
//! mutate a [`Conversation`] directly.

mod manager;
mod state;

pub use manager::{DownloadOutcome, Reply, SessionError, SessionManager, GENERATION_FALLBACK};
pub use state::{Conversation, ConversationId, Message, MessageId, Mode, NewMessage, Role};
