//! # quill-core
//!
//! Core logic for Quill, a local writing assistant on top of an Ollama-style
//! completion service.
//!
//! This crate has no UI. The CLI (and anything else) drives it through a
//! [`SessionManager`] and listens on the [`EventBus`].
//!
//! ## Key Concepts
//!
//! - **Mode**: one of writer, rephraser, explainer, search; picks the prompt template
//! - **Conversation**: an ordered list of messages in one mode
//! - **CompletionBackend**: the seam to the model server (Ollama or simulated)
//! - **Events**: every state change is broadcast as `<area>:updated`

pub mod completion;
pub mod config;
pub mod context;
pub mod event_bus;
pub mod export;
pub mod logging;
pub mod models;
pub mod paths;
pub mod session;
pub mod settings;
pub mod status;

// Re-export commonly used types
pub use completion::{CompletionBackend, CompletionError, OllamaBackend, SimulatedBackend};
pub use config::CoreConfig;
pub use context::{QuillContext, QuillContextBuilder};
pub use event_bus::{BroadcastEvent, EventBus};
pub use export::{ExportError, ExportFormat};
pub use models::{Model, ModelStatus};
pub use session::{
    Conversation, ConversationId, DownloadOutcome, Message, Mode, Reply, Role, SessionError,
    SessionManager,
};
pub use settings::{GenerationSettings, SettingsError, SettingsPatch};
pub use status::SystemStatus;
