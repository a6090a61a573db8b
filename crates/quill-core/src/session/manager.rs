//! SessionManager - the single owner of conversation and generation state.
//!
//! Every mutation goes through a method here and is followed by an event on
//! the [`EventBus`]. Presentation layers read snapshots through the
//! accessors and never hold references into the state.
//!
//! # Locks
//!
//! Each concern has its own mutex. No lock is held across a completion
//! call, a callback, or a sleep. The only nesting is settings → models
//! during settings validation.

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::state::{Conversation, ConversationId, Message, Mode, NewMessage};
use crate::completion::{CompletionBackend, CompletionError, CompletionRequest};
use crate::config::CoreConfig;
use crate::event_bus::{
    EventBus, CONVERSATIONS_UPDATED, GENERATION_STATE, MODELS_UPDATED, SETTINGS_UPDATED,
};
use crate::export::{self, ExportError, ExportFormat};
use crate::models::{spawn_download, DownloadHandle, DownloadPlan, DownloadStart, Model, ModelRegistry};
use crate::settings::{GenerationSettings, SettingsError, SettingsPatch};
use crate::status::{MetricsSampler, StatusTicker, SystemStatus};

/// Assistant text appended by [`SessionManager::send_message`] when generation fails.
pub const GENERATION_FALLBACK: &str =
    "Sorry, I encountered an error while generating a response. Please try again.";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A response is already being generated")]
    Busy,

    #[error("Generation failed: {0}")]
    GenerationFailed(#[from] CompletionError),

    #[error("Invalid settings: {0}")]
    InvalidSettings(#[from] SettingsError),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),
}

/// Result of [`SessionManager::download_model`].
#[derive(Debug)]
pub enum DownloadOutcome {
    Started(DownloadHandle),
    /// A worker is already driving this model; the request was ignored.
    AlreadyInProgress,
    NotFound,
}

/// What [`SessionManager::send_message`] appended as the assistant turn.
#[derive(Debug, Clone)]
pub struct Reply {
    pub conversation_id: ConversationId,
    pub message: Message,
    /// The message is the fallback text, not a generated reply.
    pub failed: bool,
}

#[derive(Default)]
struct ConversationState {
    /// Most recent first.
    conversations: Vec<Conversation>,
    active: Option<ConversationId>,
}

impl ConversationState {
    fn find(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    fn find_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| &c.id == id)
    }

    fn active(&self) -> Option<&Conversation> {
        self.active.as_ref().and_then(|id| self.find(id))
    }

    fn insert_new(&mut self, mode: Mode) -> Conversation {
        let conversation = Conversation::new(mode);
        self.active = Some(conversation.id.clone());
        self.conversations.insert(0, conversation.clone());
        conversation
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the generating flag for the duration of one call.
struct GeneratingGuard<'a> {
    flag: &'a AtomicBool,
    event_bus: &'a EventBus,
}

impl<'a> GeneratingGuard<'a> {
    fn acquire(flag: &'a AtomicBool, event_bus: &'a EventBus) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        event_bus.emit(GENERATION_STATE, &json!({ "generating": true }));
        Some(Self { flag, event_bus })
    }
}

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.event_bus
            .emit(GENERATION_STATE, &json!({ "generating": false }));
    }
}

/// Owns conversations, models, settings, and system status.
///
/// Build one per front-end session (see [`crate::context::QuillContextBuilder`])
/// and share it behind an `Arc`. The status refresh starts on construction and
/// stops on [`SessionManager::shutdown`] or drop.
pub struct SessionManager {
    conversations: Mutex<ConversationState>,
    models: Arc<Mutex<ModelRegistry>>,
    settings: Mutex<GenerationSettings>,
    status: Arc<Mutex<SystemStatus>>,
    generating: AtomicBool,
    backend: Arc<dyn CompletionBackend>,
    event_bus: Arc<EventBus>,
    download_plan: DownloadPlan,
    ticker: Mutex<Option<StatusTicker>>,
}

impl SessionManager {
    pub fn new(
        config: &CoreConfig,
        backend: Arc<dyn CompletionBackend>,
        sampler: Arc<dyn MetricsSampler>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let status = Arc::new(Mutex::new(SystemStatus::default()));
        let ticker = StatusTicker::start(
            Arc::clone(&status),
            sampler,
            config.status_interval,
            Arc::clone(&event_bus),
        );

        Self {
            conversations: Mutex::new(ConversationState::default()),
            models: Arc::new(Mutex::new(ModelRegistry::seeded())),
            settings: Mutex::new(GenerationSettings::default()),
            status,
            generating: AtomicBool::new(false),
            backend,
            event_bus,
            download_plan: config.download,
            ticker: Mutex::new(Some(ticker)),
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Create a conversation at the front of the list and make it active.
    pub fn create_conversation(&self, mode: Mode) -> Conversation {
        let conversation = lock(&self.conversations).insert_new(mode);
        log::debug!("Created {} conversation {}", mode, conversation.id);
        self.emit_conversation(&conversation.id);
        conversation
    }

    /// Append a message. Unknown ids are a no-op and return `None`.
    pub fn add_message(&self, conversation_id: &ConversationId, message: NewMessage) -> Option<Message> {
        let appended = lock(&self.conversations)
            .find_mut(conversation_id)
            .map(|conversation| conversation.push(message));

        match &appended {
            Some(_) => self.emit_conversation(conversation_id),
            None => log::debug!("Ignoring message for unknown conversation {}", conversation_id),
        }
        appended
    }

    /// Make an existing conversation active. Returns false for unknown ids.
    pub fn set_active_conversation(&self, conversation_id: &ConversationId) -> bool {
        {
            let mut state = lock(&self.conversations);
            if state.find(conversation_id).is_none() {
                return false;
            }
            state.active = Some(conversation_id.clone());
        }
        self.emit_conversation(conversation_id);
        true
    }

    /// Return the active conversation if it is in `mode`, otherwise start one.
    pub fn select_mode(&self, mode: Mode) -> Conversation {
        let conversation = {
            let mut state = lock(&self.conversations);
            if let Some(active) = state.active().filter(|c| c.mode == mode) {
                return active.clone();
            }
            state.insert_new(mode)
        };
        self.emit_conversation(&conversation.id);
        conversation
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        lock(&self.conversations).conversations.clone()
    }

    pub fn conversation(&self, conversation_id: &ConversationId) -> Option<Conversation> {
        lock(&self.conversations).find(conversation_id).cloned()
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        lock(&self.conversations).active().cloned()
    }

    fn emit_conversation(&self, conversation_id: &ConversationId) {
        self.event_bus.emit(
            CONVERSATIONS_UPDATED,
            &json!({ "conversationId": conversation_id }),
        );
    }

    // ------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    /// Ask the completion service to respond to `prompt` in `mode`.
    ///
    /// With streaming enabled and `on_token` supplied, `on_token` receives
    /// strictly growing prefixes of the reply; the last one equals the
    /// returned text. Overlapping calls fail with [`SessionError::Busy`].
    pub fn generate_response(
        &self,
        prompt: &str,
        mode: Mode,
        on_token: Option<&mut dyn FnMut(&str)>,
    ) -> Result<String, SessionError> {
        let guard = self.claim_generation()?;
        self.generate_with(&guard, prompt, mode, on_token)
    }

    fn claim_generation(&self) -> Result<GeneratingGuard<'_>, SessionError> {
        GeneratingGuard::acquire(&self.generating, &self.event_bus).ok_or(SessionError::Busy)
    }

    /// Body of [`SessionManager::generate_response`], run under an already claimed flag.
    fn generate_with(
        &self,
        _guard: &GeneratingGuard<'_>,
        prompt: &str,
        mode: Mode,
        on_token: Option<&mut dyn FnMut(&str)>,
    ) -> Result<String, SessionError> {
        let settings = self.settings();
        let mut sink = on_token.filter(|_| settings.stream_response);
        let request = CompletionRequest::new(mode, prompt, &settings, sink.is_some());
        log::debug!("Generating {} response with {}", mode, request.model);

        let mut streamed = String::new();
        let result = self.backend.complete(&request, &mut |chunk: &str| {
            if chunk.is_empty() {
                return;
            }
            if let Some(emit) = sink.as_deref_mut() {
                streamed.push_str(chunk);
                emit(&streamed);
            }
        });

        let text = match result {
            Ok(text) if text.is_empty() => Err(CompletionError::EmptyResponse),
            Ok(text) if !text.starts_with(&streamed) => Err(CompletionError::InvalidResponse(
                "final text does not extend the streamed output".to_string(),
            )),
            other => other,
        }
        .map_err(|e| {
            log::warn!("Generation failed: {}", e);
            SessionError::GenerationFailed(e)
        })?;

        if let Some(emit) = sink.as_deref_mut() {
            if text.len() > streamed.len() {
                emit(&text);
            }
        }

        Ok(text)
    }

    /// Send a user message the way the chat panel does.
    ///
    /// Ensures a conversation in `mode` is active, appends the user turn,
    /// generates, and appends the reply. A failed generation appends
    /// [`GENERATION_FALLBACK`] and reports `failed: true` instead of erroring.
    pub fn send_message(
        &self,
        mode: Mode,
        content: &str,
        on_token: Option<&mut dyn FnMut(&str)>,
    ) -> Result<Reply, SessionError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        // Claimed before the user turn is appended, held until the reply is stored.
        let guard = self.claim_generation()?;

        let conversation_id = self.select_mode(mode).id;
        self.add_message(&conversation_id, NewMessage::user(content));

        let (reply, failed) = match self.generate_with(&guard, content, mode, on_token) {
            Ok(text) => (NewMessage::assistant(text), false),
            Err(SessionError::GenerationFailed(e)) => {
                log::error!("Error generating response: {}", e);
                (NewMessage::assistant(GENERATION_FALLBACK), true)
            }
            Err(e) => return Err(e),
        };

        let message = self
            .add_message(&conversation_id, reply)
            .ok_or_else(|| SessionError::ConversationNotFound(conversation_id.clone()))?;

        Ok(Reply {
            conversation_id,
            message,
            failed,
        })
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    pub fn models(&self) -> Vec<Model> {
        lock(&self.models).models().to_vec()
    }

    /// Start downloading a model in the background.
    pub fn download_model(&self, model_id: &str) -> DownloadOutcome {
        let start = {
            let mut registry = lock(&self.models);
            let start = registry.begin_download(model_id);
            if let (DownloadStart::From(_), Some(model)) = (start, registry.get(model_id)) {
                self.event_bus.emit(MODELS_UPDATED, model);
            }
            start
        };

        match start {
            DownloadStart::From(progress) => {
                log::info!("Downloading {} from {}%", model_id, progress);
                DownloadOutcome::Started(spawn_download(
                    Arc::clone(&self.models),
                    model_id.to_string(),
                    progress,
                    self.download_plan,
                    Arc::clone(&self.event_bus),
                ))
            }
            DownloadStart::AlreadyInProgress => {
                log::debug!("Download of {} already in progress", model_id);
                DownloadOutcome::AlreadyInProgress
            }
            DownloadStart::NotFound => {
                log::debug!("Ignoring download of unknown model {}", model_id);
                DownloadOutcome::NotFound
            }
        }
    }

    // ------------------------------------------------------------------
    // Settings and status
    // ------------------------------------------------------------------

    pub fn settings(&self) -> GenerationSettings {
        lock(&self.settings).clone()
    }

    /// Merge a partial update. Invalid patches leave settings untouched.
    pub fn update_settings(&self, patch: &SettingsPatch) -> Result<(), SessionError> {
        let updated = {
            let mut settings = lock(&self.settings);
            let next = settings.merged(patch, |id| lock(&self.models).contains(id))?;
            *settings = next.clone();
            next
        };
        self.event_bus.emit(SETTINGS_UPDATED, &updated);
        Ok(())
    }

    pub fn system_status(&self) -> SystemStatus {
        lock(&self.status).clone()
    }

    pub fn is_refreshing_status(&self) -> bool {
        lock(&self.ticker).as_ref().is_some_and(StatusTicker::is_running)
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    /// Serialize a conversation. Unknown ids yield `Ok(None)`.
    pub fn export_conversation(
        &self,
        conversation_id: &ConversationId,
        format: ExportFormat,
    ) -> Result<Option<String>, ExportError> {
        self.conversation(conversation_id)
            .map(|conversation| export::render(&conversation, format))
            .transpose()
    }

    /// Write `conversation-<id>.<format>` into `dir`. Unknown ids yield `Ok(None)`.
    pub fn export_to_dir(
        &self,
        conversation_id: &ConversationId,
        format: ExportFormat,
        dir: &Path,
    ) -> Result<Option<PathBuf>, ExportError> {
        self.conversation(conversation_id)
            .map(|conversation| export::save_export(dir, &conversation, format))
            .transpose()
    }

    /// Stop the background status refresh.
    pub fn shutdown(&self) {
        if let Some(mut ticker) = lock(&self.ticker).take() {
            ticker.stop();
            log::debug!("Session manager shut down");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
