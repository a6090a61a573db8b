//! QuillContext - shared state handed to every front end.
//!
//! ```text
//!            ┌──────────────────────────┐
//!            │       QuillContext       │
//!            ├──────────────────────────┤
//!            │  - EventBus              │
//!            │  - SessionManager        │
//!            │      ├ CompletionBackend │
//!            │      └ MetricsSampler    │
//!            └────────────┬─────────────┘
//!                         │
//!              ┌──────────┴──────────┐
//!              ▼                     ▼
//!       ┌─────────────┐       ┌─────────────┐
//!       │   CLI REPL  │       │    tests    │
//!       └─────────────┘       └─────────────┘
//! ```

use std::sync::Arc;

use crate::completion::{CompletionBackend, OllamaBackend};
use crate::config::CoreConfig;
use crate::event_bus::EventBus;
use crate::logging;
use crate::session::SessionManager;
use crate::status::{MetricsSampler, RandomWalkSampler};

/// Log id for the completion transcript file.
const COMPLETION_LOG_ID: &str = "completion";

#[derive(Default)]
pub struct QuillContextBuilder {
    config: CoreConfig,
    backend: Option<Arc<dyn CompletionBackend>>,
    sampler: Option<Arc<dyn MetricsSampler>>,
    event_bus: Option<Arc<EventBus>>,
}

impl QuillContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default Ollama client (for offline use or tests).
    pub fn backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn sampler(mut self, sampler: Arc<dyn MetricsSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn build(self) -> QuillContext {
        let config = self.config;
        let event_bus = self.event_bus.unwrap_or_else(|| Arc::new(EventBus::new()));
        let backend = self.backend.unwrap_or_else(|| {
            let log_file = logging::open_log_file(config.log_dir.as_deref(), COMPLETION_LOG_ID);
            Arc::new(
                OllamaBackend::new(config.endpoint.clone(), config.request_timeout)
                    .with_log(log_file),
            )
        });
        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::new(RandomWalkSampler::default()));

        let sessions = Arc::new(SessionManager::new(
            &config,
            backend,
            sampler,
            Arc::clone(&event_bus),
        ));

        QuillContext { event_bus, sessions }
    }
}

/// Cloning shares the same manager and bus.
#[derive(Clone)]
pub struct QuillContext {
    pub event_bus: Arc<EventBus>,
    pub sessions: Arc<SessionManager>,
}

impl QuillContext {
    pub fn builder() -> QuillContextBuilder {
        QuillContextBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::SimulatedBackend;
    use crate::session::Mode;
    use std::time::Duration;

    fn offline() -> QuillContextBuilder {
        QuillContext::builder()
            .config(CoreConfig::default().status_interval(Duration::from_secs(3600)))
            .backend(Arc::new(SimulatedBackend::instant()))
    }

    #[test]
    fn builder_uses_provided_event_bus() {
        let bus = Arc::new(EventBus::new());
        let ctx = offline().event_bus(Arc::clone(&bus)).build();

        assert!(Arc::ptr_eq(&ctx.event_bus, &bus));
        assert!(Arc::ptr_eq(ctx.sessions.event_bus(), &bus));
    }

    #[test]
    fn builder_uses_provided_backend() {
        let ctx = offline().build();
        let reply = ctx.sessions.send_message(Mode::Search, "rust", None).unwrap();
        assert_eq!(
            reply.message.content,
            SimulatedBackend::reply_for(Mode::Search, "rust")
        );
    }

    #[test]
    fn default_backend_opens_transcript_in_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let _ctx = QuillContext::builder()
            .config(
                CoreConfig::default()
                    .status_interval(Duration::from_secs(3600))
                    .log_dir(dir.path()),
            )
            .build();

        assert!(dir.path().join("completion.log").exists());
    }

    #[test]
    fn clones_share_the_session_manager() {
        let ctx = offline().build();
        let clone = ctx.clone();

        ctx.sessions.create_conversation(Mode::Writer);

        assert!(Arc::ptr_eq(&ctx.sessions, &clone.sessions));
        assert_eq!(clone.sessions.conversations().len(), 1);
    }
}
