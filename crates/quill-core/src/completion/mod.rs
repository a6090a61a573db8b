//! The seam to the external completion service.
//!
//! The session manager talks to a [`CompletionBackend`] and never to HTTP
//! directly. Two backends ship here:
//!
//! - [`OllamaBackend`]: `POST /api/generate` against a local Ollama server
//! - [`SimulatedBackend`]: canned per-mode replies with paced streaming

mod ollama;
mod prompt;
mod simulated;

pub use ollama::OllamaBackend;
pub use prompt::render_prompt;
pub use simulated::{CharPacer, SimulatedBackend, StreamPacer, WordPacer};

use serde::Serialize;
use thiserror::Error;

use crate::session::Mode;
use crate::settings::GenerationSettings;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Failed to connect to the completion service at {endpoint}. Make sure it's running. ({reason})")]
    Unreachable { endpoint: String, reason: String },

    #[error("Completion service rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid response from completion service: {0}")]
    InvalidResponse(String),

    #[error("Completion service returned an empty response")]
    EmptyResponse,
}

/// Sampling options forwarded to the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingOptions {
    pub temperature: f64,
    pub top_p: f64,
    /// Ollama's name for the output length cap.
    pub num_predict: u32,
}

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub mode: Mode,
    /// The user's raw input.
    pub input: String,
    /// `input` wrapped in the mode's instruction template.
    pub prompt: String,
    pub stream: bool,
    pub options: SamplingOptions,
}

impl CompletionRequest {
    pub fn new(mode: Mode, input: &str, settings: &GenerationSettings, stream: bool) -> Self {
        Self {
            model: settings.selected_model.clone(),
            mode,
            input: input.to_string(),
            prompt: render_prompt(mode, input),
            stream,
            options: SamplingOptions {
                temperature: settings.temperature,
                top_p: settings.top_p,
                num_predict: settings.max_tokens,
            },
        }
    }
}

/// A completion service.
///
/// When `request.stream` is set, implementations call `on_chunk` with each
/// new piece of output as it arrives. The returned text is the full reply
/// and must equal the concatenation of the chunks when any were sent.
pub trait CompletionBackend: Send + Sync {
    fn complete(
        &self,
        request: &CompletionRequest,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String, CompletionError>;
}
