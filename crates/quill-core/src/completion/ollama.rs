//! Ollama `/api/generate` client.
//!
//! Non-streaming requests read a single `{"response": ...}` body. Streaming
//! requests read newline-delimited JSON chunks until `"done": true`.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;

use super::{CompletionBackend, CompletionError, CompletionRequest, SamplingOptions};
use crate::logging::{self, log_line, LogHandle};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: &'a SamplingOptions,
}

/// Both the full response and each streamed chunk share this shape.
#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct OllamaBackend {
    agent: ureq::Agent,
    endpoint: String,
    log_file: LogHandle,
}

impl OllamaBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            endpoint: endpoint.into(),
            log_file: logging::disabled(),
        }
    }

    /// Record request and response text to a transcript file.
    pub fn with_log(mut self, log_file: LogHandle) -> Self {
        self.log_file = log_file;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn unreachable(&self, reason: impl std::fmt::Display) -> CompletionError {
        let err = CompletionError::Unreachable {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        };
        log::error!("Completion call failed: {}", err);
        log_line(&self.log_file, "ERROR", &err.to_string());
        err
    }

    fn read_streamed(
        &self,
        response: ureq::Response,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String, CompletionError> {
        let reader = BufReader::new(response.into_reader());
        let mut text = String::new();

        for line in reader.lines() {
            let line = line.map_err(|e| self.unreachable(e))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let chunk: GenerateChunk = serde_json::from_str(line)
                .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;
            if let Some(error) = chunk.error {
                return Err(CompletionError::Rejected(error));
            }
            if !chunk.response.is_empty() {
                on_chunk(&chunk.response);
                text.push_str(&chunk.response);
            }
            if chunk.done {
                break;
            }
        }

        Ok(text)
    }
}

impl CompletionBackend for OllamaBackend {
    fn complete(
        &self,
        request: &CompletionRequest,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String, CompletionError> {
        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream: request.stream,
            options: &request.options,
        };

        log::debug!(
            "POST {} model={} mode={} stream={}",
            self.endpoint,
            request.model,
            request.mode,
            request.stream
        );
        if let Ok(json) = serde_json::to_string(&body) {
            log_line(&self.log_file, "REQUEST", &json);
        }

        let response = match self.agent.post(&self.endpoint).send_json(&body) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                return Err(self.unreachable(format!("HTTP {code}: {}", detail.trim())));
            }
            Err(e) => return Err(self.unreachable(e)),
        };

        let text = if request.stream {
            self.read_streamed(response, on_chunk)?
        } else {
            let chunk: GenerateChunk = response
                .into_json()
                .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;
            if let Some(error) = chunk.error {
                return Err(CompletionError::Rejected(error));
            }
            chunk.response
        };

        log_line(&self.log_file, "RESPONSE", &text);
        Ok(text)
    }
}
