//! Offline backend with canned replies.
//!
//! Useful without a running model server and in tests. Streaming is paced
//! by a pluggable [`StreamPacer`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{CompletionBackend, CompletionError, CompletionRequest};
use crate::session::Mode;

/// How much of the user's input is echoed back.
const ECHO_CHARS: usize = 50;

/// Splits a finished reply into timed chunks.
pub trait StreamPacer: Send + Sync {
    /// Emit `text` as a sequence of non-empty chunks whose concatenation is `text`.
    fn pace(&self, text: &str, emit: &mut dyn FnMut(&str));
}

/// One character per chunk.
#[derive(Debug, Clone, Copy)]
pub struct CharPacer {
    pub delay: Duration,
}

impl Default for CharPacer {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(30),
        }
    }
}

impl StreamPacer for CharPacer {
    fn pace(&self, text: &str, emit: &mut dyn FnMut(&str)) {
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            thread::sleep(self.delay);
            emit(ch.encode_utf8(&mut buf));
        }
    }
}

/// One word (with its trailing whitespace) per chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordPacer {
    pub delay: Duration,
}

impl StreamPacer for WordPacer {
    fn pace(&self, text: &str, emit: &mut dyn FnMut(&str)) {
        for word in text.split_inclusive(char::is_whitespace) {
            thread::sleep(self.delay);
            emit(word);
        }
    }
}

pub struct SimulatedBackend {
    pacer: Arc<dyn StreamPacer>,
    latency: Duration,
}

impl SimulatedBackend {
    pub fn new(pacer: Arc<dyn StreamPacer>, latency: Duration) -> Self {
        Self { pacer, latency }
    }

    /// No pacing delay and no latency.
    pub fn instant() -> Self {
        Self::new(
            Arc::new(CharPacer {
                delay: Duration::ZERO,
            }),
            Duration::ZERO,
        )
    }

    fn lead(mode: Mode) -> &'static str {
        match mode {
            Mode::Writer => "I'll help you craft compelling content. Here's a well-structured piece based on your request...",
            Mode::Rephraser => "Here's your content rephrased with improved clarity and flow...",
            Mode::Explainer => "Let me break this down into clear, understandable terms...",
            Mode::Search => "Based on the available information, here's what I found...",
        }
    }

    pub fn reply_for(mode: Mode, input: &str) -> String {
        let echo: String = input.chars().take(ECHO_CHARS).collect();
        format!("{} {}...", Self::lead(mode), echo)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(Arc::new(CharPacer::default()), Duration::from_secs(1))
    }
}

impl CompletionBackend for SimulatedBackend {
    fn complete(
        &self,
        request: &CompletionRequest,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String, CompletionError> {
        let reply = Self::reply_for(request.mode, &request.input);
        if request.stream {
            self.pacer.pace(&reply, on_chunk);
        }
        thread::sleep(self.latency);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::GenerationSettings;

    fn collect(pacer: &dyn StreamPacer, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        pacer.pace(text, &mut |c| chunks.push(c.to_string()));
        chunks
    }

    #[test]
    fn reply_echoes_first_fifty_chars() {
        let input = "x".repeat(80);
        let reply = SimulatedBackend::reply_for(Mode::Search, &input);
        assert!(reply.starts_with("Based on the available information"));
        assert!(reply.ends_with(&format!(" {}...", "x".repeat(50))));
    }

    #[test]
    fn reply_echo_respects_char_boundaries() {
        let input = "é".repeat(60);
        let reply = SimulatedBackend::reply_for(Mode::Writer, &input);
        assert!(reply.ends_with(&format!("{}...", "é".repeat(50))));
    }

    #[test]
    fn char_pacer_emits_each_char() {
        let chunks = collect(&CharPacer { delay: Duration::ZERO }, "héllo");
        assert_eq!(chunks, vec!["h", "é", "l", "l", "o"]);
    }

    #[test]
    fn word_pacer_keeps_whitespace() {
        let chunks = collect(&WordPacer::default(), "one two  three");
        assert_eq!(chunks, vec!["one ", "two ", " ", "three"]);
        assert_eq!(chunks.concat(), "one two  three");
    }

    #[test]
    fn streams_only_when_requested() {
        let backend = SimulatedBackend::instant();
        let settings = GenerationSettings::default();

        let mut streamed = String::new();
        let request = CompletionRequest::new(Mode::Explainer, "tides", &settings, true);
        let reply = backend
            .complete(&request, &mut |c| streamed.push_str(c))
            .unwrap();
        assert_eq!(streamed, reply);

        let mut calls = 0;
        let request = CompletionRequest::new(Mode::Explainer, "tides", &settings, false);
        backend.complete(&request, &mut |_| calls += 1).unwrap();
        assert_eq!(calls, 0);
    }
}
