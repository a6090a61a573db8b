//! Conversation export.
//!
//! # Formats
//!
//! - `json`: pretty-printed conversation, same shape as the event payloads
//! - `txt`: `role: content` blocks separated by a blank line
//! - `csv`: `Role,Content,Timestamp` with every field quoted (RFC 4180)
//!
//! Files are written as `conversation-<id>.<format>` using write-then-rename.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::session::{Conversation, ConversationId};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown export format: {0}")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Txt,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Txt => "txt",
            ExportFormat::Csv => "csv",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "txt" => Ok(ExportFormat::Txt),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(ExportError::UnknownFormat(s.to_string())),
        }
    }
}

/// Serialize a conversation in the given format.
pub fn render(conversation: &Conversation, format: ExportFormat) -> Result<String, ExportError> {
    let content = match format {
        ExportFormat::Json => serde_json::to_string_pretty(conversation)?,
        ExportFormat::Txt => conversation
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n"),
        ExportFormat::Csv => {
            let mut lines = vec!["Role,Content,Timestamp".to_string()];
            lines.extend(conversation.messages.iter().map(|m| {
                let timestamp = m.timestamp.to_rfc3339();
                [m.role.as_str(), m.content.as_str(), timestamp.as_str()]
                    .map(csv_field)
                    .join(",")
            }));
            lines.join("\n")
        }
    };
    Ok(content)
}

/// Quote a CSV field, doubling embedded quotes.
fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

pub fn export_filename(id: &ConversationId, format: ExportFormat) -> String {
    format!("conversation-{}.{}", id, format.extension())
}

/// Write the rendered conversation into `dir`, returning the file path.
pub fn save_export(
    dir: &Path,
    conversation: &Conversation,
    format: ExportFormat,
) -> Result<PathBuf, ExportError> {
    let content = render(conversation, format)?;
    fs::create_dir_all(dir)?;

    let file_name = export_filename(&conversation.id, format);
    let file_path = dir.join(&file_name);
    let temp_path = dir.join(format!("{file_name}.tmp"));

    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, &file_path)?;

    log::info!("Exported conversation {} to {}", conversation.id, file_path.display());
    Ok(file_path)
}
