//! Core configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::models::DownloadPlan;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434/api/generate";

/// Knobs for the session manager and its default collaborators.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Completion service URL.
    pub endpoint: String,
    pub request_timeout: Duration,
    /// How often the system status is refreshed.
    pub status_interval: Duration,
    pub download: DownloadPlan,
    /// Directory for completion transcripts. `None` disables them.
    pub log_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(120),
            status_interval: Duration::from_secs(3),
            download: DownloadPlan::default(),
            log_dir: None,
        }
    }
}

impl CoreConfig {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn download(mut self, plan: DownloadPlan) -> Self {
        self.download = plan;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_ollama() {
        let config = CoreConfig::default();
        assert_eq!(config.endpoint, "http://localhost:11434/api/generate");
        assert_eq!(config.status_interval, Duration::from_secs(3));
        assert_eq!(config.download.step, 10);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn setters_chain() {
        let config = CoreConfig::default()
            .endpoint("http://gpu-box:11434/api/generate")
            .status_interval(Duration::from_millis(500))
            .log_dir("/tmp/quill");

        assert_eq!(config.endpoint, "http://gpu-box:11434/api/generate");
        assert_eq!(config.status_interval, Duration::from_millis(500));
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/quill")));
    }
}
