//! Model catalog and download progression.
//!
//! Downloads run on a background thread that advances progress in fixed
//! steps. The registry tracks which models have a live worker, so a second
//! request for the same model is ignored instead of restarting at zero.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::event_bus::{EventBus, MODELS_UPDATED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Available,
    Downloading,
    NotInstalled,
}

/// A named, installable unit of generation capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    pub name: String,
    pub size: String,
    pub status: ModelStatus,
    /// Present iff `status` is `Downloading`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_progress: Option<u8>,
}

impl Model {
    fn new(id: &str, name: &str, size: &str, status: ModelStatus) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            size: size.to_string(),
            status,
            download_progress: None,
        }
    }
}

/// Where a download request landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStart {
    /// Progression begins at this percentage.
    From(u8),
    AlreadyInProgress,
    NotFound,
}

/// Pace of the download progression.
#[derive(Debug, Clone, Copy)]
pub struct DownloadPlan {
    pub step: u8,
    pub interval: Duration,
}

impl Default for DownloadPlan {
    fn default() -> Self {
        Self {
            step: 10,
            interval: Duration::from_millis(200),
        }
    }
}

/// The set of known models. Models are never removed.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<Model>,
    active_downloads: HashSet<String>,
}

impl ModelRegistry {
    pub fn new(models: Vec<Model>) -> Self {
        Self {
            models,
            active_downloads: HashSet::new(),
        }
    }

    /// The startup catalog.
    pub fn seeded() -> Self {
        let mut neural_chat = Model::new(
            "neural-chat-7b",
            "Neural Chat 7B",
            "4.8GB",
            ModelStatus::Downloading,
        );
        neural_chat.download_progress = Some(65);

        Self::new(vec![
            Model::new("llama2-7b", "Llama 2 7B", "3.8GB", ModelStatus::Available),
            Model::new(
                "codellama-13b",
                "Code Llama 13B",
                "7.4GB",
                ModelStatus::Available,
            ),
            Model::new(
                "mistral-7b",
                "Mistral 7B",
                "4.1GB",
                ModelStatus::NotInstalled,
            ),
            neural_chat,
        ])
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn get(&self, model_id: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.id == model_id)
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.get(model_id).is_some()
    }

    pub fn is_downloading(&self, model_id: &str) -> bool {
        self.active_downloads.contains(model_id)
    }

    fn get_mut(&mut self, model_id: &str) -> Option<&mut Model> {
        self.models.iter_mut().find(|m| m.id == model_id)
    }

    /// Claim the download slot for a model.
    ///
    /// A model left in `Downloading` without a worker resumes from its
    /// recorded progress; anything else restarts at zero.
    pub fn begin_download(&mut self, model_id: &str) -> DownloadStart {
        if self.active_downloads.contains(model_id) {
            return DownloadStart::AlreadyInProgress;
        }
        let Some(model) = self.get_mut(model_id) else {
            return DownloadStart::NotFound;
        };

        let start = match (model.status, model.download_progress) {
            (ModelStatus::Downloading, Some(progress)) => progress.min(100),
            _ => 0,
        };
        model.status = ModelStatus::Downloading;
        model.download_progress = Some(start);
        self.active_downloads.insert(model_id.to_string());

        DownloadStart::From(start)
    }

    /// Record progress. Never moves backwards.
    pub fn advance(&mut self, model_id: &str, progress: u8) -> Option<&Model> {
        let model = self.get_mut(model_id)?;
        let current = model.download_progress.unwrap_or(0);
        model.download_progress = Some(progress.min(100).max(current));
        Some(model)
    }

    /// Free the download slot without touching status or progress.
    ///
    /// A model left in `Downloading` resumes from its progress on the next request.
    pub fn release(&mut self, model_id: &str) -> bool {
        self.active_downloads.remove(model_id)
    }

    /// Mark the model available, clear progress, and release the slot.
    pub fn finish_download(&mut self, model_id: &str) -> Option<&Model> {
        self.active_downloads.remove(model_id);
        let model = self.get_mut(model_id)?;
        model.status = ModelStatus::Available;
        model.download_progress = None;
        Some(model)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::seeded()
    }
}

/// Handle to a running download worker.
#[derive(Debug)]
pub struct DownloadHandle {
    model_id: String,
    handle: JoinHandle<()>,
}

impl DownloadHandle {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the model reaches `Available`.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

/// Releases a download slot when dropped, so a worker that dies never pins it.
struct SlotRelease {
    registry: Arc<Mutex<ModelRegistry>>,
    model_id: String,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let mut guard = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.release(&self.model_id) && std::thread::panicking() {
            log::error!("Download worker for {} stopped early", self.model_id);
        }
    }
}

/// Spawn the worker that drives `model_id` from `start` to `Available`.
///
/// The caller must already hold the slot via [`ModelRegistry::begin_download`].
pub fn spawn_download(
    registry: Arc<Mutex<ModelRegistry>>,
    model_id: String,
    start: u8,
    plan: DownloadPlan,
    event_bus: Arc<EventBus>,
) -> DownloadHandle {
    let step = plan.step.clamp(1, 100);
    let id = model_id.clone();

    let handle = thread::spawn(move || {
        let _slot = SlotRelease {
            registry: Arc::clone(&registry),
            model_id: id.clone(),
        };
        let mut progress = start;
        while progress < 100 {
            thread::sleep(plan.interval);
            progress = progress.saturating_add(step).min(100);

            let mut guard = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(model) = guard.advance(&id, progress) {
                event_bus.emit(MODELS_UPDATED, model);
            }
        }

        let mut guard = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = guard.finish_download(&id) {
            log::info!("Model {} is now available", id);
            event_bus.emit(MODELS_UPDATED, model);
        }
    });

    DownloadHandle { model_id, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::drain_events;

    fn fast_plan() -> DownloadPlan {
        DownloadPlan {
            step: 10,
            interval: Duration::ZERO,
        }
    }

    mod registry {
        use super::*;

        #[test]
        fn seeded_catalog_has_four_models() {
            let registry = ModelRegistry::seeded();
            let ids: Vec<_> = registry.models().iter().map(|m| m.id.as_str()).collect();
            assert_eq!(
                ids,
                vec!["llama2-7b", "codellama-13b", "mistral-7b", "neural-chat-7b"]
            );
        }

        #[test]
        fn progress_present_only_while_downloading() {
            let registry = ModelRegistry::seeded();
            for model in registry.models() {
                assert_eq!(
                    model.download_progress.is_some(),
                    model.status == ModelStatus::Downloading,
                    "{}",
                    model.id
                );
            }
        }

        #[test]
        fn begin_download_starts_at_zero() {
            let mut registry = ModelRegistry::seeded();
            assert_eq!(registry.begin_download("mistral-7b"), DownloadStart::From(0));

            let model = registry.get("mistral-7b").unwrap();
            assert_eq!(model.status, ModelStatus::Downloading);
            assert_eq!(model.download_progress, Some(0));
            assert!(registry.is_downloading("mistral-7b"));
        }

        #[test]
        fn begin_download_resumes_orphaned_progress() {
            let mut registry = ModelRegistry::seeded();
            assert_eq!(
                registry.begin_download("neural-chat-7b"),
                DownloadStart::From(65)
            );
        }

        #[test]
        fn duplicate_request_is_ignored() {
            let mut registry = ModelRegistry::seeded();
            registry.begin_download("mistral-7b");
            registry.advance("mistral-7b", 40);

            assert_eq!(
                registry.begin_download("mistral-7b"),
                DownloadStart::AlreadyInProgress
            );
            assert_eq!(
                registry.get("mistral-7b").unwrap().download_progress,
                Some(40)
            );
        }

        #[test]
        fn unknown_model_is_not_found() {
            let mut registry = ModelRegistry::seeded();
            assert_eq!(registry.begin_download("gpt-9"), DownloadStart::NotFound);
            assert!(!registry.is_downloading("gpt-9"));
        }

        #[test]
        fn advance_never_regresses() {
            let mut registry = ModelRegistry::seeded();
            registry.begin_download("mistral-7b");
            registry.advance("mistral-7b", 50);
            registry.advance("mistral-7b", 30);
            assert_eq!(
                registry.get("mistral-7b").unwrap().download_progress,
                Some(50)
            );
        }

        #[test]
        fn finish_clears_progress_and_slot() {
            let mut registry = ModelRegistry::seeded();
            registry.begin_download("mistral-7b");
            registry.finish_download("mistral-7b");

            let model = registry.get("mistral-7b").unwrap();
            assert_eq!(model.status, ModelStatus::Available);
            assert!(model.download_progress.is_none());
            assert!(!registry.is_downloading("mistral-7b"));
        }

        #[test]
        fn status_serializes_snake_case() {
            let json = serde_json::to_string(&ModelStatus::NotInstalled).unwrap();
            assert_eq!(json, "\"not_installed\"");
        }
    }

    mod worker {
        use super::*;

        #[test]
        fn drives_progress_to_available() {
            let registry = Arc::new(Mutex::new(ModelRegistry::seeded()));
            let bus = Arc::new(EventBus::new());
            let mut rx = bus.subscribe();

            let start = registry.lock().unwrap().begin_download("mistral-7b");
            assert_eq!(start, DownloadStart::From(0));

            let handle = spawn_download(
                Arc::clone(&registry),
                "mistral-7b".to_string(),
                0,
                fast_plan(),
                Arc::clone(&bus),
            );
            assert_eq!(handle.model_id(), "mistral-7b");
            handle.join().unwrap();

            let progress: Vec<Option<u64>> = drain_events(&mut rx, MODELS_UPDATED)
                .iter()
                .map(|e| e.payload["downloadProgress"].as_u64())
                .collect();
            let mut expected: Vec<Option<u64>> = (1..=10).map(|n| Some(n * 10)).collect();
            expected.push(None);
            assert_eq!(progress, expected);

            let guard = registry.lock().unwrap();
            let model = guard.get("mistral-7b").unwrap();
            assert_eq!(model.status, ModelStatus::Available);
            assert!(!guard.is_downloading("mistral-7b"));
        }

        #[test]
        fn resumed_download_is_monotonic() {
            let registry = Arc::new(Mutex::new(ModelRegistry::seeded()));
            let bus = Arc::new(EventBus::new());
            let mut rx = bus.subscribe();

            registry.lock().unwrap().begin_download("neural-chat-7b");
            spawn_download(
                Arc::clone(&registry),
                "neural-chat-7b".to_string(),
                65,
                fast_plan(),
                Arc::clone(&bus),
            )
            .join()
            .unwrap();

            let progress: Vec<u64> = drain_events(&mut rx, MODELS_UPDATED)
                .iter()
                .filter_map(|e| e.payload["downloadProgress"].as_u64())
                .collect();
            assert_eq!(progress, vec![75, 85, 95, 100]);
        }

        #[test]
        fn slot_is_released_when_worker_panics() {
            let registry = Arc::new(Mutex::new(ModelRegistry::seeded()));
            registry.lock().unwrap().begin_download("mistral-7b");
            registry.lock().unwrap().advance("mistral-7b", 40);

            let worker_registry = Arc::clone(&registry);
            let result = thread::spawn(move || {
                let _slot = SlotRelease {
                    registry: worker_registry,
                    model_id: "mistral-7b".to_string(),
                };
                panic!("worker died");
            })
            .join();
            assert!(result.is_err());

            let mut guard = registry.lock().unwrap_or_else(PoisonError::into_inner);
            assert!(!guard.is_downloading("mistral-7b"));
            assert_eq!(guard.begin_download("mistral-7b"), DownloadStart::From(40));
        }

        #[test]
        fn release_keeps_progress() {
            let mut registry = ModelRegistry::seeded();
            registry.begin_download("mistral-7b");
            registry.advance("mistral-7b", 30);

            assert!(registry.release("mistral-7b"));
            assert!(!registry.release("mistral-7b"));

            let model = registry.get("mistral-7b").unwrap();
            assert_eq!(model.status, ModelStatus::Downloading);
            assert_eq!(model.download_progress, Some(30));
        }
    }
}
