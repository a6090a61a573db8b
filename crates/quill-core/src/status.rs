//! System status snapshot and its background refresh.
//!
//! The numbers are diagnostic only. A [`MetricsSampler`] produces each new
//! snapshot from the previous one; the default is a bounded random walk.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::event_bus::{EventBus, STATUS_UPDATED};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub models_loaded: u32,
    pub memory_usage: f64,
    pub cpu_usage: f64,
    pub is_online: bool,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            models_loaded: 2,
            memory_usage: 45.0,
            cpu_usage: 23.0,
            is_online: true,
        }
    }
}

/// Produces the next status snapshot.
pub trait MetricsSampler: Send + Sync {
    fn sample(&self, previous: &SystemStatus) -> SystemStatus;
}

/// A bounded random-walk for one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Walk {
    pub max_delta: f64,
    pub min: f64,
    pub max: f64,
}

impl Walk {
    pub fn step(&self, value: f64, rng: &mut impl Rng) -> f64 {
        let delta = rng.gen_range(-self.max_delta..=self.max_delta);
        (value + delta).clamp(self.min, self.max)
    }
}

/// Perturbs memory and CPU usage; leaves everything else alone.
#[derive(Debug, Clone)]
pub struct RandomWalkSampler {
    pub memory: Walk,
    pub cpu: Walk,
}

impl Default for RandomWalkSampler {
    fn default() -> Self {
        Self {
            memory: Walk {
                max_delta: 5.0,
                min: 30.0,
                max: 80.0,
            },
            cpu: Walk {
                max_delta: 10.0,
                min: 10.0,
                max: 90.0,
            },
        }
    }
}

impl MetricsSampler for RandomWalkSampler {
    fn sample(&self, previous: &SystemStatus) -> SystemStatus {
        let mut rng = rand::thread_rng();
        SystemStatus {
            memory_usage: self.memory.step(previous.memory_usage, &mut rng),
            cpu_usage: self.cpu.step(previous.cpu_usage, &mut rng),
            ..previous.clone()
        }
    }
}

/// Background thread that refreshes a shared [`SystemStatus`] on an interval.
///
/// Stops on [`StatusTicker::stop`] or on drop; the thread is always joined.
pub struct StatusTicker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StatusTicker {
    pub fn start(
        status: Arc<Mutex<SystemStatus>>,
        sampler: Arc<dyn MetricsSampler>,
        interval: Duration,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let mut guard = status.lock().unwrap_or_else(PoisonError::into_inner);
                    *guard = sampler.sample(&guard);
                    event_bus.emit(STATUS_UPDATED, &*guard);
                }
                // Explicit stop, or the ticker was dropped.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Status ticker thread panicked");
            }
        }
    }
}

impl Drop for StatusTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
