//! Per-video progress tracking and callback fan-out

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::model::{ProcessingStatus, ProgressInfo};

/// Observer notified on every progress change.
///
/// A callback that returns an error is logged and unregistered.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, video_id: &str, info: &ProgressInfo) -> anyhow::Result<()>;
}

impl<F> ProgressCallback for F
where
    F: Fn(&str, &ProgressInfo) -> anyhow::Result<()> + Send + Sync,
{
    fn on_progress(&self, video_id: &str, info: &ProgressInfo) -> anyhow::Result<()> {
        self(video_id, info)
    }
}

/// Handle returned by `add_callback`, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Progress tracker for one video, cheap to clone and share
#[derive(Clone)]
pub struct ProgressTracker {
    video_id: Arc<str>,
    stages: Arc<Mutex<HashMap<ProcessingStatus, ProgressInfo>>>,
    callbacks: Arc<Mutex<CallbackRegistry>>,
}

#[derive(Default)]
struct CallbackRegistry {
    next_id: u64,
    entries: Vec<(CallbackId, Arc<dyn ProgressCallback>)>,
}

impl ProgressTracker {
    pub fn new(video_id: &str) -> Self {
        Self {
            video_id: Arc::from(video_id),
            stages: Arc::new(Mutex::new(HashMap::new())),
            callbacks: Arc::new(Mutex::new(CallbackRegistry::default())),
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// Register an observer
    pub fn add_callback(&self, callback: Arc<dyn ProgressCallback>) -> CallbackId {
        let mut registry = match self.callbacks.lock() {
            Ok(registry) => registry,
            Err(poisoned) => poisoned.into_inner(),
        };
        registry.next_id += 1;
        let id = CallbackId(registry.next_id);
        registry.entries.push((id, callback));
        id
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        if let Ok(mut registry) = self.callbacks.lock() {
            let before = registry.entries.len();
            registry.entries.retain(|(entry_id, _)| *entry_id != id);
            return registry.entries.len() != before;
        }
        false
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks
            .lock()
            .map(|registry| registry.entries.len())
            .unwrap_or(0)
    }

    /// Record progress for `stage`, keeping the stage's original start time
    pub fn update_progress(
        &self,
        stage: ProcessingStatus,
        percent: f64,
        details: HashMap<String, Value>,
    ) -> ProgressInfo {
        let info = {
            let mut stages = match self.stages.lock() {
                Ok(stages) => stages,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut info = ProgressInfo::new(stage, percent);
            info.details = details;
            if let Some(previous) = stages.get(&stage) {
                info.start_time = previous.start_time;
            }
            stages.insert(stage, info.clone());
            info
        };

        debug!(
            video_id = %self.video_id,
            stage = %stage,
            progress = info.progress,
            "Progress updated"
        );
        self.notify(&info);
        info
    }

    /// Record an error against `stage` without failing the caller
    pub fn mark_stage_error(
        &self,
        stage: ProcessingStatus,
        message: &str,
        details: HashMap<String, Value>,
    ) -> ProgressInfo {
        let info = {
            let mut stages = match self.stages.lock() {
                Ok(stages) => stages,
                Err(poisoned) => poisoned.into_inner(),
            };
            let info = stages
                .entry(stage)
                .or_insert_with(|| ProgressInfo::new(stage, 0.0));
            info.error = Some(message.to_string());
            info.details.extend(details);
            info.clone()
        };

        warn!(
            video_id = %self.video_id,
            stage = %stage,
            error = message,
            "Stage failed"
        );
        self.notify(&info);
        info
    }

    pub fn get_progress(&self, stage: ProcessingStatus) -> Option<ProgressInfo> {
        self.stages
            .lock()
            .ok()
            .and_then(|stages| stages.get(&stage).cloned())
    }

    /// Every recorded stage, ordered by progress weight
    pub fn all_progress(&self) -> Vec<ProgressInfo> {
        let mut all: Vec<ProgressInfo> = self
            .stages
            .lock()
            .map(|stages| stages.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| {
            a.stage
                .progress_weight()
                .total_cmp(&b.stage.progress_weight())
        });
        all
    }

    /// Highest-weighted stage reached so far
    pub fn current_stage(&self) -> Option<ProcessingStatus> {
        self.stages.lock().ok().and_then(|stages| {
            stages
                .keys()
                .copied()
                .max_by(|a, b| a.progress_weight().total_cmp(&b.progress_weight()))
        })
    }

    /// Overall progress in percent.
    ///
    /// The highest-weighted stage contributes its weight, and its own
    /// percentage is blended linearly toward the next weight in the table.
    pub fn get_overall_progress(&self) -> f64 {
        let Some(stage) = self.current_stage() else {
            return 0.0;
        };
        let percent = self
            .get_progress(stage)
            .map(|info| info.progress)
            .unwrap_or(0.0);

        let base = stage.progress_weight();
        let next = next_weight(base);
        ((base + (next - base) * percent / 100.0) * 100.0).clamp(0.0, 100.0)
    }

    fn notify(&self, info: &ProgressInfo) {
        // Callbacks run outside the lock so they may call back into the tracker
        let entries: Vec<(CallbackId, Arc<dyn ProgressCallback>)> = match self.callbacks.lock() {
            Ok(registry) => registry.entries.clone(),
            Err(_) => return,
        };

        let failed: Vec<CallbackId> = entries
            .iter()
            .filter_map(|(id, callback)| match callback.on_progress(&self.video_id, info) {
                Ok(()) => None,
                Err(e) => {
                    warn!(
                        video_id = %self.video_id,
                        "Progress callback failed, removing it: {:#}",
                        e
                    );
                    Some(*id)
                }
            })
            .collect();

        for id in failed {
            self.remove_callback(id);
        }
    }
}

const WEIGHT_TABLE: [ProcessingStatus; 5] = [
    ProcessingStatus::Pending,
    ProcessingStatus::Uploading,
    ProcessingStatus::Validating,
    ProcessingStatus::Processing,
    ProcessingStatus::Completed,
];

fn next_weight(current: f64) -> f64 {
    WEIGHT_TABLE
        .iter()
        .map(|stage| stage.progress_weight())
        .find(|weight| *weight > current)
        .unwrap_or(current)
}

/// Callback that reports progress through `tracing`
pub struct LoggingProgressCallback;

impl ProgressCallback for LoggingProgressCallback {
    fn on_progress(&self, video_id: &str, info: &ProgressInfo) -> anyhow::Result<()> {
        match &info.error {
            Some(error) => warn!(video_id, stage = %info.stage, "{}", error),
            None => info!(
                video_id,
                stage = %info.stage,
                "{:>5.1}%",
                info.progress
            ),
        }
        Ok(())
    }
}
