//! Build progress reporting.
//!
//! The core never logs progress on its own. It reports [`BuildEvent`]s to
//! the [`BuildObserver`] held by the build context; the default
//! [`TracingObserver`] forwards them to `tracing`, and tests capture them
//! with a [`RecordingObserver`].

use std::path::PathBuf;
use std::sync::Mutex;

use crate::build::Phase;

/// Something worth telling the person running the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    ConfigSummary { lines: Vec<String> },
    BuildStarted { work_dir: PathBuf },
    PhaseStarted(Phase),
    PhaseSkipped { phase: Phase, reason: String },
    PhaseFinished(Phase),
    SbomWritten { path: PathBuf },
    BuildFinished { work_dir: PathBuf },
}

/// Sink for build events. Called from worker threads during concurrent
/// phases.
pub trait BuildObserver: Send + Sync {
    fn on_event(&self, event: &BuildEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BuildObserver for TracingObserver {
    fn on_event(&self, event: &BuildEvent) {
        match event {
            BuildEvent::ConfigSummary { lines } => {
                for line in lines {
                    tracing::info!("{line}");
                }
            }
            BuildEvent::BuildStarted { work_dir } => {
                tracing::info!("building image filesystem in {}", work_dir.display());
            }
            BuildEvent::PhaseStarted(phase) => tracing::debug!(%phase, "phase started"),
            BuildEvent::PhaseSkipped { phase, reason } => {
                tracing::debug!(%phase, %reason, "phase skipped");
            }
            BuildEvent::PhaseFinished(phase) => tracing::debug!(%phase, "phase finished"),
            BuildEvent::SbomWritten { path } => {
                tracing::info!("wrote SBOM to {}", path.display());
            }
            BuildEvent::BuildFinished { work_dir } => {
                tracing::info!("finished building filesystem in {}", work_dir.display());
            }
        }
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<BuildEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<BuildEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Phases that started, in order.
    pub fn started_phases(&self) -> Vec<Phase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BuildEvent::PhaseStarted(phase) => Some(phase),
                _ => None,
            })
            .collect()
    }

    /// Lines of the most recent configuration summary.
    pub fn summary_lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .rev()
            .find_map(|e| match e {
                BuildEvent::ConfigSummary { lines } => Some(lines),
                _ => None,
            })
            .unwrap_or_default()
    }
}

impl BuildObserver for RecordingObserver {
    fn on_event(&self, event: &BuildEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
