use crate::services::relocate::RelocationReport;
use camino::Utf8PathBuf;
use std::fmt;
use thiserror::Error;

/// Phase of a pipeline run.
///
/// ```text
/// Idle → Authenticating → PreparingScratch → Cloning → Relocating → CleaningUp → Complete
///   └──────────────────────────┘ (public source, no credentials)
/// Authenticating | PreparingScratch | Cloning → Failed
/// ```
///
/// `Complete` and `Failed` are terminal: a new run needs a fresh
/// [`OperationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    #[default]
    Idle,
    Authenticating,
    PreparingScratch,
    Cloning,
    Relocating,
    CleaningUp,
    Complete,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Authenticating)
                | (Idle, PreparingScratch)
                | (Authenticating, PreparingScratch)
                | (Authenticating, Failed)
                | (PreparingScratch, Cloning)
                | (PreparingScratch, Failed)
                | (Cloning, Relocating)
                | (Cloning, Failed)
                | (Relocating, CleaningUp)
                | (CleaningUp, Complete)
        )
    }

    /// Progress fraction the run snaps to when entering this phase.
    ///
    /// `Failed` keeps whatever progress was reached.
    pub fn progress_floor(self) -> Option<f32> {
        match self {
            Phase::Idle => Some(0.0),
            Phase::Authenticating => Some(0.05),
            Phase::PreparingScratch => Some(0.10),
            Phase::Cloning => Some(CLONE_PROGRESS_START),
            Phase::Relocating => Some(CLONE_PROGRESS_END),
            Phase::CleaningUp => Some(0.90),
            Phase::Complete => Some(1.0),
            Phase::Failed => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Authenticating => "authenticating",
            Phase::PreparingScratch => "preparing scratch",
            Phase::Cloning => "cloning",
            Phase::Relocating => "relocating",
            Phase::CleaningUp => "cleaning up",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Start of the progress sub-range reserved for the external tool
pub const CLONE_PROGRESS_START: f32 = 0.10;

/// End of the progress sub-range reserved for the external tool
pub const CLONE_PROGRESS_END: f32 = 0.80;

/// Scale a tool-reported fraction into the clone sub-range
pub fn scale_clone_progress(fraction: f32) -> f32 {
    let fraction = fraction.clamp(0.0, 1.0);
    CLONE_PROGRESS_START + fraction * (CLONE_PROGRESS_END - CLONE_PROGRESS_START)
}

/// Structured reason a run ended in [`Phase::Failed`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureDetail {
    #[error("Authentication required for private repositories")]
    AuthRequired,

    #[error("{program} not found on PATH")]
    ToolNotFound { program: String },

    #[error("Clone failed with exit code {exit_code}. Output: {output}")]
    Clone { exit_code: i32, output: String },

    #[error("Could not run the version-control tool: {reason}")]
    Tool { reason: String },

    #[error("Could not prepare scratch directory {path}: {reason}")]
    Scratch { path: Utf8PathBuf, reason: String },
}

/// Mutable state of one pipeline run.
///
/// Owned by the run's [`StateManager`](crate::state::StateManager); callers only
/// ever see cloned snapshots.
#[derive(Debug, Clone, Default)]
pub struct OperationState {
    pub phase: Phase,

    /// Overall progress in `[0, 1]`, never decreasing within a run
    pub progress: f32,

    pub status: String,

    /// Display form of the source being pulled
    pub source: Option<String>,

    pub scratch_path: Option<Utf8PathBuf>,

    pub error: Option<FailureDetail>,

    /// Non-fatal problems collected during the run
    pub warnings: Vec<String>,

    pub relocation: Option<RelocationReport>,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.phase, Phase::Idle) && !self.phase.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// One-line outcome summary for the end of a run
    pub fn summary(&self) -> String {
        match self.phase {
            Phase::Complete => {
                let files = self
                    .relocation
                    .as_ref()
                    .map(|r| r.total_files_copied())
                    .unwrap_or(0);
                let skipped = self
                    .relocation
                    .as_ref()
                    .map(|r| r.skipped_count())
                    .unwrap_or(0);
                if self.warnings.is_empty() {
                    format!("Complete: {} files placed, {} categories skipped", files, skipped)
                } else {
                    format!(
                        "Complete with {} warnings: {} files placed, {} categories skipped",
                        self.warnings.len(),
                        files,
                        skipped
                    )
                }
            }
            Phase::Failed => match &self.error {
                Some(detail) => format!("Failed: {}", detail),
                None => "Failed".to_string(),
            },
            phase => format!("{} ({:.0}%)", phase, self.progress * 100.0),
        }
    }
}
