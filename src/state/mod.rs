// State management module
//
// This module provides the StateManager which wraps one run's OperationState with
// thread-safe access using Arc<RwLock<T>> and emits change events to observers.

use crate::models::{FailureDetail, OperationState, Phase};
use crate::services::relocate::RelocationReport;
use camino::Utf8PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::broadcast;

/// Change events emitted when state is modified
///
/// Observers (a CLI progress line, a GUI) subscribe to these instead of
/// polling snapshots.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// The run entered a new phase
    PhaseChanged { from: Phase, to: Phase },

    /// Progress fraction or status line changed
    ProgressUpdated { progress: f32, status: String },

    /// A non-fatal problem was recorded
    WarningRecorded { message: String },

    /// The run reached a terminal phase
    RunFinished { phase: Phase, succeeded: bool },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Invalid phase transition {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },
}

/// Thread-safe owner of one run's [`OperationState`]
///
/// - [`read()`](Self::read) / [`snapshot()`](Self::snapshot) for observers
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to state changes
///
/// Two rules hold no matter how the state is mutated: progress never
/// decreases, and the phase only moves along the transitions
/// [`Phase::can_transition_to`] allows.
pub struct StateManager {
    state: Arc<RwLock<OperationState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager in [`Phase::Idle`]
    ///
    /// The broadcast channel buffers 100 events; slow subscribers lag rather
    /// than block the run.
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(OperationState::default())),
            state_tx,
        }
    }

    /// Get a cloned snapshot of the current state
    pub fn snapshot(&self) -> OperationState {
        self.read_guard().clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let progress = state_manager.read(|state| state.progress);
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&OperationState) -> R,
    {
        let state = self.read_guard();
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// The closure runs under the write lock. Afterwards a progress
    /// regression is clamped back and an illegal phase change is reverted.
    ///
    /// # Returns
    /// The StateChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut OperationState),
    {
        let mut state = self.write_guard();
        let old_state = state.clone();

        update_fn(&mut state);
        enforce_invariants(&old_state, &mut state);

        let changes = detect_changes(&old_state, &state);
        drop(state);

        for change in &changes {
            // Nobody listening is fine
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// Move to `to`, snapping progress up to the phase's floor
    pub fn transition(
        &self,
        to: Phase,
        status: impl Into<String>,
    ) -> Result<Vec<StateChange>, StateError> {
        let from = self.read(|state| state.phase);
        if !from.can_transition_to(to) {
            return Err(StateError::InvalidTransition { from, to });
        }

        tracing::info!("Phase {} -> {}", from, to);
        let status = status.into();
        Ok(self.update(|state| {
            state.phase = to;
            state.status = status;
            if let Some(floor) = to.progress_floor() {
                state.progress = state.progress.max(floor);
            }
        }))
    }

    /// Record progress within the current phase
    pub fn set_progress(&self, fraction: f32, status: impl Into<String>) -> Vec<StateChange> {
        let status = status.into();
        self.update(|state| {
            state.progress = fraction.clamp(0.0, 1.0);
            state.status = status;
        })
    }

    pub fn set_status(&self, status: impl Into<String>) -> Vec<StateChange> {
        let status = status.into();
        self.update(|state| state.status = status)
    }

    /// Label the run with the source it pulls from
    pub fn set_source(&self, source: impl Into<String>) -> Vec<StateChange> {
        let source = source.into();
        self.update(|state| state.source = Some(source))
    }

    pub fn set_scratch_path(&self, path: Option<Utf8PathBuf>) -> Vec<StateChange> {
        self.update(|state| state.scratch_path = path)
    }

    /// Store the relocation report and surface its warnings
    pub fn set_relocation(&self, report: RelocationReport) -> Vec<StateChange> {
        self.update(|state| {
            state.warnings.extend(report.warnings());
            state.relocation = Some(report);
        })
    }

    pub fn add_warning(&self, message: impl Into<String>) -> Vec<StateChange> {
        let message = message.into();
        tracing::warn!("{}", message);
        self.update(|state| state.warnings.push(message))
    }

    /// End the run in [`Phase::Failed`] with a structured reason
    pub fn fail(&self, detail: FailureDetail) -> Result<Vec<StateChange>, StateError> {
        let from = self.read(|state| state.phase);
        if !from.can_transition_to(Phase::Failed) {
            return Err(StateError::InvalidTransition {
                from,
                to: Phase::Failed,
            });
        }

        tracing::error!("Run failed during {}: {}", from, detail);
        Ok(self.update(|state| {
            state.phase = Phase::Failed;
            state.status = detail.to_string();
            state.error = Some(detail);
        }))
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, OperationState> {
        // A panicked writer cannot leave the state half-typed; keep serving it
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, OperationState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn enforce_invariants(old: &OperationState, new: &mut OperationState) {
    if new.progress < old.progress {
        new.progress = old.progress;
    }
    if !new.progress.is_finite() {
        new.progress = old.progress;
    }
    if old.phase != new.phase && !old.phase.can_transition_to(new.phase) {
        tracing::warn!("Rejected phase change {} -> {}", old.phase, new.phase);
        new.phase = old.phase;
    }
}

/// Work out which events a mutation produced
fn detect_changes(old: &OperationState, new: &OperationState) -> Vec<StateChange> {
    let mut changes = Vec::new();

    if old.phase != new.phase {
        changes.push(StateChange::PhaseChanged {
            from: old.phase,
            to: new.phase,
        });
    }

    if old.progress != new.progress || old.status != new.status {
        changes.push(StateChange::ProgressUpdated {
            progress: new.progress,
            status: new.status.clone(),
        });
    }

    if new.warnings.len() > old.warnings.len() {
        for message in &new.warnings[old.warnings.len()..] {
            changes.push(StateChange::WarningRecorded {
                message: message.clone(),
            });
        }
    }

    if old.phase != new.phase && new.phase.is_terminal() {
        changes.push(StateChange::RunFinished {
            phase: new.phase,
            succeeded: new.phase == Phase::Complete,
        });
    }

    changes
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Clones share the same state and channel
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}
