use crate::metrics::Metrics;
use crate::models::operation::scale_clone_progress;
use crate::models::{
    CredentialInput, Credentials, FailureDetail, FetchTarget, OperationState, Phase,
    PipelineConfig, SourceLocator,
};
use crate::services::credentials::{self, clone_url};
use crate::services::fetch::{FetchError, FileFetcher};
use crate::services::git::{GitError, GitService};
use crate::services::relocate::{RelocationReport, Relocator};
use crate::services::scratch;
use crate::state::{StateChange, StateError, StateManager};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Errors starting a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("A run is already active for {destination_root}")]
    AlreadyRunning { destination_root: Utf8PathBuf },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] FetchError),

    #[error("No tokio runtime available to run the pipeline")]
    NoRuntime,
}

/// Sequences authentication, scratch preparation, clone, relocation and
/// cleanup for one destination root.
///
/// At most one run is active per instance. Runs execute on the tokio
/// runtime captured at construction (or supplied with
/// [`with_runtime`](Self::with_runtime)), so [`start`](Self::start) can be
/// called from a thread that has no runtime of its own, such as a UI thread.
/// Callers observe runs through the returned [`PipelineRun`].
pub struct AssetPipeline {
    config: PipelineConfig,
    runtime: Option<Handle>,
    git: GitService,
    fetcher: FileFetcher,
    metrics: Arc<Metrics>,
    active: Arc<AtomicBool>,
}

impl AssetPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let fetcher = FileFetcher::new(
            &config.http.user_agent,
            Duration::from_secs(config.http.timeout_secs),
        )?;

        Ok(Self {
            runtime: Handle::try_current().ok(),
            git: GitService::new(config.tool.program.clone()),
            fetcher,
            metrics: Arc::new(Metrics::new()),
            active: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Spawn runs on `handle` instead of the runtime captured by `new`
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Replace the tool invoker, e.g. to plug in another progress parser
    pub fn with_git(mut self, git: GitService) -> Self {
        self.git = git;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn git(&self) -> &GitService {
        &self.git
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Whether a run started by this instance is still in flight
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a bulk acquisition run in the background.
    ///
    /// Never blocks the calling thread. Fails immediately with
    /// [`PipelineError::AlreadyRunning`] while an earlier run of this
    /// instance has not finished, and with [`PipelineError::NoRuntime`] when
    /// no runtime was captured or supplied.
    pub fn start(
        self: &Arc<Self>,
        source: SourceLocator,
        input: CredentialInput,
    ) -> Result<PipelineRun, PipelineError> {
        let runtime = match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| PipelineError::NoRuntime)?,
        };

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::AlreadyRunning {
                destination_root: self.config.destination_root.clone(),
            });
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let state = StateManager::new();
        state.set_source(source.to_string());

        let pipeline = Arc::clone(self);
        let run_state = state.clone();
        let handle = runtime.spawn(async move {
            let _guard = guard;
            pipeline.metrics.record_run_started();

            if let Err(e) = pipeline.drive(&run_state, &source, &input).await {
                tracing::error!("Pipeline state machine error: {}", e);
            }

            match run_state.read(|s| s.phase) {
                Phase::Complete => pipeline.metrics.record_run_completed(),
                _ => pipeline.metrics.record_run_failed(),
            }
            tracing::info!("{}", run_state.read(OperationState::summary));
        });

        Ok(PipelineRun { state, handle })
    }

    /// Download one named asset outside the bulk pipeline.
    ///
    /// Failure affects only this file; no run state is touched.
    pub async fn fetch_single_file(
        &self,
        source: &SourceLocator,
        input: &CredentialInput,
        target: &FetchTarget,
    ) -> Result<Utf8PathBuf, FetchError> {
        let credentials = credentials::resolve(input, source).map_err(|e| {
            tracing::error!("{}", e);
            FetchError::AuthRequired
        })?;

        match self.fetcher.fetch(source, &credentials, target).await {
            Ok(path) => {
                self.metrics.record_file_fetched();
                Ok(path)
            }
            Err(e) => {
                self.metrics.record_fetch_failed();
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        state: &StateManager,
        source: &SourceLocator,
        input: &CredentialInput,
    ) -> Result<(), StateError> {
        tracing::info!("Starting acquisition of {}", source);

        // Public sources need no authentication step at all
        let credentials = if !source.is_private && !input.is_supplied() {
            state.transition(Phase::PreparingScratch, "Preparing workspace...")?;
            Credentials::None
        } else {
            state.transition(Phase::Authenticating, "Authenticating...")?;
            match credentials::resolve(input, source) {
                Ok(credentials) => {
                    tracing::info!("Using {} authentication", credentials.mode());
                    state.transition(Phase::PreparingScratch, "Preparing workspace...")?;
                    credentials
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    state.fail(FailureDetail::AuthRequired)?;
                    return Ok(());
                }
            }
        };

        let scratch_base = self.config.scratch_base().clone();
        let scratch_name = self.config.scratch.name.clone();
        let prepared =
            tokio::task::spawn_blocking(move || scratch::prepare(&scratch_base, &scratch_name))
                .await;
        let scratch_path = match prepared {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                state.fail(FailureDetail::Scratch {
                    path: e.path.clone(),
                    reason: e.source.to_string(),
                })?;
                return Ok(());
            }
            Err(e) => {
                state.fail(FailureDetail::Scratch {
                    path: self.config.scratch_base().join(&self.config.scratch.name),
                    reason: e.to_string(),
                })?;
                return Ok(());
            }
        };
        state.set_scratch_path(Some(scratch_path.clone()));

        state.transition(Phase::Cloning, "Checking for git...")?;
        if let Err(detail) = self.clone_into(state, source, &credentials, &scratch_path).await {
            self.teardown(state, &scratch_path).await;
            state.fail(detail)?;
            return Ok(());
        }

        state.transition(Phase::Relocating, "Moving files to correct locations...")?;
        let report = self.relocate(&scratch_path).await;
        self.metrics
            .record_relocation(report.total_files_copied(), report.skipped_count());
        state.set_relocation(report);

        state.transition(Phase::CleaningUp, "Cleaning up temporary files...")?;
        self.teardown(state, &scratch_path).await;

        state.transition(Phase::Complete, "Download and installation complete!")?;
        Ok(())
    }

    async fn clone_into(
        &self,
        state: &StateManager,
        source: &SourceLocator,
        credentials: &Credentials,
        scratch_path: &Utf8Path,
    ) -> Result<(), FailureDetail> {
        if !self.git.is_available() {
            return Err(FailureDetail::ToolNotFound {
                program: self.git.program().to_string(),
            });
        }

        let url = clone_url(source, credentials).map_err(|e| FailureDetail::Tool {
            reason: e.to_string(),
        })?;

        state.set_status(format!("Cloning {}...", source.slug()));
        let started = Instant::now();
        let result = self
            .git
            .clone_repo(&url, scratch_path, |fraction, line| {
                state.set_progress(scale_clone_progress(fraction), line);
            })
            .await;
        drop(url);
        self.metrics.record_clone_time(started.elapsed());

        result.map_err(|e| match e {
            GitError::ToolNotFound { program } => FailureDetail::ToolNotFound { program },
            GitError::Exit { exit_code, output } => FailureDetail::Clone { exit_code, output },
            other => FailureDetail::Tool {
                reason: other.to_string(),
            },
        })
    }

    async fn relocate(&self, scratch_path: &Utf8Path) -> RelocationReport {
        let relocator = Relocator::new(
            self.config.destination_root.clone(),
            self.config.relocation.clone(),
        );
        let scratch_path = scratch_path.to_path_buf();

        match tokio::task::spawn_blocking(move || relocator.relocate(&scratch_path)).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Relocation task failed: {}", e);
                RelocationReport::default()
            }
        }
    }

    /// Remove the scratch directory; problems become stored warnings
    async fn teardown(&self, state: &StateManager, scratch_path: &Utf8Path) {
        let path = scratch_path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || scratch::destroy(&path)).await;

        let warning = match result {
            Ok(Ok(())) => {
                state.set_scratch_path(None);
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("Scratch cleanup task failed: {}", e),
        };

        self.metrics.record_cleanup_warning();
        state.add_warning(warning);
    }
}

/// Clears the instance's active flag when the run task ends, even on panic
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to one background run
pub struct PipelineRun {
    state: StateManager,
    handle: JoinHandle<()>,
}

impl PipelineRun {
    /// Snapshot of the run's current state
    pub fn state(&self) -> OperationState {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to reach a terminal phase and return the final state
    pub async fn wait(self) -> OperationState {
        if let Err(e) = self.handle.await {
            tracing::error!("Pipeline task ended abnormally: {}", e);
        }
        self.state.snapshot()
    }
}
