//! Data models for assetpull.
//!
//! This module contains the core data structures used throughout the crate:
//! - [`OperationState`]: The per-run state (phase, progress, status, failure, warnings)
//! - [`Phase`]: The pipeline state machine and its allowed transitions
//! - [`Credentials`] / [`CredentialInput`]: Resolved and raw authentication material
//! - [`SourceLocator`]: Identity of the remote repository holding the bundle
//! - [`FetchTarget`]: One named asset for the direct file fetcher
//! - [`PipelineConfig`]: Settings loaded from `assetpull.yaml`
//!
//! # Architecture Note
//!
//! - **Serializable**: Config structs derive `Serialize`/`Deserialize` for YAML persistence
//! - **Secret-free**: Nothing holding a credential is serializable, and its `Debug` output is redacted
//! - **Snapshot-friendly**: OperationState is `Clone` and wrapped by [`StateManager`](crate::state::StateManager)

pub mod config;
pub mod operation;
pub mod source;

pub use config::{
    HttpConfig, LoggingConfig, PipelineConfig, RelocationEntry, ScratchConfig, SourceConfig,
    ToolConfig,
};
pub use operation::{FailureDetail, OperationState, Phase};
pub use source::{CredentialInput, Credentials, FetchTarget, SourceLocator};
