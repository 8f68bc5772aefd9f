//! Services module - the acquisition pipeline and its parts.
//!
//! Everything here is framework-agnostic: no terminal or GUI code, only the
//! logic of pulling a remote asset bundle into a local layout.
//!
//! # Components
//!
//! - [`credentials`]: Decides token / basic / anonymous access and builds
//!   authenticated addresses. Pure, no I/O.
//! - [`GitService`]: Runs the external version-control tool, streams its
//!   output, and turns progress lines into fractions via a [`ProgressParser`].
//! - [`scratch`]: Creates and force-removes the per-run scratch checkout.
//! - [`Relocator`]: Merges category subtrees of the checkout into the
//!   destination layout, producing a [`RelocationReport`].
//! - [`FileFetcher`]: Authenticated single-file downloads with
//!   write-then-rename replacement.
//! - [`AssetPipeline`]: The orchestrator callers use. Sequences the above and
//!   reports one progress fraction and status line through a
//!   [`StateManager`](crate::state::StateManager).
//!
//! # Usage Example
//!
//! ```ignore
//! use assetpull::services::AssetPipeline;
//! use assetpull::models::{CredentialInput, PipelineConfig, SourceLocator};
//! use std::sync::Arc;
//!
//! let pipeline = Arc::new(AssetPipeline::new(PipelineConfig::default())?);
//! let run = pipeline.start(
//!     SourceLocator::github("studio", "bundle", true),
//!     CredentialInput::with_token(token),
//! )?;
//!
//! let final_state = run.wait().await;
//! println!("{}", final_state.summary());
//! ```

pub mod credentials;
pub mod fetch;
pub mod git;
pub mod pipeline;
pub mod relocate;
pub mod scratch;

pub use credentials::{AuthRequired, AuthenticatedUrl};
pub use fetch::{FetchError, FileFetcher};
pub use git::{GitError, GitService, ProgressParser, ReceivingObjectsParser};
pub use pipeline::{AssetPipeline, PipelineError, PipelineRun};
pub use relocate::{CategoryReport, RelocationReport, Relocator};
pub use scratch::{CleanupError, ScratchError};
