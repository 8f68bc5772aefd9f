// assetpull - Provision a local asset layout from a remote git repository
//
// This is the library crate containing the pipeline, its services and data structures.
// The binary crate (main.rs) provides the command-line entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use metrics::Metrics;
pub use models::{CredentialInput, Credentials, FetchTarget, OperationState, Phase, PipelineConfig, SourceLocator};
pub use services::{AssetPipeline, PipelineRun};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
