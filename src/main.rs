//! assetpull - pull a remote asset bundle into a local layout
//!
//! Command-line front end over [`AssetPipeline`].
//!
//! # Execution Flow
//!
//! 1. Parse arguments, load `assetpull.yaml` from the config directory
//! 2. Initialize logging → `logs/assetpull.<date>`
//! 3. Create a tokio runtime for subprocess and HTTP work
//! 4. Run the requested subcommand
//! 5. Log the metrics summary and shut the runtime down
//!
//! Credentials come from flags or the `ASSETPULL_TOKEN`, `ASSETPULL_USERNAME`
//! and `ASSETPULL_PASSWORD` environment variables, never from the config file.

use anyhow::{Context, Result, anyhow, bail};
use assetpull::models::{FetchTarget, LoggingConfig};
use assetpull::services::GitService;
use assetpull::{
    APP_NAME, AssetPipeline, ConfigManager, CredentialInput, PipelineConfig, SourceLocator,
    StateChange, VERSION,
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Provision a local asset layout from a remote git repository
#[derive(Parser)]
#[command(name = "assetpull")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding assetpull.yaml
    #[arg(long, global = true, default_value = ".")]
    config_dir: Utf8PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Only log to the log file, not the console
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone the source bundle and relocate it into the destination root
    Sync(SyncArgs),

    /// Download one file from the source branch
    Fetch(FetchArgs),

    /// Run `git pull` in an existing checkout
    Pull(PullArgs),

    /// Report whether the version-control tool is available
    Detect,

    /// Write a default assetpull.yaml
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct CredentialArgs {
    /// Personal access token (preferred over username/password)
    #[arg(long, env = "ASSETPULL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, env = "ASSETPULL_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "ASSETPULL_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl CredentialArgs {
    fn into_input(self) -> CredentialInput {
        CredentialInput::new(self.token, self.username, self.password)
    }
}

#[derive(Args)]
struct SourceArgs {
    /// Repository owner, overrides source.owner
    #[arg(long)]
    owner: Option<String>,

    /// Repository name, overrides source.repo
    #[arg(long)]
    repo: Option<String>,

    /// Branch, overrides source.branch
    #[arg(long)]
    branch: Option<String>,

    /// Treat the repository as public
    #[arg(long)]
    public: bool,
}

#[derive(Args)]
struct SyncArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    credentials: CredentialArgs,

    /// Destination root, overrides destination_root
    #[arg(long)]
    dest: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct FetchArgs {
    /// Path of the file inside the repository
    remote: String,

    /// Where to write the file
    destination: Utf8PathBuf,

    /// Label used in status output
    #[arg(long)]
    label: Option<String>,

    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    credentials: CredentialArgs,
}

#[derive(Args)]
struct PullArgs {
    /// Checkout to update, defaults to destination_root
    directory: Option<Utf8PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;

    // Logging is not up yet, so the config is read before the subscriber exists
    let config_found = config_manager.config_exists();
    let mut config = config_manager.load_config()?;
    let logging = LoggingConfig {
        debug: config.logging.debug || cli.debug,
        console: config.logging.console && !cli.quiet,
        ..config.logging.clone()
    };
    let _guard = assetpull::logging::setup_logging(&logging)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    if config_found {
        tracing::info!("Loaded config from {}", config_manager.config_path());
    } else {
        tracing::warn!(
            "Config file not found at {}, using defaults",
            config_manager.config_path()
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("assetpull-worker")
        .build()
        .context("Failed to create tokio runtime")?;

    let result = match cli.command {
        Commands::InitConfig { force } => init_config(&config_manager, force),
        Commands::Detect => runtime.block_on(detect(&config)),
        Commands::Pull(args) => runtime.block_on(pull(&config, args)),
        Commands::Sync(args) => {
            apply_source_overrides(&mut config, &args.source);
            if let Some(dest) = args.dest {
                config.destination_root = dest;
            }
            runtime.block_on(sync(config, args.credentials.into_input()))
        }
        Commands::Fetch(args) => {
            apply_source_overrides(&mut config, &args.source);
            runtime.block_on(fetch(config, args))
        }
    };

    runtime.shutdown_timeout(Duration::from_secs(5));

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

fn apply_source_overrides(config: &mut PipelineConfig, args: &SourceArgs) {
    if let Some(owner) = &args.owner {
        config.source.owner = owner.clone();
    }
    if let Some(repo) = &args.repo {
        config.source.repo = repo.clone();
    }
    if let Some(branch) = &args.branch {
        config.source.branch = branch.clone();
    }
    if args.public {
        config.source.private = false;
    }
}

fn init_config(manager: &ConfigManager, force: bool) -> Result<()> {
    if manager.init_config(force)? {
        println!("Wrote {}", manager.config_path());
    } else {
        println!(
            "{} already exists, use --force to overwrite",
            manager.config_path()
        );
    }
    Ok(())
}

async fn detect(config: &PipelineConfig) -> Result<()> {
    let git = GitService::new(config.tool.program.clone());
    match git.detect() {
        Some(path) => {
            let version = git.version().await.unwrap_or_else(|e| e.to_string());
            println!("{} found at {} ({})", git.program(), path, version);
            Ok(())
        }
        None => bail!(
            "{} not found on PATH. Install it and try again",
            git.program()
        ),
    }
}

async fn pull(config: &PipelineConfig, args: PullArgs) -> Result<()> {
    let directory = args
        .directory
        .unwrap_or_else(|| config.destination_root.clone());
    let git = GitService::new(config.tool.program.clone());

    git.pull(&directory, |status| println!("{}", status))
        .await
        .with_context(|| format!("Failed to update {}", directory))?;

    println!("Update complete!");
    Ok(())
}

async fn sync(config: PipelineConfig, input: CredentialInput) -> Result<()> {
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    let source = SourceLocator::from_config(&config.source);
    let pipeline = Arc::new(AssetPipeline::new(config)?);

    let run = pipeline.start(source, input)?;
    let mut events = run.subscribe();

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StateChange::ProgressUpdated { progress, status }) => {
                    println!("[{:>3.0}%] {}", progress * 100.0, status);
                }
                Ok(StateChange::WarningRecorded { message }) => println!("warning: {}", message),
                Ok(StateChange::RunFinished { .. }) | Err(RecvError::Closed) => break,
                Ok(StateChange::PhaseChanged { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Progress printer skipped {} events", skipped);
                }
            }
        }
    });

    let state = run.wait().await;
    let _ = printer.await;
    pipeline.metrics().log_summary();

    println!("{}", state.summary());
    if let Some(report) = &state.relocation {
        for name in report.skipped() {
            println!("  skipped: {} (not in repository)", name);
        }
    }

    if state.succeeded() {
        Ok(())
    } else {
        Err(anyhow!(state.summary()))
    }
}

async fn fetch(config: PipelineConfig, args: FetchArgs) -> Result<()> {
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    let source = SourceLocator::from_config(&config.source);
    let label = args.label.unwrap_or_else(|| args.remote.clone());
    let target = FetchTarget::new(args.remote, args.destination, label);
    let input = args.credentials.into_input();

    let pipeline = AssetPipeline::new(config)?;
    let result = pipeline.fetch_single_file(&source, &input, &target).await;
    pipeline.metrics().log_summary();

    let path = result.with_context(|| format!("Failed to download {}", target.label))?;
    println!("Downloaded {} to {}", target.label, path);
    Ok(())
}
