use crate::models::PipelineConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// File name of the pipeline configuration inside the config directory
pub const CONFIG_FILE_NAME: &str = "assetpull.yaml";

/// Configuration manager for loading and saving `assetpull.yaml`.
///
/// The file never holds credentials; those are supplied per run from flags
/// or the environment.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    /// Load the pipeline configuration.
    ///
    /// # Returns
    /// The loaded PipelineConfig, or the defaults if the file doesn't exist
    pub fn load_config(&self) -> Result<PipelineConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.config_path
            );
            return Ok(PipelineConfig::default());
        }

        let file_contents = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let config: PipelineConfig = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        tracing::info!("Loaded config from {}", self.config_path);
        Ok(config)
    }

    /// Save the pipeline configuration.
    pub fn save_config(&self, config: &PipelineConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Write a default configuration unless one already exists.
    ///
    /// # Returns
    /// `true` if a new file was written
    pub fn init_config(&self, force: bool) -> Result<bool> {
        if self.config_path.exists() && !force {
            tracing::info!("Config already present at {}", self.config_path);
            return Ok(false);
        }

        self.save_config(&PipelineConfig::default())?;
        Ok(true)
    }

    /// Whether `assetpull.yaml` is present in the config directory
    pub fn config_exists(&self) -> bool {
        self.config_path.is_file()
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}
