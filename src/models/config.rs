use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Pipeline configuration from `assetpull.yaml`
///
/// Describes where the bundle lives, where it lands, and how the bulk clone is
/// laid out. Credentials are deliberately absent: they are supplied per run and
/// never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub source: SourceConfig,

    #[serde(default = "default_destination_root")]
    pub destination_root: Utf8PathBuf,

    #[serde(default)]
    pub scratch: ScratchConfig,

    #[serde(default = "default_relocation")]
    pub relocation: Vec<RelocationEntry>,

    #[serde(default)]
    pub tool: ToolConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_host")]
    pub host: String,

    pub owner: String,
    pub repo: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default = "default_private")]
    pub private: bool,

    /// Host serving raw file contents; derived from `host` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchConfig {
    /// Parent directory for the scratch checkout; defaults to the destination root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<Utf8PathBuf>,

    #[serde(default = "default_scratch_name")]
    pub name: String,
}

/// One `(category, destination)` pair of the relocation map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationEntry {
    pub category: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_program")]
    pub program: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_directory")]
    pub directory: Utf8PathBuf,

    #[serde(default = "default_log_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_console")]
    pub console: bool,
}

impl RelocationEntry {
    pub fn new(category: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            destination: destination.into(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            destination_root: default_destination_root(),
            scratch: ScratchConfig::default(),
            relocation: default_relocation(),
            tool: ToolConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            owner: String::new(),
            repo: String::new(),
            branch: default_branch(),
            private: default_private(),
            raw_host: None,
        }
    }
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            name: default_scratch_name(),
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            prefix: default_log_prefix(),
            debug: false,
            console: default_console(),
        }
    }
}

impl PipelineConfig {
    /// Directory that will hold the scratch checkout
    pub fn scratch_base(&self) -> &Utf8PathBuf {
        self.scratch.base_dir.as_ref().unwrap_or(&self.destination_root)
    }

    /// Check the configuration for values that would make a run meaningless
    pub fn validate(&self) -> Result<(), String> {
        if self.source.owner.trim().is_empty() || self.source.repo.trim().is_empty() {
            return Err("source.owner and source.repo must both be set".to_string());
        }
        if self.source.host.trim().is_empty() {
            return Err("source.host must not be empty".to_string());
        }
        if self.destination_root.as_str().trim().is_empty() {
            return Err("destination_root must not be empty".to_string());
        }
        if self.scratch.name.trim().is_empty() {
            return Err("scratch.name must not be empty".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.relocation {
            if entry.category.trim().is_empty() || entry.destination.trim().is_empty() {
                return Err("relocation entries need a category and a destination".to_string());
            }
            if !seen.insert(entry.category.as_str()) {
                return Err(format!("duplicate relocation category: {}", entry.category));
            }
        }

        Ok(())
    }
}

/// The six asset categories of the companion bundle, in processing order
pub fn default_relocation() -> Vec<RelocationEntry> {
    ["3dModel", "Plugins", "Scripts", "Materials", "Resources", "UI"]
        .into_iter()
        .map(|name| RelocationEntry::new(name, name))
        .collect()
}

fn default_host() -> String {
    "github.com".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_private() -> bool {
    true
}

fn default_destination_root() -> Utf8PathBuf {
    Utf8PathBuf::from("Assets")
}

fn default_scratch_name() -> String {
    "AssetPullTemp".to_string()
}

fn default_program() -> String {
    "git".to_string()
}

fn default_user_agent() -> String {
    concat!("assetpull/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_log_directory() -> Utf8PathBuf {
    Utf8PathBuf::from("logs")
}

fn default_log_prefix() -> String {
    "assetpull".to_string()
}

fn default_console() -> bool {
    true
}
