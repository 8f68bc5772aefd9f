use crate::models::config::SourceConfig;
use camino::Utf8PathBuf;
use std::fmt;

/// Resolved authentication for one operation.
///
/// Exactly one variant is active per operation. The `Debug` impl never prints
/// secret material, so a `Credentials` value can safely appear in log fields.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    None,
    Token(String),
    Basic { username: String, password: String },
}

impl Credentials {
    /// Short name of the authentication mode, for logs and status lines
    pub fn mode(&self) -> &'static str {
        match self {
            Credentials::None => "anonymous",
            Credentials::Token(_) => "token",
            Credentials::Basic { .. } => "basic",
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credentials::None)
    }

    /// Secret strings carried by this value, used to scrub diagnostics
    pub(crate) fn secrets(&self) -> Vec<&str> {
        match self {
            Credentials::None => Vec::new(),
            Credentials::Token(token) => vec![token.as_str()],
            Credentials::Basic { password, .. } => vec![password.as_str()],
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::None => write!(f, "Credentials::None"),
            Credentials::Token(_) => write!(f, "Credentials::Token(***)"),
            Credentials::Basic { username, .. } => {
                write!(f, "Credentials::Basic {{ username: {:?}, password: *** }}", username)
            }
        }
    }
}

/// Raw credential fields as supplied by the caller, before resolution.
///
/// Empty strings are treated the same as missing values.
#[derive(Clone, Default)]
pub struct CredentialInput {
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CredentialInput {
    pub fn new(
        token: Option<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            token,
            username,
            password,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn with_basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            token: None,
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub(crate) fn token(&self) -> Option<&str> {
        non_empty(self.token.as_deref())
    }

    pub(crate) fn username(&self) -> Option<&str> {
        non_empty(self.username.as_deref())
    }

    pub(crate) fn password(&self) -> Option<&str> {
        non_empty(self.password.as_deref())
    }

    /// True when any credential field carries a value
    pub fn is_supplied(&self) -> bool {
        self.token().is_some() || self.username().is_some() || self.password().is_some()
    }
}

impl fmt::Debug for CredentialInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialInput")
            .field("token", &self.token().map(|_| "***"))
            .field("username", &self.username())
            .field("password", &self.password().map(|_| "***"))
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Identity of the remote repository that holds the asset bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub raw_host: String,
    pub is_private: bool,
}

impl SourceLocator {
    /// Locator for a repository on `github.com`
    pub fn github(owner: impl Into<String>, repo: impl Into<String>, is_private: bool) -> Self {
        Self::new("github.com", owner, repo, "main", is_private)
    }

    pub fn new(
        host: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        is_private: bool,
    ) -> Self {
        let host = host.into();
        let raw_host = default_raw_host(&host);
        Self {
            host,
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
            raw_host,
            is_private,
        }
    }

    /// Build a locator from the `source` section of the configuration
    pub fn from_config(config: &SourceConfig) -> Self {
        let mut locator = Self::new(
            config.host.as_str(),
            config.owner.as_str(),
            config.repo.as_str(),
            config.branch.as_str(),
            config.private,
        );
        if let Some(raw_host) = config.raw_host.as_deref().filter(|h| !h.is_empty()) {
            locator.raw_host = raw_host.to_string();
        }
        locator
    }

    pub fn with_raw_host(mut self, raw_host: impl Into<String>) -> Self {
        self.raw_host = raw_host.into();
        self
    }

    /// `owner/repo`, as shown in logs
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}@{}", self.host, self.owner, self.repo, self.branch)
    }
}

/// GitHub serves raw content from a dedicated host; other forges use `raw.{host}`
fn default_raw_host(host: &str) -> String {
    if host.eq_ignore_ascii_case("github.com") {
        "raw.githubusercontent.com".to_string()
    } else {
        format!("raw.{}", host)
    }
}

/// A single named asset to download outside the bulk clone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    /// Path of the file inside the repository, relative to the branch root
    pub remote_file_name: String,
    pub destination_path: Utf8PathBuf,
    /// Human readable label for status lines
    pub label: String,
}

impl FetchTarget {
    pub fn new(
        remote_file_name: impl Into<String>,
        destination_path: impl Into<Utf8PathBuf>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            remote_file_name: remote_file_name.into(),
            destination_path: destination_path.into(),
            label: label.into(),
        }
    }
}
