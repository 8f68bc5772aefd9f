//! Credential resolution and authenticated addressing.
//!
//! Pure decision logic: nothing here touches the network or the disk, so the
//! whole module is testable offline.

use crate::models::{CredentialInput, Credentials, SourceLocator};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use thiserror::Error;
use url::Url;

/// A private source was requested without usable credentials
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Authentication required for private repository {source_slug}")]
pub struct AuthRequired {
    pub source_slug: String,
}

/// Errors building an address for the remote source
#[derive(Error, Debug)]
pub enum AddressError {
    #[error("Invalid source address {0}: {1}")]
    InvalidUrl(String, url::ParseError),

    #[error("Cannot embed credentials into {0}")]
    CredentialsRejected(String),
}

/// Decide the authentication mode for one operation.
///
/// Precedence: a non-empty token always wins, then a complete username/password
/// pair. Without either, private sources fail with [`AuthRequired`] and public
/// sources fall back to anonymous access.
pub fn resolve(input: &CredentialInput, source: &SourceLocator) -> Result<Credentials, AuthRequired> {
    resolve_for(input, source.is_private).map_err(|_| AuthRequired {
        source_slug: source.slug(),
    })
}

/// [`resolve`] without a locator, for callers that only know the privacy flag
pub fn resolve_for(input: &CredentialInput, is_private: bool) -> Result<Credentials, AuthRequired> {
    if let Some(token) = input.token() {
        return Ok(Credentials::Token(token.to_string()));
    }

    if let (Some(username), Some(password)) = (input.username(), input.password()) {
        return Ok(Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    if is_private {
        return Err(AuthRequired {
            source_slug: String::new(),
        });
    }

    Ok(Credentials::None)
}

/// A source URL that may carry embedded credentials.
///
/// Created immediately before use and dropped right after. `Display` and
/// `Debug` show the URL with userinfo masked; [`expose`](Self::expose) hands
/// out the real value for the subprocess argument only.
#[derive(Clone)]
pub struct AuthenticatedUrl {
    url: Url,
    secrets: Vec<String>,
}

impl AuthenticatedUrl {
    /// The full URL including credentials
    pub fn expose(&self) -> &str {
        self.url.as_str()
    }

    pub fn has_credentials(&self) -> bool {
        !self.url.username().is_empty() || self.url.password().is_some()
    }

    /// The same address with userinfo stripped, safe to store on disk
    pub fn without_credentials(&self) -> String {
        let mut bare = self.url.clone();
        let _ = bare.set_password(None);
        let _ = bare.set_username("");
        bare.into()
    }

    /// Mask every embedded secret in `text`, both raw and percent-encoded
    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for secret in &self.secrets {
            if secret.is_empty() {
                continue;
            }
            redacted = redacted.replace(secret.as_str(), "***");
        }
        redacted
    }

    fn masked(&self) -> String {
        let mut masked = self.url.clone();
        if !masked.username().is_empty() {
            let _ = masked.set_username("***");
        }
        if masked.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    }
}

impl fmt::Display for AuthenticatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl fmt::Debug for AuthenticatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthenticatedUrl({})", self.masked())
    }
}

/// Build the clone address `https://{host}/{owner}/{repo}.git` with credentials
/// embedded as userinfo.
///
/// Userinfo is percent-encoded by [`Url`], so passwords containing `@` or `:`
/// stay intact.
pub fn clone_url(
    source: &SourceLocator,
    credentials: &Credentials,
) -> Result<AuthenticatedUrl, AddressError> {
    let bare = format!("https://{}/{}/{}.git", source.host, source.owner, source.repo);
    let mut url = Url::parse(&bare).map_err(|e| AddressError::InvalidUrl(bare.clone(), e))?;

    match credentials {
        Credentials::None => {}
        Credentials::Token(token) => {
            url.set_username(token)
                .map_err(|_| AddressError::CredentialsRejected(bare.clone()))?;
        }
        Credentials::Basic { username, password } => {
            url.set_username(username)
                .map_err(|_| AddressError::CredentialsRejected(bare.clone()))?;
            url.set_password(Some(password))
                .map_err(|_| AddressError::CredentialsRejected(bare.clone()))?;
        }
    }

    let mut secrets: Vec<String> = credentials.secrets().iter().map(|s| s.to_string()).collect();
    // The tool may echo the encoded form back, so mask that too
    if let Some(encoded) = url.password() {
        secrets.push(encoded.to_string());
    } else if matches!(credentials, Credentials::Token(_)) {
        secrets.push(url.username().to_string());
    }
    secrets.sort();
    secrets.dedup();

    Ok(AuthenticatedUrl { url, secrets })
}

/// Build the raw-content address for a single file on the source branch.
///
/// Each `/`-separated segment of `remote_file_name` is percent-encoded, so
/// `New Asset.asset` becomes `New%20Asset.asset`. A `raw_host` that already
/// carries a scheme (a plain-http mirror) is used as given.
pub fn raw_file_url(source: &SourceLocator, remote_file_name: &str) -> Result<Url, AddressError> {
    let base = if source.raw_host.contains("://") {
        format!("{}/", source.raw_host.trim_end_matches('/'))
    } else {
        format!("https://{}/", source.raw_host)
    };
    let mut url = Url::parse(&base).map_err(|e| AddressError::InvalidUrl(base.clone(), e))?;

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| AddressError::CredentialsRejected(base.clone()))?;
        segments.pop_if_empty();
        segments.push(&source.owner);
        segments.push(&source.repo);
        segments.push(&source.branch);
        for segment in remote_file_name.split('/').filter(|s| !s.is_empty()) {
            segments.push(segment);
        }
    }

    Ok(url)
}

/// Authorization header value for the resolved credentials.
///
/// `Token` uses the `token` scheme, `Basic` the base64-encoded
/// `username:password` pair, and anonymous access sends no header.
pub fn authorization_header(credentials: &Credentials) -> Option<String> {
    match credentials {
        Credentials::None => None,
        Credentials::Token(token) => Some(format!("token {}", token)),
        Credentials::Basic { username, password } => {
            let encoded = STANDARD.encode(format!("{}:{}", username, password));
            Some(format!("Basic {}", encoded))
        }
    }
}
