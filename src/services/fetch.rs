use crate::models::{Credentials, FetchTarget, SourceLocator};
use crate::services::credentials::{AddressError, authorization_header, raw_file_url};
use camino::{Utf8Path, Utf8PathBuf};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Errors from a single-file download
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Authentication required for private repositories")]
    AuthRequired,

    #[error("Download failed with status {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("Credentials cannot be sent as a header")]
    InvalidHeader,
}

/// Downloads individual files from the source's raw-content host.
///
/// The destination is only ever replaced by a rename, so a reader sees
/// either the previous file or the complete new one.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    client: reqwest::Client,
}

impl FileFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Download `target.remote_file_name` and place it at `target.destination_path`
    pub async fn fetch(
        &self,
        source: &SourceLocator,
        credentials: &Credentials,
        target: &FetchTarget,
    ) -> Result<Utf8PathBuf, FetchError> {
        let url = raw_file_url(source, &target.remote_file_name)?;
        tracing::info!("Downloading {} from {}", target.label, url);

        let mut request = self.client.get(url);
        if let Some(header) = authorization_header(credentials) {
            let mut value = HeaderValue::from_str(&header).map_err(|_| FetchError::InvalidHeader)?;
            value.set_sensitive(true);
            request = request.header(AUTHORIZATION, value);
        }

        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!("Download of {} failed: {}", target.label, status);
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let destination = &target.destination_path;
        if let Some(parent) = destination.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|source| FetchError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let temp = temp_path(destination);
        let written = match write_body(&mut response, &temp).await {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&temp).await;
                return Err(e);
            }
        };

        if let Err(e) = commit(&temp, destination).await {
            discard(&temp).await;
            return Err(e);
        }

        tracing::info!("Downloaded {} ({} bytes) to {}", target.label, written, destination);
        Ok(destination.clone())
    }
}

/// Sibling `{dest}.temp` path the body is streamed into
pub fn temp_path(destination: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}.temp", destination))
}

async fn write_body(response: &mut reqwest::Response, temp: &Utf8Path) -> Result<u64, FetchError> {
    let io_err = |source| FetchError::Io {
        path: temp.to_path_buf(),
        source,
    };

    let mut file = fs::File::create(temp).await.map_err(io_err)?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;

    Ok(written)
}

/// Move the finished temp file over the destination
async fn commit(temp: &Utf8Path, destination: &Utf8Path) -> Result<(), FetchError> {
    let first = match fs::rename(temp, destination).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    // Some platforms refuse to rename over an existing file
    if fs::try_exists(destination).await.unwrap_or(false) {
        tracing::debug!("Rename over {} refused ({}), replacing", destination, first);
        fs::remove_file(destination)
            .await
            .map_err(|source| FetchError::Io {
                path: destination.to_path_buf(),
                source,
            })?;
        return fs::rename(temp, destination)
            .await
            .map_err(|source| FetchError::Io {
                path: destination.to_path_buf(),
                source,
            });
    }

    Err(FetchError::Io {
        path: destination.to_path_buf(),
        source: first,
    })
}

async fn discard(temp: &Utf8Path) {
    if let Err(e) = fs::remove_file(temp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Could not remove temporary file {}: {}", temp, e);
        }
    }
}
