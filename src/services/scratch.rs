//! Scratch directories for bulk checkouts.
//!
//! A scratch directory lives for exactly one pipeline run. Teardown has to cope
//! with trees the version-control tool leaves behind: pack files are written
//! read-only, and on Windows a plain recursive delete refuses them.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use walkdir::WalkDir;

/// Neither the canonical nor the fallback scratch path could be created
#[derive(Error, Debug)]
#[error("Failed to prepare scratch directory {path}: {source}")]
pub struct ScratchError {
    pub path: Utf8PathBuf,
    #[source]
    pub source: io::Error,
}

/// A scratch directory survived teardown
#[derive(Error, Debug)]
#[error("Failed to remove scratch directory {path}: {source}. Manual cleanup may be required")]
pub struct CleanupError {
    pub path: Utf8PathBuf,
    #[source]
    pub source: io::Error,
}

/// Create a fresh scratch directory `base_dir/name`.
///
/// A leftover directory from an earlier run is destroyed first. When that or
/// the creation fails, a uniquely suffixed sibling is used instead; only a
/// failure of that fallback is reported.
pub fn prepare(base_dir: &Utf8Path, name: &str) -> Result<Utf8PathBuf, ScratchError> {
    let canonical = base_dir.join(name);

    let cleared = if canonical.exists() {
        tracing::info!("Removing leftover scratch directory {}", canonical);
        match destroy(&canonical) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    } else {
        true
    };

    if cleared {
        match fs::create_dir_all(&canonical) {
            Ok(()) => {
                tracing::debug!("Created scratch directory {}", canonical);
                return Ok(canonical);
            }
            Err(e) => tracing::warn!("Could not create {}: {}", canonical, e),
        }
    }

    let fallback = base_dir.join(unique_name(name));
    tracing::info!("Using alternate scratch directory {}", fallback);
    fs::create_dir_all(&fallback).map_err(|source| ScratchError {
        path: fallback.clone(),
        source,
    })?;

    Ok(fallback)
}

/// Force-remove a scratch directory and everything in it.
///
/// Removing a path that does not exist succeeds.
pub fn destroy(path: &Utf8Path) -> Result<(), CleanupError> {
    if !path.exists() {
        return Ok(());
    }

    clear_readonly(path);

    #[cfg(windows)]
    remove_with_shell(path);

    if !path.exists() {
        return Ok(());
    }

    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CleanupError {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// `{name}_{pid}_{nanos}`, unique enough for concurrent processes on one host
fn unique_name(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{}_{}_{}", name, std::process::id(), nanos)
}

/// Make every entry under `root` writable so it can be unlinked
fn clear_readonly(root: &Utf8Path) {
    // Symlinks are not followed; their targets live outside the scratch tree
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if entry.path_is_symlink() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };

        let mut permissions = metadata.permissions();
        if !make_writable(&mut permissions, metadata.is_dir()) {
            continue;
        }
        if let Err(e) = fs::set_permissions(entry.path(), permissions) {
            tracing::debug!("Could not reset permissions on {}: {}", entry.path().display(), e);
        }
    }
}

/// Returns true when the permissions were changed
#[cfg(unix)]
fn make_writable(permissions: &mut fs::Permissions, is_dir: bool) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let mode = permissions.mode();
    let wanted = if is_dir { mode | 0o700 } else { mode | 0o200 };
    if wanted == mode {
        return false;
    }
    permissions.set_mode(wanted);
    true
}

#[cfg(not(unix))]
fn make_writable(permissions: &mut fs::Permissions, _is_dir: bool) -> bool {
    if !permissions.readonly() {
        return false;
    }
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    true
}

#[cfg(windows)]
fn remove_with_shell(path: &Utf8Path) {
    let status = std::process::Command::new("cmd")
        .args(["/c", "rd", "/s", "/q"])
        .arg(path.as_std_path())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();

    if let Err(e) = status {
        tracing::debug!("rd /s /q failed for {}: {}", path, e);
    }
}
