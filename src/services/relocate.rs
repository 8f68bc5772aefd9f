use crate::models::RelocationEntry;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs;
use walkdir::WalkDir;

/// Outcome of relocating a single category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryReport {
    pub destination: Utf8PathBuf,

    /// Whether the category existed in the scratch checkout
    pub found: bool,

    pub files_copied: usize,
    pub directories_created: usize,
    pub warnings: Vec<String>,
}

/// Per-category results of one relocation pass, in map order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelocationReport {
    pub categories: IndexMap<String, CategoryReport>,
}

impl RelocationReport {
    /// Number of categories missing from the source tree
    pub fn skipped_count(&self) -> usize {
        self.categories.values().filter(|c| !c.found).count()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .filter(|(_, c)| !c.found)
            .map(|(name, _)| name.as_str())
    }

    pub fn total_files_copied(&self) -> usize {
        self.categories.values().map(|c| c.files_copied).sum()
    }

    /// All warnings, each prefixed with its category
    pub fn warnings(&self) -> Vec<String> {
        self.categories
            .iter()
            .flat_map(|(name, c)| c.warnings.iter().map(move |w| format!("{}: {}", name, w)))
            .collect()
    }

    pub fn category(&self, name: &str) -> Option<&CategoryReport> {
        self.categories.get(name)
    }
}

/// Merges category subtrees of a checkout into the destination layout.
///
/// Existing destination files are overwritten; files that only exist in the
/// destination are left alone. Problems with individual entries are recorded
/// as warnings on the category and never abort the pass.
#[derive(Debug, Clone)]
pub struct Relocator {
    destination_root: Utf8PathBuf,
    map: Vec<RelocationEntry>,
}

impl Relocator {
    pub fn new(destination_root: impl Into<Utf8PathBuf>, map: Vec<RelocationEntry>) -> Self {
        Self {
            destination_root: destination_root.into(),
            map,
        }
    }

    pub fn destination_root(&self) -> &Utf8Path {
        &self.destination_root
    }

    pub fn map(&self) -> &[RelocationEntry] {
        &self.map
    }

    /// Relocate every mapped category found under `scratch_root`
    pub fn relocate(&self, scratch_root: &Utf8Path) -> RelocationReport {
        let mut report = RelocationReport::default();

        // Every destination exists afterwards, even for skipped categories
        for entry in &self.map {
            let destination = self.destination_root.join(&entry.destination);
            let mut category = CategoryReport {
                destination: destination.clone(),
                ..CategoryReport::default()
            };

            if !destination.is_dir() {
                match fs::create_dir_all(&destination) {
                    Ok(()) => category.directories_created += 1,
                    Err(e) => category
                        .warnings
                        .push(format!("could not create {}: {}", destination, e)),
                }
            }

            report.categories.insert(entry.category.clone(), category);
        }

        for entry in &self.map {
            let source = scratch_root.join(&entry.category);
            let Some(category) = report.categories.get_mut(&entry.category) else {
                continue;
            };

            if !source.is_dir() {
                tracing::warn!("Category {} not found in checkout, skipping", entry.category);
                continue;
            }

            category.found = true;
            let destination = category.destination.clone();
            copy_tree(&source, &destination, category);

            tracing::info!(
                "Relocated {} -> {} ({} files)",
                entry.category,
                destination,
                category.files_copied
            );
        }

        report
    }
}

/// Recursively copy `source` into `destination`, overwriting files
fn copy_tree(source: &Utf8Path, destination: &Utf8Path, report: &mut CategoryReport) {
    for entry in WalkDir::new(source).follow_links(true).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {}: {}", source, e);
                report.warnings.push(e.to_string());
                continue;
            }
        };

        let Some(path) = Utf8Path::from_path(entry.path()) else {
            report
                .warnings
                .push(format!("non UTF-8 path skipped: {}", entry.path().display()));
            continue;
        };

        let Ok(relative) = path.strip_prefix(source) else {
            continue;
        };
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            if !target.is_dir() {
                match fs::create_dir_all(&target) {
                    Ok(()) => report.directories_created += 1,
                    Err(e) => report
                        .warnings
                        .push(format!("could not create {}: {}", target, e)),
                }
            }
            continue;
        }

        if let Some(parent) = target.parent().filter(|p| !p.is_dir()) {
            if let Err(e) = fs::create_dir_all(parent) {
                report
                    .warnings
                    .push(format!("could not create {}: {}", parent, e));
                continue;
            }
        }

        match fs::copy(path, &target) {
            Ok(_) => {
                tracing::debug!("Copied {} -> {}", path, target);
                report.files_copied += 1;
            }
            Err(e) => {
                tracing::warn!("Failed to copy {}: {}", path, e);
                report
                    .warnings
                    .push(format!("could not copy {}: {}", relative, e));
            }
        }
    }
}
