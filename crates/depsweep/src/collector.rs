//! Discovery of candidate Python files under a project root.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

/// Walks a project tree and returns the Python files worth analyzing
#[derive(Debug, Clone)]
pub struct FileCollector {
    excludes: GlobSet,
    /// Directories skipped regardless of the exclusion patterns
    excluded_dirs: Vec<PathBuf>,
    max_file_size: u64,
}

/// Build a case-insensitive glob set from exclusion entries; invalid patterns are skipped
pub fn build_exclude_set<'a>(patterns: impl IntoIterator<Item = &'a str>) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }
        match GlobBuilder::new(pattern).case_insensitive(true).build() {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => log::warn!("Ignoring invalid exclude pattern '{pattern}': {err}"),
        }
    }
    builder.build().unwrap_or_else(|err| {
        log::warn!("Failed to build exclude patterns: {err}");
        GlobSet::empty()
    })
}

impl FileCollector {
    pub fn new<'a>(excludes: impl IntoIterator<Item = &'a str>, max_file_size: u64) -> Self {
        Self {
            excludes: build_exclude_set(excludes),
            excluded_dirs: Vec::new(),
            max_file_size,
        }
    }

    /// Always skip `dir`, even when no exclusion pattern names it
    #[must_use]
    pub fn exclude_dir(mut self, dir: PathBuf) -> Self {
        self.excluded_dirs.push(dir);
        self
    }

    /// Whether any segment of `relative` matches an exclusion entry
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if self.excludes.is_match(relative) {
            return true;
        }
        relative
            .components()
            .any(|component| self.excludes.is_match(component.as_os_str()))
    }

    fn keep_entry(&self, root: &Path, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        if self.excluded_dirs.iter().any(|dir| entry.path() == dir) {
            return false;
        }
        match entry.path().strip_prefix(root) {
            Ok(relative) => !self.is_excluded(relative),
            Err(_) => true,
        }
    }

    fn within_size_limit(&self, entry: &DirEntry) -> bool {
        match entry.metadata() {
            Ok(metadata) if metadata.len() > self.max_file_size => {
                log::debug!(
                    "Skipping {} ({} bytes exceeds {} byte limit)",
                    entry.path().display(),
                    metadata.len(),
                    self.max_file_size
                );
                false
            }
            Ok(_) => true,
            Err(err) => {
                log::warn!("Failed to read metadata for {}: {err}", entry.path().display());
                false
            }
        }
    }

    /// Collect `.py` files under `root`, sorted by path
    pub fn collect(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| self.keep_entry(root, entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    // Permission errors and vanished entries skip that subtree only
                    log::warn!("Skipping unreadable path during discovery: {err}");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|ext| ext.to_str()) != Some("py") {
                continue;
            }
            if self.within_size_limit(&entry) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        log::debug!("Collected {} Python files under {}", files.len(), root.display());
        files
    }
}
