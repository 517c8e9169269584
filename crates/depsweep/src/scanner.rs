//! Scan orchestration: discover, extract, detect, reconcile.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::analyzer::{detect_file_usage, extract_file_imports};
use crate::collector::FileCollector;
use crate::config::Config;
use crate::manifest::collect_declared_dependencies;
use crate::package_mapper::{PackageMapper, normalize};
use crate::report::{ImportRecords, Report};
use crate::stdlib::is_stdlib_module;

/// Stage boundary notifications, delivered on the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProgress {
    Discovered { files: usize },
    ImportsExtracted { files: usize },
    UsageDetected { files: usize },
    ManifestsParsed { packages: usize },
}

/// Optional observer of scan progress
pub type ProgressCallback<'a> = Option<&'a dyn Fn(ScanProgress)>;

fn notify(progress: ProgressCallback<'_>, event: ScanProgress) {
    log::debug!("Scan progress: {event:?}");
    if let Some(callback) = progress {
        callback(event);
    }
}

/// Runs the analysis pipeline over a project tree
#[derive(Debug, Clone)]
pub struct Scanner {
    project_root: PathBuf,
    config: Config,
    mapper: PackageMapper,
}

impl Scanner {
    pub fn new(project_root: PathBuf, config: Config, mapper: PackageMapper) -> Self {
        Self {
            project_root,
            config,
            mapper,
        }
    }

    pub fn mapper(&self) -> &PackageMapper {
        &self.mapper
    }

    /// Scan the project and assemble a fresh report
    pub fn scan(&self, progress: ProgressCallback<'_>) -> Result<Report> {
        let python_version = self.config.python_version()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_count())
            .build()
            .context("Failed to build scan worker pool")?;

        log::info!("Scanning {}", self.project_root.display());
        // Backups hold pre-fix copies and must never be scanned or rewritten
        let collector = FileCollector::new(self.config.exclusions(), self.config.max_file_size)
            .exclude_dir(self.project_root.join(&self.config.backup_dir));
        let files = collector.collect(&self.project_root);
        notify(progress, ScanProgress::Discovered { files: files.len() });

        // Each stage completes for every file before the next begins
        let extracted: Vec<(PathBuf, BTreeSet<String>)> = pool.install(|| {
            files
                .par_iter()
                .map(|path| (path.clone(), extract_file_imports(path)))
                .collect()
        });
        let all_imports: ImportRecords = extracted.into_iter().collect();
        notify(
            progress,
            ScanProgress::ImportsExtracted {
                files: all_imports.len(),
            },
        );

        let detected: Vec<(PathBuf, BTreeSet<String>)> = pool.install(|| {
            all_imports
                .par_iter()
                .map(|(path, roots)| (path.clone(), detect_file_usage(path, roots)))
                .collect()
        });
        let used_imports: ImportRecords = detected.into_iter().collect();
        notify(
            progress,
            ScanProgress::UsageDetected {
                files: used_imports.len(),
            },
        );

        let declared = collect_declared_dependencies(&self.project_root);
        notify(
            progress,
            ScanProgress::ManifestsParsed {
                packages: declared.packages.len(),
            },
        );

        let first_party = first_party_modules(&self.project_root, &files);
        let used_deps = self.reconcile(
            &used_imports,
            &declared.packages,
            &first_party,
            python_version,
        );

        let failed_manifests = declared.failed().count();

        let report = Report {
            project_path: self.project_root.clone(),
            scanned_files: files.len(),
            all_imports,
            used_imports,
            declared_deps: declared.packages,
            used_deps,
            failed_manifests,
        };
        log::info!(
            "Scanned {} files: {} unused imports, {} unused packages, {} missing packages, {} unreadable manifests",
            report.scanned_files,
            report.total_unused_imports(),
            report.unused_packages().len(),
            report.missing_packages().len(),
            report.failed_manifests
        );
        Ok(report)
    }

    /// Map every used third-party import root to a declared package, or to its own
    /// normalized name when nothing declared provides it
    fn reconcile(
        &self,
        used_imports: &ImportRecords,
        declared: &BTreeSet<String>,
        first_party: &BTreeSet<String>,
        python_version: u8,
    ) -> BTreeSet<String> {
        let used_roots: BTreeSet<&str> = used_imports
            .values()
            .flatten()
            .map(String::as_str)
            .collect();

        used_roots
            .into_iter()
            .filter(|root| !is_stdlib_module(root, python_version))
            .filter(|root| !first_party.contains(*root))
            .map(|root| {
                self.mapper
                    .match_import_to_package(root, declared)
                    .unwrap_or_else(|| normalize(root))
            })
            .collect()
    }
}

/// Top-level module names provided by the project itself.
///
/// Each collected file contributes the first component of its path relative to the root, or
/// relative to `src/` for src-layout projects, without a `.py` suffix.
pub fn first_party_modules(project_root: &Path, files: &[PathBuf]) -> BTreeSet<String> {
    files
        .iter()
        .filter_map(|file| file.strip_prefix(project_root).ok())
        .filter_map(|relative| {
            let mut components = relative.components().map(|c| c.as_os_str().to_string_lossy());
            let first = components.next()?;
            let top = if first == "src" {
                components.next().unwrap_or(first)
            } else {
                first
            };
            let top = top.strip_suffix(".py").unwrap_or(&top).to_owned();
            Some(top)
        })
        .collect()
}
