use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::analyzer::{detect_file_usage, extract_file_imports};
use crate::config::Config;
use crate::fixer::{FixOptions, FixProgressCallback, FixStats, Fixer, RequirementsUpdate};
use crate::package_mapper::PackageMapper;
use crate::report::Report;
use crate::scanner::{ProgressCallback, Scanner};

/// Import analysis of a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAnalysis {
    pub all_imports: BTreeSet<String>,
    pub used_imports: BTreeSet<String>,
    pub unused_imports: BTreeSet<String>,
}

/// Entry point tying scanning, reporting and fixing together for one project
#[derive(Debug)]
pub struct DepSweep {
    project_root: PathBuf,
    scanner: Scanner,
    fixer: Fixer,
    cached_report: Option<Report>,
}

impl DepSweep {
    /// Create an instance for an existing project directory
    pub fn new(project_root: impl AsRef<Path>, config: Config) -> Result<Self> {
        let project_root = project_root.as_ref();
        if !project_root.exists() {
            bail!("Project path does not exist: {}", project_root.display());
        }
        if !project_root.is_dir() {
            bail!("Project path is not a directory: {}", project_root.display());
        }
        let project_root = project_root
            .canonicalize()
            .with_context(|| format!("Failed to resolve project path: {:?}", project_root))?;
        config.python_version()?;

        let mapper = if config.installed_metadata {
            PackageMapper::with_installed_metadata(&project_root)
        } else {
            PackageMapper::new()
        };
        let fixer = Fixer::new(project_root.clone(), &config.backup_dir);
        log::debug!(
            "Initialized for {} with {} worker threads",
            project_root.display(),
            config.worker_count()
        );

        Ok(Self {
            scanner: Scanner::new(project_root.clone(), config, mapper),
            fixer,
            project_root,
            cached_report: None,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Scan the project, reusing the previous report unless `force_rescan` is set
    pub fn scan(&mut self, force_rescan: bool, progress: ProgressCallback<'_>) -> Result<Report> {
        if !force_rescan {
            if let Some(report) = &self.cached_report {
                log::debug!("Returning cached scan results");
                return Ok(report.clone());
            }
        }

        let report = self.scanner.scan(progress)?;
        self.cached_report = Some(report.clone());
        Ok(report)
    }

    /// Remove unused imports, optionally limited to files matching `pattern`
    pub fn fix(
        &mut self,
        options: &FixOptions,
        pattern: Option<&str>,
        progress: FixProgressCallback<'_>,
    ) -> Result<FixStats> {
        log::info!(
            "Starting fix (backup={}, dry_run={})",
            options.backup,
            options.dry_run
        );
        let mut report = self.scan(false, None)?;
        if let Some(pattern) = pattern {
            report = report.filter(pattern)?;
        }

        let stats = self.fixer.fix(&report, options, progress);
        if !options.dry_run {
            self.clear_cache();
        }
        log::info!(
            "Fix complete: {} files modified, {} imports removed",
            stats.files_modified,
            stats.imports_removed
        );
        Ok(stats)
    }

    /// Drop unused packages from `requirements.txt`
    pub fn update_requirements(&mut self, dry_run: bool) -> Result<RequirementsUpdate> {
        let report = self.scan(false, None)?;
        let update = self.fixer.update_requirements(&report, dry_run)?;
        if update.file_updated {
            self.clear_cache();
        }
        Ok(update)
    }

    /// Analyze one file outside the batch pipeline
    pub fn analyze_file(&self, path: impl AsRef<Path>) -> Result<FileAnalysis> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("File does not exist: {}", path.display());
        }
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("py") {
            bail!("Not a Python file: {}", path.display());
        }

        let all_imports = extract_file_imports(path);
        let used_imports = detect_file_usage(path, &all_imports);
        let unused_imports = all_imports.difference(&used_imports).cloned().collect();
        Ok(FileAnalysis {
            all_imports,
            used_imports,
            unused_imports,
        })
    }

    /// Used import root -> project-relative files referencing it
    pub fn dependency_graph(&mut self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let report = self.scan(false, None)?;
        let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (path, used) in &report.used_imports {
            for root in used {
                graph
                    .entry(root.clone())
                    .or_default()
                    .insert(report.relative_path(path));
            }
        }
        Ok(graph)
    }

    /// Declared packages that provide the same import root, keyed by the shortest name
    pub fn find_duplicate_dependencies(&mut self) -> Result<BTreeMap<String, Vec<String>>> {
        let report = self.scan(false, None)?;
        let mapper = self.scanner.mapper();
        let declared: Vec<&String> = report.declared_deps.iter().collect();
        let mut grouped: BTreeSet<&str> = BTreeSet::new();
        let mut duplicates = BTreeMap::new();

        for (index, package) in declared.iter().enumerate() {
            if grouped.contains(package.as_str()) {
                continue;
            }
            let mut group = vec![(*package).clone()];
            for other in &declared[index + 1..] {
                if mapper.is_variant_of(package, other) {
                    grouped.insert(other.as_str());
                    group.push((*other).clone());
                }
            }
            if group.len() > 1 {
                let canonical = group
                    .iter()
                    .min_by_key(|name| (name.len(), name.as_str()))
                    .cloned()
                    .unwrap_or_else(|| (*package).clone());
                duplicates.insert(canonical, group);
            }
        }

        Ok(duplicates)
    }

    /// Drop the cached report so the next scan starts fresh
    pub fn clear_cache(&mut self) {
        self.cached_report = None;
        log::debug!("Cleared scan cache");
    }
}
