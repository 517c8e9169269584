//! Installed distribution metadata read from a virtual environment's site-packages.
//!
//! Used to learn the import name of a declared package when it differs from the
//! distribution name and is not covered by the static mapping table.

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::package_mapper::normalize;
use crate::util::root_module;

/// Common names for project-local virtual environments
const COMMON_VENV_NAMES: &[&str] = &[".venv", "venv", "env", ".virtualenv", "virtualenv"];

/// Normalized distribution name -> top-level import name
#[derive(Debug, Default, Clone)]
pub struct InstalledDistributions {
    top_levels: FxHashMap<String, String>,
}

impl InstalledDistributions {
    /// Discover distributions from `VIRTUAL_ENV`, falling back to virtualenvs inside the project
    pub fn discover(project_root: &Path) -> Self {
        let virtualenvs = match std::env::var("VIRTUAL_ENV") {
            Ok(path) if !path.is_empty() => vec![PathBuf::from(path)],
            _ => COMMON_VENV_NAMES
                .iter()
                .map(|name| project_root.join(name))
                .filter(|path| path.is_dir())
                .collect(),
        };

        let mut installed = Self::default();
        for venv in virtualenvs {
            for site_packages in site_packages_directories(&venv) {
                installed.scan_site_packages(&site_packages);
            }
        }
        log::debug!(
            "Loaded top-level metadata for {} installed distributions",
            installed.len()
        );
        installed
    }

    /// Read every `*.dist-info` / `*.egg-info` directory in a site-packages directory
    pub fn scan_site_packages(&mut self, site_packages: &Path) {
        let Ok(entries) = fs::read_dir(site_packages) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = name
                .strip_suffix(".dist-info")
                .or_else(|| name.strip_suffix(".egg-info"))
            else {
                continue;
            };
            if !path.is_dir() {
                continue;
            }

            // `name-version.dist-info`; distribution names never contain '-' here
            let dist_name = normalize(stem.split('-').next().unwrap_or(stem));
            if let Some(top_level) = read_top_level(&path, &dist_name) {
                self.top_levels.entry(dist_name).or_insert(top_level);
            }
        }
    }

    /// Top-level import name of an installed distribution
    pub fn top_level(&self, package: &str) -> Option<&str> {
        self.top_levels.get(&normalize(package)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.top_levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.top_levels.is_empty()
    }
}

fn site_packages_directories(venv_root: &Path) -> Vec<PathBuf> {
    if !venv_root.is_dir() {
        return Vec::new();
    }

    if cfg!(windows) {
        let site_packages = venv_root.join("Lib").join("site-packages");
        return if site_packages.is_dir() {
            vec![site_packages]
        } else {
            Vec::new()
        };
    }

    let Ok(entries) = fs::read_dir(venv_root.join("lib")) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("python"))
        })
        .map(|path| path.join("site-packages"))
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Top-level module from `top_level.txt`, or from the `RECORD` file listing when absent
fn read_top_level(metadata_dir: &Path, dist_name: &str) -> Option<String> {
    if let Ok(content) = fs::read_to_string(metadata_dir.join("top_level.txt")) {
        let modules: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if let Some(first) = pick_top_level(&modules, dist_name) {
            return Some(first);
        }
    }

    let record = fs::read_to_string(metadata_dir.join("RECORD")).ok()?;
    let mut modules: Vec<&str> = record
        .lines()
        .filter_map(|line| line.split(',').next())
        .filter_map(|path| path.split('/').next())
        .filter(|segment| {
            !segment.is_empty()
                && !segment.starts_with("..")
                && !segment.starts_with("__")
                && !segment.ends_with(".dist-info")
                && !segment.ends_with(".data")
                && !segment.ends_with(".pth")
        })
        .filter_map(|segment| {
            if segment.contains('.') {
                segment.strip_suffix(".py")
            } else {
                Some(segment)
            }
        })
        .collect();
    modules.sort_unstable();
    modules.dedup();
    pick_top_level(&modules, dist_name)
}

/// Prefer the module named like the distribution, else the first listed
fn pick_top_level(modules: &[&str], dist_name: &str) -> Option<String> {
    modules
        .iter()
        .find(|module| normalize(module) == dist_name)
        .or_else(|| modules.first())
        .map(|module| root_module(&module.replace('/', ".")).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent directories");
        }
        fs::write(path, content).expect("write metadata file");
    }

    #[test]
    fn test_top_level_txt_is_read() {
        let dir = TempDir::new().expect("create temp dir");
        write(
            &dir.path().join("Pillow-10.0.0.dist-info/top_level.txt"),
            "PIL\n",
        );

        let mut installed = InstalledDistributions::default();
        installed.scan_site_packages(dir.path());

        assert_eq!(installed.top_level("pillow"), Some("PIL"));
        assert_eq!(installed.top_level("Pillow"), Some("PIL"));
        assert_eq!(installed.top_level("numpy"), None);
    }

    #[test]
    fn test_record_fallback_skips_metadata_entries() {
        let dir = TempDir::new().expect("create temp dir");
        write(
            &dir.path().join("python_jose-3.3.0.dist-info/RECORD"),
            "jose/__init__.py,sha256=abc,10\n\
             jose/jwt.py,sha256=def,20\n\
             python_jose-3.3.0.dist-info/METADATA,,\n\
             ../../bin/jose,,\n",
        );

        let mut installed = InstalledDistributions::default();
        installed.scan_site_packages(dir.path());

        assert_eq!(installed.top_level("python-jose"), Some("jose"));
    }

    #[test]
    fn test_unix_site_packages_discovery() {
        let dir = TempDir::new().expect("create temp dir");
        let site = dir.path().join("lib/python3.12/site-packages");
        fs::create_dir_all(&site).expect("create site-packages");

        assert_eq!(site_packages_directories(dir.path()), if cfg!(windows) {
            Vec::<PathBuf>::new()
        } else {
            vec![site]
        });
    }
}
