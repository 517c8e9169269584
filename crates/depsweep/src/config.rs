use anyhow::{Context, Result, anyhow};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::combine::Combine;
use crate::dirs::{CONFIG_FILE, system_config_file, user_depsweep_config_file};

/// Directory names and patterns that never contain first-party sources worth scanning
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".venv",
    "venv",
    "env",
    "__pycache__",
    ".git",
    ".hg",
    ".tox",
    ".nox",
    "build",
    "dist",
    ".eggs",
    "*.egg-info",
    "node_modules",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    "site-packages",
    DEFAULT_BACKUP_DIR,
];

/// Files larger than this are treated as generated or vendored code
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1_000_000;

pub const DEFAULT_BACKUP_DIR: &str = ".depsweep_backups";

/// Resolved configuration used by the scanner and fixer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Directory names or glob patterns excluded from file collection
    pub exclude: IndexSet<String>,

    /// Additional exclusions layered on top of `exclude`
    pub extend_exclude: IndexSet<String>,

    /// Size ceiling in bytes; larger files are silently skipped
    pub max_file_size: u64,

    /// Worker pool size; `None` picks a small multiple of the available processors
    pub max_workers: Option<usize>,

    /// Target Python version for standard library checks
    /// Supports Ruff-style string values: "py37" through "py313"
    pub target_version: String,

    /// Whether to consult installed distribution metadata when mapping packages to imports
    pub installed_metadata: bool,

    /// Backup root, relative to the project root
    pub backup_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exclude: DEFAULT_EXCLUDES.iter().map(|s| (*s).to_owned()).collect(),
            extend_exclude: IndexSet::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_workers: None,
            target_version: "py310".to_owned(),
            installed_metadata: true,
            backup_dir: DEFAULT_BACKUP_DIR.to_owned(),
        }
    }
}

/// One configuration layer as read from a TOML file or the environment.
/// Unset keys fall through to lower precedence layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigFile {
    pub exclude: Option<IndexSet<String>>,
    pub extend_exclude: Option<IndexSet<String>>,
    pub max_file_size: Option<u64>,
    pub max_workers: Option<usize>,
    pub target_version: Option<String>,
    pub installed_metadata: Option<bool>,
    pub backup_dir: Option<String>,
}

impl Combine for ConfigFile {
    fn combine(self, other: Self) -> Self {
        Self {
            // `exclude` replaces wholesale, `extend-exclude` accumulates across layers
            exclude: self.exclude.or(other.exclude),
            extend_exclude: self.extend_exclude.combine(other.extend_exclude),
            max_file_size: self.max_file_size.combine(other.max_file_size),
            max_workers: self.max_workers.combine(other.max_workers),
            target_version: self.target_version.combine(other.target_version),
            installed_metadata: self.installed_metadata.combine(other.installed_metadata),
            backup_dir: self.backup_dir.combine(other.backup_dir),
        }
    }
}

impl ConfigFile {
    /// Load configuration values from environment variables with DEPSWEEP_ prefix
    pub fn from_env() -> Self {
        let mut layer = Self::default();

        // DEPSWEEP_EXCLUDE / DEPSWEEP_EXTEND_EXCLUDE - comma-separated lists
        if let Ok(value) = env::var("DEPSWEEP_EXCLUDE") {
            layer.exclude = parse_list(&value);
        }
        if let Ok(value) = env::var("DEPSWEEP_EXTEND_EXCLUDE") {
            layer.extend_exclude = parse_list(&value);
        }

        if let Ok(value) = env::var("DEPSWEEP_MAX_FILE_SIZE") {
            match value.trim().parse() {
                Ok(size) => layer.max_file_size = Some(size),
                Err(err) => log::warn!("Ignoring DEPSWEEP_MAX_FILE_SIZE={value:?}: {err}"),
            }
        }

        if let Ok(value) = env::var("DEPSWEEP_MAX_WORKERS") {
            match value.trim().parse() {
                Ok(workers) => layer.max_workers = Some(workers),
                Err(err) => log::warn!("Ignoring DEPSWEEP_MAX_WORKERS={value:?}: {err}"),
            }
        }

        if let Ok(target_version) = env::var("DEPSWEEP_TARGET_VERSION") {
            layer.target_version = Some(target_version);
        }

        if let Ok(value) = env::var("DEPSWEEP_INSTALLED_METADATA") {
            layer.installed_metadata = parse_bool(&value);
        }

        layer
    }

    /// Apply this layer over the built-in defaults
    pub fn resolve(self) -> Config {
        let defaults = Config::default();
        Config {
            exclude: self.exclude.unwrap_or(defaults.exclude),
            extend_exclude: self.extend_exclude.unwrap_or_default(),
            max_file_size: self.max_file_size.unwrap_or(defaults.max_file_size),
            max_workers: self.max_workers.filter(|&workers| workers > 0),
            target_version: self.target_version.unwrap_or(defaults.target_version),
            installed_metadata: self
                .installed_metadata
                .unwrap_or(defaults.installed_metadata),
            backup_dir: self.backup_dir.unwrap_or(defaults.backup_dir),
        }
    }
}

fn parse_list(value: &str) -> Option<IndexSet<String>> {
    let items: IndexSet<String> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Parse a boolean value from string, supporting various common formats
fn parse_bool(value: &str) -> Option<bool> {
    use cow_utils::CowUtils;
    match value.trim().cow_to_lowercase().as_ref() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Parse a Ruff-style target version string to the Python 3 minor version
    pub fn parse_target_version(version_str: &str) -> Result<u8> {
        match version_str {
            "py37" => Ok(7),
            "py38" => Ok(8),
            "py39" => Ok(9),
            "py310" => Ok(10),
            "py311" => Ok(11),
            "py312" => Ok(12),
            "py313" => Ok(13),
            _ => Err(anyhow!(
                "Invalid target version '{}'. Supported versions: py37, py38, py39, py310, py311, py312, py313",
                version_str
            )),
        }
    }

    /// Get the Python minor version used for standard library lookups
    pub fn python_version(&self) -> Result<u8> {
        Self::parse_target_version(&self.target_version)
    }

    /// Set the target version from a string value
    pub fn set_target_version(&mut self, version: String) -> Result<()> {
        Self::parse_target_version(&version)?;
        self.target_version = version;
        Ok(())
    }

    /// All exclusion entries, `exclude` first
    pub fn exclusions(&self) -> impl Iterator<Item = &str> {
        self.exclude
            .iter()
            .chain(self.extend_exclude.iter())
            .map(String::as_str)
    }

    /// Number of worker threads for the scan pool
    pub fn worker_count(&self) -> usize {
        self.max_workers.unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZero::get);
            (cpus + 4).min(32)
        })
    }

    /// Load a single config layer from a path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<ConfigFile> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let layer: ConfigFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        if let Some(target_version) = &layer.target_version {
            Self::parse_target_version(target_version).with_context(|| {
                format!("Invalid target-version in config file: {:?}", path)
            })?;
        }

        Ok(layer)
    }

    fn try_load_and_combine<P: AsRef<Path>>(
        layer: &mut ConfigFile,
        path: P,
        context: &str,
    ) -> Result<()> {
        if path.as_ref().exists() {
            log::debug!("Loading {} from: {:?}", context, path.as_ref());
            let loaded = Self::load_from_file(&path)
                .with_context(|| format!("Failed to load {} from {:?}", context, path.as_ref()))?;
            *layer = loaded.combine(std::mem::take(layer));
        }
        Ok(())
    }

    /// Load configuration with hierarchical precedence:
    /// 1. CLI-provided config path (highest precedence)
    /// 2. Environment variables (DEPSWEEP_*)
    /// 3. Project config (depsweep.toml in the project root)
    /// 4. User config (~/.config/depsweep/depsweep.toml)
    /// 5. System config (/etc/depsweep/depsweep.toml or equivalent)
    /// 6. Default values (lowest precedence)
    pub fn load(project_root: &Path, cli_config_path: Option<&Path>) -> Result<Self> {
        let mut layer = ConfigFile::default();

        if let Some(system_config_path) = system_config_file() {
            Self::try_load_and_combine(&mut layer, &system_config_path, "system config")?;
        }

        if let Some(user_config_path) = user_depsweep_config_file() {
            Self::try_load_and_combine(&mut layer, &user_config_path, "user config")?;
        }

        let project_config_path = project_root.join(CONFIG_FILE);
        Self::try_load_and_combine(&mut layer, &project_config_path, "project config")?;

        layer = ConfigFile::from_env().combine(layer);

        if let Some(cli_config_path) = cli_config_path {
            if !cli_config_path.exists() {
                return Err(anyhow!("Config file not found: {:?}", cli_config_path));
            }
            Self::try_load_and_combine(&mut layer, cli_config_path, "CLI config")?;
        }

        let config = layer.resolve();
        config.python_version().with_context(|| {
            format!(
                "Invalid target-version in final config: {}",
                config.target_version
            )
        })?;

        Ok(config)
    }
}
