//! Configuration file locations outside the project tree.

use std::env;
use std::path::{Path, PathBuf};

use etcetera::BaseStrategy;

const CONFIG_DIR: &str = "depsweep";

/// File name shared by every configuration layer
pub const CONFIG_FILE: &str = "depsweep.toml";

fn config_file_in(base: &Path) -> PathBuf {
    base.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// `depsweep/depsweep.toml` under the platform config directory
/// (`$XDG_CONFIG_HOME` or `~/.config` on Unix, `%APPDATA%` on Windows).
pub fn user_depsweep_config_file() -> Option<PathBuf> {
    let strategy = etcetera::choose_base_strategy().ok()?;
    Some(config_file_in(&strategy.config_dir()))
}

/// First existing config under a colon separated `XDG_CONFIG_DIRS` value, `/etc/xdg` when unset
#[cfg(not(windows))]
fn first_xdg_config(config_dirs: Option<&str>) -> Option<PathBuf> {
    config_dirs
        .filter(|dirs| !dirs.is_empty())
        .unwrap_or("/etc/xdg")
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| config_file_in(Path::new(dir)))
        .find(|candidate| candidate.is_file())
}

#[cfg(windows)]
fn program_data_config(system_drive: &Path) -> Option<PathBuf> {
    let candidate = config_file_in(&system_drive.join("ProgramData"));
    candidate.is_file().then_some(candidate)
}

/// Machine-wide configuration file, if one exists.
///
/// Unix checks `XDG_CONFIG_DIRS` and then `/etc/depsweep/depsweep.toml`; Windows checks
/// `%SYSTEMDRIVE%\ProgramData\depsweep\depsweep.toml`.
pub fn system_config_file() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        let system_drive = env::var_os("SYSTEMDRIVE")?;
        program_data_config(Path::new(&system_drive))
    }

    #[cfg(not(windows))]
    {
        let xdg_config_dirs = env::var("XDG_CONFIG_DIRS").ok();
        first_xdg_config(xdg_config_dirs.as_deref()).or_else(|| {
            let etc = config_file_in(Path::new("/etc"));
            etc.is_file().then_some(etc)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    #[cfg(not(windows))]
    fn test_first_xdg_config() -> anyhow::Result<()> {
        let first = TempDir::new()?;
        let second = TempDir::new()?;
        let expected = config_file_in(second.path());
        fs::create_dir_all(second.path().join(CONFIG_DIR))?;
        fs::write(&expected, "max-workers = 2\n")?;

        assert_eq!(first_xdg_config(Some("")), first_xdg_config(None));
        assert_eq!(first_xdg_config(Some(":")), None);

        let dirs = format!("{}:{}", first.path().display(), second.path().display());
        assert_eq!(first_xdg_config(Some(&dirs)), Some(expected));
        Ok(())
    }

    #[test]
    #[cfg(windows)]
    fn test_program_data_config() -> anyhow::Result<()> {
        let drive = TempDir::new()?;
        assert_eq!(program_data_config(drive.path()), None);

        let expected = config_file_in(&drive.path().join("ProgramData"));
        fs::create_dir_all(drive.path().join("ProgramData").join(CONFIG_DIR))?;
        fs::write(&expected, "max-workers = 2\n")?;
        assert_eq!(program_data_config(drive.path()), Some(expected));
        Ok(())
    }

    #[test]
    fn test_user_config_file_name() {
        if let Some(path) = user_depsweep_config_file() {
            assert!(path.ends_with("depsweep/depsweep.toml"));
        }
    }
}
