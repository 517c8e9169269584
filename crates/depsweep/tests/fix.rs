#![allow(clippy::disallowed_methods)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use walkdir::WalkDir;

use depsweep::config::Config;
use depsweep::fixer::FixOptions;
use depsweep::orchestrator::DepSweep;

fn project(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    for (relative, content) in files {
        let path = temp_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    let root = temp_dir.path().canonicalize().unwrap();
    (temp_dir, root)
}

fn sweep(root: &Path) -> DepSweep {
    let config = Config {
        max_workers: Some(2),
        installed_metadata: false,
        ..Config::default()
    };
    DepSweep::new(root, config).unwrap()
}

fn read(root: &Path, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).unwrap()
}

/// Every regular file under `dir` with its contents
fn snapshot_tree(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files: Vec<(PathBuf, Vec<u8>)> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| (entry.path().to_path_buf(), fs::read(entry.path()).unwrap()))
        .collect();
    files.sort();
    files
}

const APP: &str = "\
import os
import sys, json
from collections import OrderedDict
from typing import List

def main() -> List[str]:
    return sys.argv
";

#[test]
fn test_fix_removes_unused_imports() {
    let (_guard, root) = project(&[("app.py", APP), ("clean.py", "import re\nre.compile('a')\n")]);
    let options = FixOptions {
        backup: false,
        ..FixOptions::default()
    };
    let stats = sweep(&root).fix(&options, None, None).unwrap();

    assert_eq!(stats.files_modified, 1);
    assert_eq!(stats.imports_removed, 3);
    assert_eq!(stats.files_with_errors, 0);
    insta::assert_snapshot!(read(&root, "app.py"), @r"
    import sys
    from typing import List

    def main() -> List[str]:
        return sys.argv
    ");
    assert_eq!(read(&root, "clean.py"), "import re\nre.compile('a')\n");
}

#[test]
fn test_fix_twice_is_idempotent() {
    let (_guard, root) = project(&[
        ("app.py", APP),
        ("pkg/__init__.py", "from . import helpers\nimport logging\n"),
        ("pkg/helpers.py", "import os\n\ndef f():\n    import re\n"),
    ]);
    let options = FixOptions {
        backup: false,
        ..FixOptions::default()
    };
    let mut sweep = sweep(&root);

    let first = sweep.fix(&options, None, None).unwrap();
    assert_eq!(first.files_modified, 3);
    assert_eq!(first.files_with_errors, 0);
    assert_eq!(read(&root, "pkg/__init__.py"), "from . import helpers\n");
    assert_eq!(read(&root, "pkg/helpers.py"), "def f():\n    pass\n");

    let second = sweep.fix(&options, None, None).unwrap();
    assert_eq!(second.files_modified, 0);
    assert_eq!(second.imports_removed, 0);
    assert!(!sweep.scan(true, None).unwrap().has_issues());
}

#[test]
fn test_dry_run_leaves_tree_untouched() {
    let (_guard, root) = project(&[
        ("app.py", APP),
        ("requirements.txt", "requests\nnumpy\n"),
        ("latin.py", ""),
    ]);
    fs::write(root.join("latin.py"), b"# caf\xe9\nimport os\n").unwrap();
    let before = snapshot_tree(&root);

    let mut sweep = sweep(&root);
    let stats = sweep
        .fix(
            &FixOptions {
                dry_run: true,
                ..FixOptions::default()
            },
            None,
            None,
        )
        .unwrap();
    let update = sweep.update_requirements(true).unwrap();

    assert_eq!(stats.files_modified, 2);
    assert_eq!(stats.imports_removed, 4);
    assert_eq!(stats.backups_created, 0);
    assert_eq!(update.packages_removed, 2);
    assert!(!update.file_updated);
    assert_eq!(snapshot_tree(&root), before);
}

#[test]
fn test_backups_preserve_relative_paths() {
    let (_guard, root) = project(&[("pkg/mod.py", "import os\nimport sys\nsys.exit()\n")]);
    let stats = sweep(&root)
        .fix(&FixOptions::default(), None, None)
        .unwrap();

    assert_eq!(stats.backups_created, 1);
    let backups: Vec<PathBuf> = WalkDir::new(root.join(".depsweep_backups"))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    assert_eq!(backups.len(), 1);
    assert!(backups[0].ends_with("pkg/mod.py"));
    assert_eq!(
        fs::read_to_string(&backups[0]).unwrap(),
        "import os\nimport sys\nsys.exit()\n"
    );
    assert_eq!(read(&root, "pkg/mod.py"), "import sys\nsys.exit()\n");

    // backups are never scanned
    let report = sweep(&root).scan(false, None).unwrap();
    assert_eq!(report.scanned_files, 1);
}

#[test]
fn test_pattern_limits_fixed_files() {
    let (_guard, root) = project(&[
        ("src/a.py", "import os\n"),
        ("tests/test_a.py", "import os\n"),
    ]);
    let options = FixOptions {
        backup: false,
        ..FixOptions::default()
    };
    let stats = sweep(&root).fix(&options, Some("tests/*.py"), None).unwrap();

    assert_eq!(stats.files_modified, 1);
    assert_eq!(read(&root, "tests/test_a.py"), "");
    assert_eq!(read(&root, "src/a.py"), "import os\n");
}

#[test]
fn test_invalid_pattern_is_an_error() {
    let (_guard, root) = project(&[("a.py", "import os\n")]);
    let result = sweep(&root).fix(&FixOptions::default(), Some("[a-"), None);
    assert!(result.is_err());
    assert_eq!(read(&root, "a.py"), "import os\n");
}

#[test]
fn test_fix_reports_progress_per_file() {
    let (_guard, root) = project(&[("a.py", "import os\n"), ("b.py", "import sys\n")]);
    let seen = RefCell::new(Vec::new());
    let progress: &dyn Fn(usize, usize, &Path) = &|done, total, path| {
        seen.borrow_mut()
            .push((done, total, path.file_name().unwrap().to_string_lossy().into_owned()));
    };
    let options = FixOptions {
        backup: false,
        ..FixOptions::default()
    };
    sweep(&root).fix(&options, None, Some(progress)).unwrap();

    assert_eq!(
        seen.into_inner(),
        vec![(1, 2, "a.py".to_owned()), (2, 2, "b.py".to_owned())]
    );
}

#[test]
fn test_latin1_file_keeps_its_encoding() {
    let (_guard, root) = project(&[]);
    fs::write(root.join("legacy.py"), b"import os\nname = '\xe9t\xe9'\n").unwrap();
    let options = FixOptions {
        backup: false,
        ..FixOptions::default()
    };
    let stats = sweep(&root).fix(&options, None, None).unwrap();

    assert_eq!(stats.files_modified, 1);
    assert_eq!(fs::read(root.join("legacy.py")).unwrap(), b"name = '\xe9t\xe9'\n");
}

#[test]
fn test_update_requirements_drops_unused_entries() {
    let requirements = "\
# runtime
requests==2.31.0 \\
    --hash=sha256:abc
numpy>=1.24  # arrays
PyYAML
";
    let (_guard, root) = project(&[
        ("requirements.txt", requirements),
        ("main.py", "import numpy\nnumpy.zeros(1)\n"),
    ]);
    let update = sweep(&root).update_requirements(false).unwrap();

    assert_eq!(update.packages_removed, 2);
    assert!(update.file_updated);
    assert_eq!(read(&root, "requirements.txt"), "# runtime\nnumpy>=1.24  # arrays\n");
    assert_eq!(read(&root, "requirements.txt.bak"), requirements);
}

#[test]
fn test_update_requirements_without_manifest() {
    let (_guard, root) = project(&[("main.py", "import os\n")]);
    let update = sweep(&root).update_requirements(false).unwrap();

    assert_eq!(update.packages_removed, 0);
    assert!(!update.file_updated);
    assert!(!root.join("requirements.txt.bak").exists());
}

#[test]
fn test_fallback_import_pair_is_kept() {
    let source = "\
try:
    import simplejson as json
except ImportError:
    import json

print(json.dumps({}))
";
    let (_guard, root) = project(&[("codec.py", source)]);
    let mut sweep = sweep(&root);

    assert!(sweep.scan(false, None).unwrap().unused_imports().is_empty());
    let stats = sweep.fix(&FixOptions::default(), None, None).unwrap();
    assert_eq!(stats.files_modified, 0);
    assert_eq!(read(&root, "codec.py"), source);
}

#[test]
fn test_custom_backup_dir_is_never_rescanned() {
    let (_guard, root) = project(&[("a.py", "import os\nimport sys\nsys.exit()\n")]);
    let config = Config {
        max_workers: Some(2),
        installed_metadata: false,
        backup_dir: "bk".to_owned(),
        exclude: ["node_modules".to_owned()].into_iter().collect(),
        ..Config::default()
    };
    let mut sweep = DepSweep::new(&root, config).unwrap();

    let first = sweep.fix(&FixOptions::default(), None, None).unwrap();
    assert_eq!(first.files_modified, 1);
    assert_eq!(first.backups_created, 1);
    assert!(root.join("bk").is_dir());

    let second = sweep.fix(&FixOptions::default(), None, None).unwrap();
    assert_eq!(second.files_modified, 0);
    assert_eq!(second.backups_created, 0);
    assert_eq!(sweep.scan(true, None).unwrap().scanned_files, 1);
}

/// A project whose backup directory path is occupied by a regular file
fn project_with_blocked_backups() -> (TempDir, PathBuf, DepSweep) {
    let (guard, root) = project(&[("a.py", "import os\nimport sys\nsys.exit()\n"), ("blocker", "")]);
    let config = Config {
        max_workers: Some(2),
        installed_metadata: false,
        backup_dir: "blocker".to_owned(),
        ..Config::default()
    };
    let sweep = DepSweep::new(&root, config).unwrap();
    (guard, root, sweep)
}

#[test]
fn test_required_backup_failure_skips_file() {
    let (_guard, root, mut sweep) = project_with_blocked_backups();
    let options = FixOptions {
        require_backup: true,
        ..FixOptions::default()
    };
    let stats = sweep.fix(&options, None, None).unwrap();

    assert_eq!(stats.files_modified, 0);
    assert_eq!(stats.backups_created, 0);
    assert_eq!(stats.files_with_errors, 1);
    assert_eq!(read(&root, "a.py"), "import os\nimport sys\nsys.exit()\n");
}

#[test]
fn test_optional_backup_failure_still_rewrites() {
    let (_guard, root, mut sweep) = project_with_blocked_backups();
    let stats = sweep.fix(&FixOptions::default(), None, None).unwrap();

    assert_eq!(stats.files_modified, 1);
    assert_eq!(stats.backups_created, 0);
    assert_eq!(stats.files_with_errors, 0);
    assert_eq!(read(&root, "a.py"), "import sys\nsys.exit()\n");
}

#[test]
fn test_rewrite_failure_is_counted_and_batch_continues() {
    let (_guard, root) = project(&[("a.py", "import os\n"), ("b.py", "import sys\n")]);
    let mut sweep = sweep(&root);
    let report = sweep.scan(false, None).unwrap();
    assert_eq!(report.unused_imports().len(), 2);

    // the cached report still flags a.py after it stops parsing
    fs::write(root.join("a.py"), "import os\ndef broken(:\n").unwrap();
    let options = FixOptions {
        backup: false,
        ..FixOptions::default()
    };
    let stats = sweep.fix(&options, None, None).unwrap();

    assert_eq!(stats.files_with_errors, 1);
    assert_eq!(stats.files_modified, 1);
    assert_eq!(read(&root, "a.py"), "import os\ndef broken(:\n");
    assert_eq!(read(&root, "b.py"), "");
}
