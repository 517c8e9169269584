//! Removal of unused import statements and unused manifest entries.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use ruff_python_ast::{ExceptHandler, Stmt, StmtImport, StmtImportFrom};
use ruff_text_size::{Ranged, TextRange};
use serde::Serialize;

use crate::manifest::extract_package_name;
use crate::package_mapper::normalize;
use crate::report::Report;
use crate::util::{read_source, root_module, write_source};

/// Plain-list manifest rewritten by [`Fixer::update_requirements`]
const REQUIREMENTS_FILE: &str = "requirements.txt";

/// How a fix run treats the files it touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixOptions {
    /// Copy each file into the run's backup directory before rewriting it
    pub backup: bool,
    /// Compute statistics without writing anything
    pub dry_run: bool,
    /// Skip a file whose backup could not be created instead of rewriting it anyway
    pub require_backup: bool,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            backup: true,
            dry_run: false,
            require_backup: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FixStats {
    pub files_modified: usize,
    pub imports_removed: usize,
    pub backups_created: usize,
    pub files_with_errors: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequirementsUpdate {
    pub packages_removed: usize,
    pub file_updated: bool,
}

/// Per-file progress: `(current, total, path)`
pub type FixProgressCallback<'a> = Option<&'a dyn Fn(usize, usize, &Path)>;

#[derive(Debug)]
enum Action {
    Delete,
    Replace(String),
}

#[derive(Debug)]
struct Edit {
    range: TextRange,
    action: Action,
}

/// Decides, statement by statement, which imports go and which nested blocks need a `pass`
#[derive(Debug)]
struct RemovalPlanner<'u> {
    unused: &'u BTreeSet<String>,
    edits: Vec<Edit>,
}

impl<'u> RemovalPlanner<'u> {
    fn new(unused: &'u BTreeSet<String>) -> Self {
        Self {
            unused,
            edits: Vec::new(),
        }
    }

    fn plan_import(&self, stmt: &StmtImport) -> Option<Action> {
        let kept: Vec<String> = stmt
            .names
            .iter()
            .filter(|alias| !self.unused.contains(root_module(alias.name.as_str())))
            .map(|alias| match &alias.asname {
                Some(asname) => format!("{} as {}", alias.name.as_str(), asname.as_str()),
                None => alias.name.to_string(),
            })
            .collect();

        if kept.is_empty() {
            Some(Action::Delete)
        } else if kept.len() < stmt.names.len() {
            Some(Action::Replace(format!("import {}", kept.join(", "))))
        } else {
            None
        }
    }

    fn plan_import_from(&self, stmt: &StmtImportFrom) -> Option<Action> {
        // Relative imports never name a dependency; `__future__` must stay
        if stmt.level > 0 {
            return None;
        }
        let module = stmt.module.as_ref()?.as_str();
        if module == "__future__" {
            return None;
        }
        // Usage is tracked per root, so a from-import is removed whole or not at all
        self.unused
            .contains(root_module(module))
            .then_some(Action::Delete)
    }

    fn plan_suite(&mut self, suite: &[Stmt], nested: bool) {
        let mut deleted = 0;
        let mut first_deleted = None;

        for stmt in suite {
            let action = match stmt {
                Stmt::Import(import) => self.plan_import(import),
                Stmt::ImportFrom(import_from) => self.plan_import_from(import_from),
                _ => {
                    self.plan_nested(stmt);
                    None
                }
            };

            if let Some(action) = action {
                if matches!(action, Action::Delete) {
                    deleted += 1;
                    first_deleted.get_or_insert(self.edits.len());
                }
                self.edits.push(Edit {
                    range: stmt.range(),
                    action,
                });
            }
        }

        // An emptied block would no longer compile
        if nested && !suite.is_empty() && deleted == suite.len() {
            if let Some(index) = first_deleted {
                self.edits[index].action = Action::Replace("pass".to_owned());
            }
        }
    }

    fn plan_nested(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef(function) => self.plan_suite(&function.body, true),
            Stmt::ClassDef(class) => self.plan_suite(&class.body, true),
            Stmt::If(if_stmt) => {
                self.plan_suite(&if_stmt.body, true);
                for clause in &if_stmt.elif_else_clauses {
                    self.plan_suite(&clause.body, true);
                }
            }
            Stmt::For(for_stmt) => {
                self.plan_suite(&for_stmt.body, true);
                self.plan_suite(&for_stmt.orelse, true);
            }
            Stmt::While(while_stmt) => {
                self.plan_suite(&while_stmt.body, true);
                self.plan_suite(&while_stmt.orelse, true);
            }
            Stmt::With(with_stmt) => self.plan_suite(&with_stmt.body, true),
            Stmt::Try(try_stmt) => {
                self.plan_suite(&try_stmt.body, true);
                for handler in &try_stmt.handlers {
                    let ExceptHandler::ExceptHandler(handler) = handler;
                    self.plan_suite(&handler.body, true);
                }
                self.plan_suite(&try_stmt.orelse, true);
                self.plan_suite(&try_stmt.finalbody, true);
            }
            Stmt::Match(match_stmt) => {
                for case in &match_stmt.cases {
                    self.plan_suite(&case.body, true);
                }
            }
            _ => {}
        }
    }
}

/// Byte offsets of line starts, plus one past the end
fn line_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(
        text.char_indices()
            .filter(|&(_, c)| c == '\n')
            .map(|(index, _)| index + 1),
    );
    if starts.last() != Some(&text.len()) {
        starts.push(text.len());
    }
    starts
}

fn line_of(starts: &[usize], offset: usize) -> usize {
    starts
        .partition_point(|&start| start <= offset)
        .saturating_sub(1)
}

/// Whether a statement is alone on its lines, allowing indentation and a trailing comment
fn occupies_whole_lines(text: &str, starts: &[usize], range: TextRange) -> Option<(usize, usize)> {
    let (start, end) = (range.start().to_usize(), range.end().to_usize());
    let first_line = line_of(starts, start);
    let last_line = line_of(starts, end);
    let line_end = starts
        .get(last_line + 1)
        .copied()
        .unwrap_or(text.len())
        .max(end);

    let prefix = &text[starts[first_line]..start];
    let suffix = text[end..line_end].trim();
    (prefix.trim().is_empty() && (suffix.is_empty() || suffix.starts_with('#')))
        .then_some((starts[first_line], line_end))
}

/// Shorten blank-line runs that touch a deleted statement to at most two lines, or to none
/// at the top of the file
fn collapse_blank_runs(text: &str, deletion_points: &BTreeSet<usize>) -> String {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut offsets = Vec::with_capacity(lines.len() + 1);
    let mut offset = 0;
    for line in &lines {
        offsets.push(offset);
        offset += line.len();
    }
    offsets.push(offset);

    let is_blank = |line: &str| line.trim().is_empty();
    let mut out = String::with_capacity(text.len());
    let mut index = 0;
    while index < lines.len() {
        if !is_blank(lines[index]) {
            out.push_str(lines[index]);
            index += 1;
            continue;
        }

        let run_start = index;
        while index < lines.len() && is_blank(lines[index]) {
            index += 1;
        }
        let run_len = index - run_start;
        let touches_deletion = deletion_points
            .range(offsets[run_start]..=offsets[index])
            .next()
            .is_some();
        let keep = match (touches_deletion, run_start) {
            (false, _) => run_len,
            (true, 0) => 0,
            (true, _) => run_len.min(2),
        };
        for line in &lines[run_start..run_start + keep] {
            out.push_str(line);
        }
    }

    out
}

/// Rewrite Python source without the import statements whose roots are all in `unused`.
///
/// Returns `Ok(None)` when nothing changes. Fails when the source does not parse or the
/// rewrite would not parse.
pub fn remove_unused_imports(source: &str, unused: &BTreeSet<String>) -> Result<Option<String>> {
    let parsed = ruff_python_parser::parse_module(source)
        .map_err(|err| anyhow!("Invalid Python syntax: {err}"))?;

    let mut planner = RemovalPlanner::new(unused);
    planner.plan_suite(&parsed.syntax().body, false);
    let mut edits = planner.edits;
    if edits.is_empty() {
        return Ok(None);
    }
    edits.sort_by_key(|edit| edit.range.start());

    let starts = line_starts(source);
    let mut out = String::with_capacity(source.len());
    let mut deletion_points = BTreeSet::new();
    let mut cursor = 0;

    for edit in &edits {
        let whole_lines = occupies_whole_lines(source, &starts, edit.range);
        match (&edit.action, whole_lines) {
            (Action::Delete, Some((line_start, line_end))) => {
                out.push_str(&source[cursor..line_start]);
                deletion_points.insert(out.len());
                cursor = line_end;
            }
            (Action::Delete, None) => {
                // Shares its line with other statements
                out.push_str(&source[cursor..edit.range.start().to_usize()]);
                out.push_str("pass");
                cursor = edit.range.end().to_usize();
            }
            (Action::Replace(replacement), _) => {
                out.push_str(&source[cursor..edit.range.start().to_usize()]);
                out.push_str(replacement);
                cursor = edit.range.end().to_usize();
            }
        }
    }
    out.push_str(&source[cursor..]);

    let rewritten = collapse_blank_runs(&out, &deletion_points);
    ruff_python_parser::parse_module(&rewritten)
        .map_err(|err| anyhow!("Rewrite would produce invalid syntax: {err}"))?;

    Ok((rewritten != source).then_some(rewritten))
}

/// Applies a report's findings to the project tree
#[derive(Debug, Clone)]
pub struct Fixer {
    project_root: PathBuf,
    backup_root: PathBuf,
}

impl Fixer {
    pub fn new(project_root: PathBuf, backup_dir: &str) -> Self {
        let backup_root = project_root.join(backup_dir);
        Self {
            project_root,
            backup_root,
        }
    }

    /// Fresh timestamped directory for this run's backups
    fn run_backup_dir(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut candidate = self.backup_root.join(&stamp);
        let mut attempt = 1;
        while candidate.exists() {
            candidate = self.backup_root.join(format!("{stamp}_{attempt}"));
            attempt += 1;
        }
        candidate
    }

    fn create_backup(&self, run_dir: &Path, file: &Path) -> Result<PathBuf> {
        let relative = file.strip_prefix(&self.project_root).unwrap_or(file);
        let relative = relative
            .file_name()
            .filter(|_| relative.is_absolute())
            .map_or(relative, Path::new);
        let target = run_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create backup directory: {:?}", parent))?;
        }
        fs::copy(file, &target)
            .with_context(|| format!("Failed to back up {:?} to {:?}", file, target))?;
        Ok(target)
    }

    /// Remove unused imports from every file the report flags
    pub fn fix(
        &self,
        report: &Report,
        options: &FixOptions,
        progress: FixProgressCallback<'_>,
    ) -> FixStats {
        let mut stats = FixStats::default();
        let unused_imports = report.unused_imports();
        let total = unused_imports.len();
        let run_dir = (options.backup && !options.dry_run).then(|| self.run_backup_dir());

        for (index, (path, unused)) in unused_imports.iter().enumerate() {
            if let Some(callback) = progress {
                callback(index + 1, total, path);
            }

            let rewritten = read_source(path).and_then(|source| {
                remove_unused_imports(&source.text, unused).map(|text| (source, text))
            });
            let (source, text) = match rewritten {
                Ok((_, None)) => {
                    log::debug!("No removable imports in {}", path.display());
                    continue;
                }
                Ok((source, Some(text))) => (source, text),
                Err(err) => {
                    log::warn!("Failed to fix {}: {err:#}", path.display());
                    stats.files_with_errors += 1;
                    continue;
                }
            };

            let names: Vec<&str> = unused.iter().map(String::as_str).collect();
            if options.dry_run {
                log::info!(
                    "Would remove {} from {}",
                    names.join(", "),
                    path.display()
                );
                stats.files_modified += 1;
                stats.imports_removed += unused.len();
                continue;
            }

            if let Some(run_dir) = &run_dir {
                match self.create_backup(run_dir, path) {
                    Ok(target) => {
                        log::debug!("Created backup: {}", target.display());
                        stats.backups_created += 1;
                    }
                    Err(err) if options.require_backup => {
                        log::error!("Skipping {}: {err:#}", path.display());
                        stats.files_with_errors += 1;
                        continue;
                    }
                    Err(err) => {
                        log::warn!("Proceeding without backup: {err:#}");
                    }
                }
            }

            match write_source(path, &text, source.encoding) {
                Ok(()) => {
                    log::info!("Removed {} from {}", names.join(", "), path.display());
                    stats.files_modified += 1;
                    stats.imports_removed += unused.len();
                }
                Err(err) => {
                    log::warn!("Failed to fix {}: {err:#}", path.display());
                    stats.files_with_errors += 1;
                }
            }
        }

        stats
    }

    /// Drop unused packages from `requirements.txt`, keeping a `.bak` copy of the original
    pub fn update_requirements(&self, report: &Report, dry_run: bool) -> Result<RequirementsUpdate> {
        let path = self.project_root.join(REQUIREMENTS_FILE);
        if !path.is_file() {
            return Ok(RequirementsUpdate::default());
        }

        let unused = report.unused_packages();
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {:?}", path))?;

        let mut kept = String::with_capacity(content.len());
        let mut packages_removed = 0;
        let mut dropping_continuation = false;
        for line in content.split_inclusive('\n') {
            let logical = line.trim_end();
            let continues = logical.ends_with('\\');
            if dropping_continuation {
                dropping_continuation = continues;
                continue;
            }

            let is_unused = extract_package_name(logical.trim_end_matches('\\'))
                .is_some_and(|name| unused.contains(&normalize(&name)));
            if is_unused {
                packages_removed += 1;
                dropping_continuation = continues;
                continue;
            }
            kept.push_str(line);
        }

        if packages_removed == 0 || dry_run {
            return Ok(RequirementsUpdate {
                packages_removed,
                file_updated: false,
            });
        }

        let backup = path.with_extension("txt.bak");
        fs::copy(&path, &backup)
            .with_context(|| format!("Failed to back up {:?} to {:?}", path, backup))?;
        fs::write(&path, kept).with_context(|| format!("Failed to write {:?}", path))?;
        log::info!(
            "Removed {packages_removed} unused packages from {}",
            path.display()
        );

        Ok(RequirementsUpdate {
            packages_removed,
            file_updated: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unused(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    fn rewrite(source: &str, names: &[&str]) -> String {
        remove_unused_imports(source, &unused(names))
            .expect("rewrite should succeed")
            .unwrap_or_else(|| source.to_owned())
    }

    #[test]
    fn test_deletes_whole_import_lines() {
        let source = "import os\nimport sys\n\nprint(sys.argv)\n";
        insta::assert_snapshot!(rewrite(source, &["os"]), @r"
        import sys

        print(sys.argv)
        ");
    }

    #[test]
    fn test_partial_direct_import_keeps_aliases() {
        let source = "import os, numpy as np, json  # stdlib and friends\nnp.zeros(1)\n";
        assert_eq!(
            rewrite(source, &["os", "json"]),
            "import numpy as np  # stdlib and friends\nnp.zeros(1)\n"
        );
    }

    #[test]
    fn test_from_import_removed_only_when_root_unused() {
        let source = "from os import path, sep\nfrom collections import OrderedDict\nOrderedDict()\n";
        assert_eq!(
            rewrite(source, &["os"]),
            "from collections import OrderedDict\nOrderedDict()\n"
        );
        assert_eq!(remove_unused_imports(source, &unused(&["numpy"])).ok(), Some(None));
    }

    #[test]
    fn test_future_and_relative_imports_are_kept() {
        let source = "from __future__ import annotations\nfrom . import sibling\n";
        assert_eq!(
            remove_unused_imports(source, &unused(&["__future__", "sibling"])).ok(),
            Some(None)
        );
    }

    #[test]
    fn test_emptied_block_gets_pass() {
        let source = "\
def load():
    import json
    import yaml

try:
    import ujson  # optional
except ImportError:
    ujson = None
";
        assert_eq!(
            rewrite(source, &["json", "yaml", "ujson"]),
            "\
def load():
    pass

try:
    pass  # optional
except ImportError:
    ujson = None
"
        );
    }

    #[test]
    fn test_semicolon_shared_line_becomes_pass() {
        assert_eq!(rewrite("import os; x = 1\n", &["os"]), "pass; x = 1\n");
        assert_eq!(rewrite("x = 1; import os\n", &["os"]), "x = 1; pass\n");
    }

    #[test]
    fn test_blank_runs_collapse_around_deletions_only() {
        let source = "import os\n\nx = 1\n\n\n\nimport sys\n\n\n\ny = '''\n\n\n\n'''\n";
        assert_eq!(
            rewrite(source, &["os", "sys"]),
            "x = 1\n\n\ny = '''\n\n\n\n'''\n"
        );
    }

    #[test]
    fn test_multiline_from_import_and_crlf() {
        let source = "from typing import (\r\n    Any,\r\n    List,\r\n)\r\nimport re\r\nre.compile('x')\r\n";
        assert_eq!(rewrite(source, &["typing"]), "import re\r\nre.compile('x')\r\n");
    }

    #[test]
    fn test_syntax_error_is_an_error() {
        assert!(remove_unused_imports("import os\ndef broken(:\n", &unused(&["os"])).is_err());
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        let once = rewrite("import os\nimport sys\nsys.exit()\n", &["os"]);
        assert_eq!(remove_unused_imports(&once, &unused(&["os"])).ok(), Some(None));
    }
}
