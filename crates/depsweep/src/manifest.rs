//! Declared dependency extraction from the manifest files found at a project root.
//!
//! Every supported format has its own parser. Parsers run independently: a file that fails
//! to parse is logged and contributes nothing, without affecting the other formats.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;
use ruff_python_ast::visitor::{Visitor, walk_expr};
use ruff_python_ast::{Expr, ExprCall, ModModule, Stmt};
use rustc_hash::FxHashMap;
use toml::Value;

use crate::package_mapper::normalize;

/// Leading distribution name of a requirement specifier
static REQUIREMENT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)").expect("valid regex")
});

/// `#egg=name` fragment of a URL requirement
static EGG_FRAGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#&]egg=([A-Za-z0-9][A-Za-z0-9._-]*)").expect("valid regex"));

/// Pseudo-dependency naming the interpreter version rather than a distribution
const PYTHON_PSEUDO_DEPENDENCY: &str = "python";

/// Distribution name of a PEP 508 style requirement, without version, extras or markers.
///
/// Returns `None` for blank lines, comments, option lines and URLs without an `egg` name.
pub fn extract_package_name(requirement: &str) -> Option<String> {
    let requirement = strip_inline_comment(requirement).trim();
    if requirement.is_empty() || requirement.starts_with('#') || requirement.starts_with('-') {
        return None;
    }

    if requirement.contains("://") && !requirement.contains(" @ ") {
        return EGG_FRAGMENT
            .captures(requirement)
            .map(|captures| captures[1].to_owned());
    }

    let name = REQUIREMENT_NAME
        .captures(requirement)
        .map(|captures| captures[1].to_owned())?;
    if name.eq_ignore_ascii_case(PYTHON_PSEUDO_DEPENDENCY) {
        return None;
    }
    Some(name)
}

/// Drop a `#` comment that follows whitespace; URL fragments stay intact
fn strip_inline_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return line;
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(index) => &line[..index],
        None => line,
    }
}

/// A dependency declaration format
pub trait ManifestParser: Sync {
    /// File name looked up at the project root
    fn file_name(&self) -> &'static str;

    /// Raw (unnormalized) package names declared in the file contents
    fn parse(&self, content: &str) -> Result<Vec<String>>;
}

/// `requirements.txt`: one requirement per line
#[derive(Debug, Clone, Copy, Default)]
pub struct RequirementsTxt;

impl ManifestParser for RequirementsTxt {
    fn file_name(&self) -> &'static str {
        "requirements.txt"
    }

    fn parse(&self, content: &str) -> Result<Vec<String>> {
        Ok(content
            .lines()
            .map(|line| line.trim_end().trim_end_matches('\\'))
            .filter_map(extract_package_name)
            .collect())
    }
}

/// `pyproject.toml`: PEP 621, Poetry and PEP 735 dependency tables
#[derive(Debug, Clone, Copy, Default)]
pub struct PyProjectToml;

impl PyProjectToml {
    fn requirement_strings(value: Option<&Value>, names: &mut Vec<String>) {
        if let Some(Value::Array(items)) = value {
            names.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(extract_package_name),
            );
        }
    }

    fn table_keys(value: Option<&Value>, names: &mut Vec<String>) {
        if let Some(Value::Table(table)) = value {
            names.extend(
                table
                    .keys()
                    .filter(|key| !key.eq_ignore_ascii_case(PYTHON_PSEUDO_DEPENDENCY))
                    .cloned(),
            );
        }
    }
}

impl ManifestParser for PyProjectToml {
    fn file_name(&self) -> &'static str {
        "pyproject.toml"
    }

    fn parse(&self, content: &str) -> Result<Vec<String>> {
        let document: Value = toml::from_str(content).context("Invalid TOML")?;
        let mut names = Vec::new();

        if let Some(project) = document.get("project") {
            Self::requirement_strings(project.get("dependencies"), &mut names);
            if let Some(Value::Table(groups)) = project.get("optional-dependencies") {
                for group in groups.values() {
                    Self::requirement_strings(Some(group), &mut names);
                }
            }
        }

        if let Some(poetry) = document.get("tool").and_then(|tool| tool.get("poetry")) {
            Self::table_keys(poetry.get("dependencies"), &mut names);
            Self::table_keys(poetry.get("dev-dependencies"), &mut names);
            if let Some(Value::Table(groups)) = poetry.get("group") {
                for group in groups.values() {
                    Self::table_keys(group.get("dependencies"), &mut names);
                }
            }
        }

        if let Some(Value::Table(groups)) = document.get("dependency-groups") {
            for group in groups.values() {
                // `{ include-group = "..." }` entries are not strings and are skipped
                Self::requirement_strings(Some(group), &mut names);
            }
        }

        Ok(names)
    }
}

/// `Pipfile`: package tables for runtime and development
#[derive(Debug, Clone, Copy, Default)]
pub struct Pipfile;

impl ManifestParser for Pipfile {
    fn file_name(&self) -> &'static str {
        "Pipfile"
    }

    fn parse(&self, content: &str) -> Result<Vec<String>> {
        let document: Value = toml::from_str(content).context("Invalid TOML")?;
        let mut names = Vec::new();
        for section in ["packages", "dev-packages"] {
            PyProjectToml::table_keys(document.get(section), &mut names);
        }
        Ok(names)
    }
}

/// `setup.cfg`: `[options] install_requires` and `[options.extras_require]`
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupCfg;

impl SetupCfg {
    /// Section -> key -> value, joining indented continuation lines with newlines
    fn read_ini(content: &str) -> FxHashMap<String, FxHashMap<String, String>> {
        let mut sections: FxHashMap<String, FxHashMap<String, String>> = FxHashMap::default();
        let mut section = String::new();
        let mut key: Option<String> = None;

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            if line.starts_with(char::is_whitespace) {
                if let Some(key) = &key {
                    if let Some(value) = sections
                        .get_mut(&section)
                        .and_then(|entries| entries.get_mut(key))
                    {
                        value.push('\n');
                        value.push_str(trimmed);
                    }
                }
                continue;
            }

            if let Some(name) = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                section = name.trim().to_owned();
                key = None;
                continue;
            }

            if let Some((name, value)) = trimmed.split_once(['=', ':']) {
                let name = name.trim().to_owned();
                sections
                    .entry(section.clone())
                    .or_default()
                    .insert(name.clone(), value.trim().to_owned());
                key = Some(name);
            }
        }

        sections
    }

    fn requirement_lines(value: &str, names: &mut Vec<String>) {
        names.extend(
            value
                .lines()
                .flat_map(|line| line.split(';').next())
                .filter_map(extract_package_name),
        );
    }
}

impl ManifestParser for SetupCfg {
    fn file_name(&self) -> &'static str {
        "setup.cfg"
    }

    fn parse(&self, content: &str) -> Result<Vec<String>> {
        let sections = Self::read_ini(content);
        let mut names = Vec::new();

        if let Some(value) = sections
            .get("options")
            .and_then(|options| options.get("install_requires"))
        {
            Self::requirement_lines(value, &mut names);
        }

        if let Some(extras) = sections.get("options.extras_require") {
            let mut groups: Vec<_> = extras.iter().collect();
            groups.sort();
            for (_, value) in groups {
                Self::requirement_lines(value, &mut names);
            }
        }

        Ok(names)
    }
}

/// `setup.py`: `install_requires` and `extras_require` of the `setup(...)` call
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupPy;

/// Finds `setup(...)` / `setuptools.setup(...)` calls anywhere in a module
#[derive(Debug, Default)]
struct SetupCallVisitor<'a> {
    calls: Vec<&'a ExprCall>,
}

impl<'a> Visitor<'a> for SetupCallVisitor<'a> {
    fn visit_expr(&mut self, expr: &'a Expr) {
        if let Expr::Call(call) = expr {
            let is_setup = match call.func.as_ref() {
                Expr::Name(name) => name.id.as_str() == "setup",
                Expr::Attribute(attribute) => {
                    attribute.attr.as_str() == "setup"
                        && matches!(
                            attribute.value.as_ref(),
                            Expr::Name(base) if base.id.as_str() == "setuptools"
                        )
                }
                _ => false,
            };
            if is_setup {
                self.calls.push(call);
            }
        }
        walk_expr(self, expr);
    }
}

impl SetupPy {
    /// Module-level `NAME = <expr>` assignments
    fn module_assignments(module: &ModModule) -> FxHashMap<&str, &Expr> {
        let mut assignments = FxHashMap::default();
        for stmt in &module.body {
            if let Stmt::Assign(assign) = stmt {
                if let [Expr::Name(target)] = assign.targets.as_slice() {
                    assignments.insert(target.id.as_str(), assign.value.as_ref());
                }
            }
        }
        assignments
    }

    fn resolve<'e>(expr: &'e Expr, assignments: &FxHashMap<&str, &'e Expr>) -> &'e Expr {
        match expr {
            Expr::Name(name) => assignments.get(name.id.as_str()).copied().unwrap_or(expr),
            _ => expr,
        }
    }

    fn string_entries(expr: &Expr, names: &mut Vec<String>) {
        let elements = match expr {
            Expr::List(list) => &list.elts,
            Expr::Tuple(tuple) => &tuple.elts,
            Expr::Set(set) => &set.elts,
            Expr::StringLiteral(literal) => {
                SetupCfg::requirement_lines(literal.value.to_str(), names);
                return;
            }
            _ => return,
        };
        for element in elements {
            if let Expr::StringLiteral(literal) = element {
                names.extend(extract_package_name(literal.value.to_str()));
            }
        }
    }
}

impl ManifestParser for SetupPy {
    fn file_name(&self) -> &'static str {
        "setup.py"
    }

    fn parse(&self, content: &str) -> Result<Vec<String>> {
        let parsed = ruff_python_parser::parse_module(content)
            .map_err(|err| anyhow!("Invalid Python syntax: {err}"))?;
        let module = parsed.syntax();
        let assignments = Self::module_assignments(module);

        let mut visitor = SetupCallVisitor::default();
        for stmt in &module.body {
            visitor.visit_stmt(stmt);
        }

        let mut names = Vec::new();
        for call in visitor.calls {
            for keyword in &call.arguments.keywords {
                let Some(arg) = &keyword.arg else {
                    continue;
                };
                let value = Self::resolve(&keyword.value, &assignments);
                match arg.as_str() {
                    "install_requires" => Self::string_entries(value, &mut names),
                    "extras_require" => {
                        if let Expr::Dict(dict) = value {
                            for item in &dict.items {
                                let group = Self::resolve(&item.value, &assignments);
                                Self::string_entries(group, &mut names);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(names)
    }
}

/// Every supported format, in the order they are consulted
pub fn default_parsers() -> Vec<Box<dyn ManifestParser>> {
    vec![
        Box::new(RequirementsTxt),
        Box::new(PyProjectToml),
        Box::new(SetupPy),
        Box::new(SetupCfg),
        Box::new(Pipfile),
    ]
}

/// Outcome of reading one manifest file
#[derive(Debug)]
pub struct ManifestOutcome {
    pub path: PathBuf,
    /// Normalized names on success, the failure otherwise
    pub result: Result<BTreeSet<String>>,
}

/// Declared dependencies of a project with per-file outcomes
#[derive(Debug, Default)]
pub struct DeclaredDependencies {
    pub packages: BTreeSet<String>,
    pub outcomes: Vec<ManifestOutcome>,
}

impl DeclaredDependencies {
    pub fn failed(&self) -> impl Iterator<Item = &ManifestOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }
}

fn parse_manifest(parser: &dyn ManifestParser, path: &Path) -> Result<BTreeSet<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {:?}", path))?;
    let names = parser
        .parse(&content)
        .with_context(|| format!("Failed to parse manifest: {:?}", path))?;
    Ok(names.iter().map(|name| normalize(name)).collect())
}

/// Parse every manifest present at `project_root` and union the normalized results
pub fn collect_declared_dependencies(project_root: &Path) -> DeclaredDependencies {
    collect_with_parsers(project_root, &default_parsers())
}

pub fn collect_with_parsers(
    project_root: &Path,
    parsers: &[Box<dyn ManifestParser>],
) -> DeclaredDependencies {
    let mut declared = DeclaredDependencies::default();

    for parser in parsers {
        let path = project_root.join(parser.file_name());
        if !path.is_file() {
            continue;
        }

        let result = parse_manifest(parser.as_ref(), &path);
        match &result {
            Ok(packages) => {
                log::debug!("{} declares {} packages", path.display(), packages.len());
                declared.packages.extend(packages.iter().cloned());
            }
            Err(err) => log::warn!("Skipping manifest {}: {err:#}", path.display()),
        }
        declared.outcomes.push(ManifestOutcome { path, result });
    }

    declared
}
