use once_cell::sync::Lazy;
use ruff_python_stdlib::sys;
use rustc_hash::FxHashSet;

/// Names that are importable without any distribution but absent from the stdlib tables
static IMPLICIT_MODULES: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    ["__main__", "__builtin__", "_typeshed", "__phello__"]
        .into_iter()
        .collect()
});

/// Check if a module is part of the Python standard library using ruff_python_stdlib
pub fn is_stdlib_module(module_name: &str, python_version: u8) -> bool {
    let top_level = crate::util::root_module(module_name);
    sys::is_known_standard_library(python_version, top_level)
        || IMPLICIT_MODULES.contains(top_level)
}
