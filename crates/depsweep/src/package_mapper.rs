//! Mapping between distribution names declared in manifests and the module names code imports.

use std::collections::BTreeSet;
use std::path::Path;

use cow_utils::CowUtils;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::installed::InstalledDistributions;
use crate::util::root_module;

/// Distributions whose import name differs from the published name
const KNOWN_MAPPINGS: &[(&str, &str)] = &[
    ("pyyaml", "yaml"),
    ("pillow", "PIL"),
    ("python-dateutil", "dateutil"),
    ("python-dotenv", "dotenv"),
    ("beautifulsoup4", "bs4"),
    ("scikit-learn", "sklearn"),
    ("scikit-image", "skimage"),
    ("opencv-python", "cv2"),
    ("opencv-contrib-python", "cv2"),
    ("opencv-python-headless", "cv2"),
    ("opencv-contrib-python-headless", "cv2"),
    ("msgpack-python", "msgpack"),
    ("protobuf", "google.protobuf"),
    ("attrs", "attr"),
    ("ruamel.yaml", "ruamel"),
    ("python-markdown", "markdown"),
    ("python-slugify", "slugify"),
    ("mysql-python", "MySQLdb"),
    ("mysqlclient", "MySQLdb"),
    ("python-ldap", "ldap"),
    ("python-magic", "magic"),
    ("python-docx", "docx"),
    ("python-pptx", "pptx"),
    ("pycryptodome", "Crypto"),
    ("pycryptodomex", "Cryptodome"),
    ("typing-extensions", "typing_extensions"),
    ("pyjwt", "jwt"),
    ("pyzmq", "zmq"),
    ("pyserial", "serial"),
    ("pyopenssl", "OpenSSL"),
    ("psycopg2-binary", "psycopg2"),
    ("google-cloud-storage", "google.cloud"),
    // CuPy builds, all imported as `cupy`
    ("cupy-cuda11x", "cupy"),
    ("cupy-cuda12x", "cupy"),
    ("cupy-cuda13x", "cupy"),
    ("cupy-rocm-4-3", "cupy"),
    ("cupy-rocm-5-0", "cupy"),
    ("cupy-rocm-7-0", "cupy"),
    ("torch-cpu", "torch"),
    ("torch-cuda", "torch"),
    ("tensorflow-gpu", "tensorflow"),
    ("tensorflow-cpu", "tensorflow"),
    ("jaxlib", "jax"),
    ("django-debug-toolbar", "debug_toolbar"),
    ("pytest-cov", "pytest_cov"),
    ("pytest-xdist", "xdist"),
    ("pytest-django", "pytest_django"),
];

/// Normalized distribution -> import root
static KNOWN_IMPORTS: Lazy<FxHashMap<String, &'static str>> = Lazy::new(|| {
    KNOWN_MAPPINGS
        .iter()
        .map(|&(package, module)| (normalize(package), root_module(module)))
        .collect()
});

/// Normalized import root -> normalized distributions providing it
static KNOWN_PACKAGES: Lazy<FxHashMap<String, BTreeSet<String>>> = Lazy::new(|| {
    let mut reverse: FxHashMap<String, BTreeSet<String>> = FxHashMap::default();
    for (package, module) in KNOWN_MAPPINGS {
        reverse
            .entry(normalize(root_module(module)))
            .or_default()
            .insert(normalize(package));
    }
    reverse
});

/// Canonical form of a package or module name: lowercase with `-` and `.` folded into `_`.
///
/// Normalizing an already normalized name returns it unchanged.
pub fn normalize(name: &str) -> String {
    name.trim()
        .cow_to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == '.' { '_' } else { c })
        .collect()
}

/// Strip extras and a `python-` prefix or `-python` suffix from a normalized name
fn guess_module_name(normalized: &str) -> String {
    let name = normalized.split('[').next().unwrap_or(normalized).trim();
    let name = name.strip_prefix("python_").unwrap_or(name);
    let name = name.strip_suffix("_python").unwrap_or(name);
    if name.is_empty() {
        normalized.to_owned()
    } else {
        name.to_owned()
    }
}

/// Bridges import roots found in code and distribution names declared in manifests.
///
/// The static table is shared by every instance; installed metadata is per instance and
/// read-only once built, so a mapper can be shared freely between workers.
#[derive(Debug, Default, Clone)]
pub struct PackageMapper {
    installed: InstalledDistributions,
}

impl PackageMapper {
    /// Mapper backed by the static table only
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapper that also consults distributions installed for `project_root`
    pub fn with_installed_metadata(project_root: &Path) -> Self {
        Self {
            installed: InstalledDistributions::discover(project_root),
        }
    }

    pub fn with_installed(installed: InstalledDistributions) -> Self {
        Self { installed }
    }

    /// Import root a distribution is expected to provide, as spelled in code
    pub fn module_name_for(&self, package: &str) -> String {
        let normalized = normalize(package);
        let normalized = normalized.split('[').next().unwrap_or(&normalized).trim();

        if let Some(module) = KNOWN_IMPORTS.get(normalized) {
            return (*module).to_owned();
        }
        if let Some(module) = self.installed.top_level(normalized) {
            return module.to_owned();
        }
        guess_module_name(normalized)
    }

    /// Declared package satisfying an import root.
    ///
    /// Search order: a declared package with the same normalized name, then the statically
    /// known distributions for this import in lexicographic order, then every declared package
    /// in lexicographic order whose own import root matches. The first hit wins.
    pub fn match_import_to_package(
        &self,
        import_root: &str,
        declared: &BTreeSet<String>,
    ) -> Option<String> {
        let normalized = normalize(import_root);

        if declared.contains(&normalized) {
            return Some(normalized);
        }

        if let Some(known) = KNOWN_PACKAGES.get(&normalized) {
            if let Some(package) = known.iter().find(|package| declared.contains(*package)) {
                return Some(package.clone());
            }
        }

        declared
            .iter()
            .find(|package| normalize(&self.module_name_for(package)) == normalized)
            .cloned()
    }

    /// Whether two distributions provide the same import root
    pub fn is_variant_of(&self, package_a: &str, package_b: &str) -> bool {
        normalize(&self.module_name_for(package_a)) == normalize(&self.module_name_for(package_b))
    }
}
