//! AST visitors for import discovery and usage detection.

mod import_discovery;
mod usage;

pub use import_discovery::{
    DiscoveredImport, ImportBinding, ImportDiscoveryVisitor, ImportKind, discover_imports,
};
pub use usage::{AliasMap, UsageVisitor, detect_used_roots};
