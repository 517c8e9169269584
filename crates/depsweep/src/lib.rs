pub mod analyzer;
pub mod collector;
pub mod combine;
pub mod config;
pub mod dirs;
pub mod fixer;
pub mod installed;
pub mod manifest;
pub mod orchestrator;
pub mod package_mapper;
pub mod report;
pub mod scanner;
pub mod stdlib;
pub mod util;
pub mod visitors;

pub use config::Config;
pub use fixer::{FixOptions, FixStats};
pub use orchestrator::{DepSweep, FileAnalysis};
pub use report::{Report, ReportFormat};
pub use scanner::ScanProgress;
