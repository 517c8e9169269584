use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{debug, info};

use depsweep::config::Config;
use depsweep::fixer::FixOptions;
use depsweep::orchestrator::DepSweep;
use depsweep::report::ReportFormat;
use depsweep::scanner::ScanProgress;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, conflicts_with = "quiet")]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Target Python version (e.g., py38, py39, py310, py311, py312, py313)
    #[arg(long, global = true)]
    target_version: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report unused imports and unused or missing dependencies
    Scan {
        /// Project directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Print the report as JSON
        #[arg(long, conflicts_with = "format")]
        json: bool,

        /// Text report style
        #[arg(long, value_enum, default_value_t = Format::Summary)]
        format: Format,
    },
    /// Print a one-line summary and exit non-zero when issues exist
    Check {
        /// Project directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Remove unused imports
    Fix {
        /// Project directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Do not back up files before rewriting them
        #[arg(long)]
        no_backup: bool,

        /// Show what would change without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Only fix files matching this glob
        #[arg(long)]
        pattern: Option<String>,

        /// Also drop unused packages from requirements.txt
        #[arg(long)]
        update_requirements: bool,
    },
    /// Analyze a single Python file
    File {
        /// Python file to analyze
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Summary,
    Detailed,
}

impl From<Format> for ReportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Summary => Self::Summary,
            Format::Detailed => Self::Detailed,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();
    debug!(
        "Verbosity level: {} (log level: {})",
        cli.verbose, log_level
    );

    match run(&cli) {
        Ok(has_issues) => ExitCode::from(u8::from(has_issues)),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// Execute the selected command, returning whether issues remain
fn run(cli: &Cli) -> anyhow::Result<bool> {
    match &cli.command {
        Command::Scan { path, json, format } => {
            let mut sweep = open(cli, path)?;
            let report = if cli.verbose > 0 {
                let progress = |event: ScanProgress| info!("{event:?}");
                sweep.scan(false, Some(&progress))?
            } else {
                sweep.scan(false, None)?
            };
            if *json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.render((*format).into()));
            }
            Ok(report.has_issues())
        }
        Command::Check { path } => {
            let mut sweep = open(cli, path)?;
            let report = sweep.scan(false, None)?;
            if report.has_issues() {
                println!(
                    "{} unused imports in {} files, {} unused packages, {} missing packages",
                    report.total_unused_imports(),
                    report.unused_imports().len(),
                    report.unused_packages().len(),
                    report.missing_packages().len()
                );
            } else {
                println!("No issues found in {} files", report.scanned_files);
            }
            Ok(report.has_issues())
        }
        Command::Fix {
            path,
            no_backup,
            dry_run,
            pattern,
            update_requirements,
        } => {
            let mut sweep = open(cli, path)?;
            let options = FixOptions {
                backup: !no_backup,
                dry_run: *dry_run,
                ..FixOptions::default()
            };
            let progress = |done: usize, total: usize, file: &Path| {
                debug!("[{done}/{total}] {}", file.display());
            };
            let stats = sweep.fix(&options, pattern.as_deref(), Some(&progress))?;

            let verb = if *dry_run { "Would modify" } else { "Modified" };
            println!(
                "{verb} {} files, removing {} imports",
                stats.files_modified, stats.imports_removed
            );
            if stats.backups_created > 0 {
                println!("Backed up {} files", stats.backups_created);
            }
            if stats.files_with_errors > 0 {
                println!("Failed to fix {} files", stats.files_with_errors);
            }

            if *update_requirements {
                let update = sweep.update_requirements(*dry_run)?;
                if update.packages_removed > 0 {
                    println!(
                        "{} {} packages from requirements.txt",
                        if *dry_run { "Would remove" } else { "Removed" },
                        update.packages_removed
                    );
                }
            }
            Ok(stats.files_with_errors > 0)
        }
        Command::File { file } => {
            let parent = file
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let sweep = open(cli, parent)?;
            let analysis = sweep.analyze_file(file)?;
            let join = |names: &std::collections::BTreeSet<String>| {
                if names.is_empty() {
                    "none".to_owned()
                } else {
                    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
                }
            };
            println!("File: {}", file.display());
            println!("All imports: {}", join(&analysis.all_imports));
            println!("Used imports: {}", join(&analysis.used_imports));
            println!("Unused imports: {}", join(&analysis.unused_imports));
            Ok(!analysis.unused_imports.is_empty())
        }
    }
}

fn open(cli: &Cli, project_root: &Path) -> anyhow::Result<DepSweep> {
    let mut config = Config::load(project_root, cli.config.as_deref())?;
    if let Some(target_version) = &cli.target_version {
        config.set_target_version(target_version.clone())?;
    }
    debug!("Configuration: {:?}", config);
    info!(
        "Target Python version: {} (resolved to Python 3.{})",
        config.target_version,
        config.python_version()?
    );
    DepSweep::new(project_root, config)
}
