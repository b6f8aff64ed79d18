///
/// This module implements the CLI interface for polygon-import: command
/// parsing, profile resolution and the `run` entrypoint.
///
/// All import logic (markers, package discovery, archives, diffs and the
/// per-problem pipeline) lives in [`polygon-import-core`]. This module only
/// wires a logged-in [`PolygonClient`] into it and reports the outcome.
///
/// ## Modes
/// - `import <src_dir>` imports every problem package under a directory.
/// - `import_many <archives_dir> [--archives NAME.zip ...]` unpacks contest
///   archives and imports each of them.
///
/// Individual problem failures never fail the process; only run-level
/// errors (bad profile, corrupt marker, unreadable directories) do.
///
/// [`polygon-import-core`]: ../../polygon-import-core/
use crate::client::PolygonClient;
use crate::load_config::{resolve_profile, DEFAULT_PROFILE};
use anyhow::Result;
use clap::{Parser, Subcommand};
use polygon_import_core::archive::ArchiveSelection;
use polygon_import_core::config::ImportOptions;
use polygon_import_core::contract::SessionFactory;
use polygon_import_core::import::{import_many, import_single, ImportReport, ProblemOutcome};
use std::path::PathBuf;

/// CLI for polygon-import: upload Polygon problem packages in bulk.
#[derive(Parser)]
#[clap(
    name = "polygon-import",
    version,
    about = "Imports contest problems to Polygon from local packages and archives"
)]
pub struct Cli {
    /// Login profile from the auth config
    #[clap(long, global = true, default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// Path to the YAML auth config (defaults to <config dir>/polygon-import/auth.yaml)
    #[clap(long, global = true)]
    pub auth_config: Option<PathBuf>,

    /// Max number of retries while creating a problem
    #[clap(long, global = true, default_value_t = 0, alias = "retry-create")]
    pub retry_count: u32,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Imports contest problems from a directory of problem packages
    #[clap(alias = "import_single")]
    Import {
        /// Path to a directory with problems
        src_dir: PathBuf,
    },
    /// Unpacks contest archives and imports the problems of each one
    #[clap(name = "import_many", alias = "import-many")]
    ImportMany {
        /// Path to a directory with contest archives
        archives_dir: PathBuf,
        /// Archive names to import, format: name.zip (all archives when omitted)
        #[clap(long, num_args = 1..)]
        archives: Vec<String>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let options = ImportOptions::with_retry_count(cli.retry_count);
    options.trace_loaded();

    let credentials = resolve_profile(cli.auth_config.as_deref(), &cli.profile)?;
    let client = PolygonClient::new(credentials)
        .map_err(|e| anyhow::anyhow!("Failed to set up Polygon session: {e}"))?;

    execute(cli.command, &options, &client).await
}

/// Runs one command against an already set up session factory.
pub async fn execute<F>(command: Commands, options: &ImportOptions, factory: &F) -> Result<()>
where
    F: SessionFactory + ?Sized,
{
    match command {
        Commands::Import { src_dir } => {
            tracing::info!(command = "import", src_dir = %src_dir.display(), "Starting import");
            let report = import_single(&src_dir, options, factory).await?;
            log_report(&report);
        }
        Commands::ImportMany {
            archives_dir,
            archives,
        } => {
            tracing::info!(
                command = "import_many",
                archives_dir = %archives_dir.display(),
                "Starting archive import"
            );
            let selection = if archives.is_empty() {
                ArchiveSelection::all()
            } else {
                ArchiveSelection::from_names(&archives)
            };
            let reports = import_many(&archives_dir, &selection, options, factory).await?;
            for report in &reports {
                log_report(report);
            }
        }
    }
    Ok(())
}

fn log_report(report: &ImportReport) {
    for problem in report.problems.iter().filter(|p| p.outcome.is_failure()) {
        tracing::warn!(
            problem_dir = %problem.problem_dir.display(),
            short_name = ?problem.short_name,
            outcome = ?problem.outcome,
            "Problem not imported"
        );
    }
    tracing::info!(
        src_dir = %report.src_dir.display(),
        total = report.problems.len(),
        imported = report.count(&ProblemOutcome::Imported),
        skipped = report.count(&ProblemOutcome::Skipped),
        failed = report.failed(),
        diff_files = report.diff_files.len(),
        "Import complete"
    );
}
