//! High-level pipeline: imports every problem package of a batch into Polygon.
//!
//! For each problem directory of a batch the pipeline:
//!   - loads the import marker and skips problems already imported
//!   - normalises the package layout (descriptor name, `documents/` placeholders)
//!   - parses the descriptor for the problem's short name
//!   - creates the remote problem once, retrying under suffixed names
//!   - diffs tracked resource files against the remote copy
//!   - uploads the package, commits it and builds a verified package
//!   - records completion in the marker
//!
//! # Error Handling
//! A failing remote step only abandons the current problem: it is logged
//! with the operation and short name and shows up as a [`ProblemOutcome`] in
//! the [`ImportReport`]. The marker is saved right after creation and after
//! full success, so an interrupted problem resumes where it stopped on the
//! next run. Problems themselves are visited in directory listing order,
//! strictly one after another.
//!
//! Only run-level failures are errors ([`ImportError`]): an unreadable
//! batch directory, a corrupt or unwritable marker, failing to write the
//! diff files.
//!
//! # Navigation
//! - Entrypoints: [`import_single`], [`import_many`]
//! - Per-problem step: [`import_problem`]

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::archive::{self, ArchiveSelection};
use crate::config::ImportOptions;
use crate::contract::{api_params, ClientError, CreatedProblem, SessionFactory};
use crate::descriptor::Descriptor;
use crate::diff::{diff_resource_files, DiffAccumulator};
use crate::locate::{self, DESCRIPTOR_FILE_NAME};
use crate::marker::{MarkerError, MarkerFile};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Marker(#[from] MarkerError),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ImportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ImportError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How one problem directory ended up in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemOutcome {
    /// The marker already says imported.
    Skipped,
    /// The descriptor could not be renamed into place or `documents/`
    /// could not be created.
    LayoutFailed,
    /// The descriptor is missing, malformed or has no short name.
    InvalidDescriptor,
    /// Every `problem.create` attempt failed.
    CreateFailed,
    /// No session bound to the problem could be opened.
    SessionFailed,
    UploadFailed,
    /// Commit or package build failed.
    CommitFailed,
    Imported,
}

impl ProblemOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ProblemOutcome::Skipped | ProblemOutcome::Imported)
    }
}

#[derive(Debug, Clone)]
pub struct ProblemReport {
    pub problem_dir: PathBuf,
    pub short_name: Option<String>,
    pub problem_id: Option<i64>,
    pub outcome: ProblemOutcome,
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    /// The batch root actually used, after locating nested packages.
    pub src_dir: PathBuf,
    pub problems: Vec<ProblemReport>,
    pub diff_files: Vec<PathBuf>,
}

impl ImportReport {
    pub fn count(&self, outcome: &ProblemOutcome) -> usize {
        self.problems.iter().filter(|p| &p.outcome == outcome).count()
    }

    pub fn failed(&self) -> usize {
        self.problems.iter().filter(|p| p.outcome.is_failure()).count()
    }
}

/// Imports every problem package found under `src_dir`, then writes the
/// collected resource diffs into the batch root.
pub async fn import_single<F>(
    src_dir: &Path,
    options: &ImportOptions,
    factory: &F,
) -> Result<ImportReport, ImportError>
where
    F: SessionFactory + ?Sized,
{
    let src_dir = locate::find_true_src_dir(src_dir).map_err(|e| ImportError::io(src_dir, e))?;
    info!(src_dir = %src_dir.display(), "[IMPORT] Starting batch import");

    let problem_dirs =
        locate::problem_dirs(&src_dir).map_err(|e| ImportError::io(&src_dir, e))?;

    let mut diffs = DiffAccumulator::new();
    let mut problems = Vec::with_capacity(problem_dirs.len());
    for problem_dir in problem_dirs {
        let report = import_problem(&problem_dir, options, factory, &mut diffs).await?;
        problems.push(report);
    }

    let diff_files = diffs
        .dump(&src_dir)
        .map_err(|e| ImportError::io(&src_dir, e))?;

    let report = ImportReport {
        src_dir,
        problems,
        diff_files,
    };
    info!(
        src_dir = %report.src_dir.display(),
        total = report.problems.len(),
        imported = report.count(&ProblemOutcome::Imported),
        skipped = report.count(&ProblemOutcome::Skipped),
        failed = report.failed(),
        "[IMPORT] Batch import finished"
    );
    Ok(report)
}

/// Unpacks each selected archive of `archives_dir` and imports its problems.
/// An archive that cannot be unpacked is logged and left out; the others
/// are still processed.
pub async fn import_many<F>(
    archives_dir: &Path,
    selection: &ArchiveSelection,
    options: &ImportOptions,
    factory: &F,
) -> Result<Vec<ImportReport>, ImportError>
where
    F: SessionFactory + ?Sized,
{
    let archives = archive::selected_archives(archives_dir, selection)
        .map_err(|e| ImportError::io(archives_dir, e))?;
    info!(
        archives_dir = %archives_dir.display(),
        count = archives.len(),
        "[IMPORT] Importing contest archives"
    );

    let mut reports = Vec::with_capacity(archives.len());
    for archive_path in archives {
        let unpack_dir = match archive::ensure_extracted(&archive_path) {
            Ok(dir) => dir,
            Err(e) => {
                error!(
                    archive = %archive_path.display(),
                    error = %e,
                    "[IMPORT][ERROR] Failed to unpack archive, skipping"
                );
                continue;
            }
        };
        info!(archive = %archive_path.display(), "[IMPORT] Importing archive");
        let root = archive::import_root(&unpack_dir);
        reports.push(import_single(&root, options, factory).await?);
    }
    Ok(reports)
}

/// Runs the whole state machine for one problem directory. Remote failures
/// come back as a [`ProblemOutcome`]; only marker and filesystem failures
/// are errors.
pub async fn import_problem<F>(
    problem_dir: &Path,
    options: &ImportOptions,
    factory: &F,
    diffs: &mut DiffAccumulator,
) -> Result<ProblemReport, ImportError>
where
    F: SessionFactory + ?Sized,
{
    let mut marker = MarkerFile::load(problem_dir)?;
    let mut report = ProblemReport {
        problem_dir: problem_dir.to_path_buf(),
        short_name: marker.short_name().map(str::to_string),
        problem_id: marker.problem_id(),
        outcome: ProblemOutcome::Skipped,
    };
    if marker.imported() {
        info!(problem_dir = %problem_dir.display(), "[IMPORT] Already imported, skipping");
        return Ok(report);
    }

    let layout = locate::reconcile_descriptor(problem_dir)
        .and_then(|_| locate::ensure_documents(problem_dir));
    if let Err(e) = layout {
        error!(
            problem_dir = %problem_dir.display(),
            error = %e,
            "[IMPORT][ERROR] Failed to prepare package layout, skipping"
        );
        report.outcome = ProblemOutcome::LayoutFailed;
        return Ok(report);
    }

    let descriptor = match Descriptor::from_file(&problem_dir.join(DESCRIPTOR_FILE_NAME)) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            error!(
                problem_dir = %problem_dir.display(),
                error = %e,
                "[IMPORT][ERROR] Skipping non-standard package"
            );
            report.outcome = ProblemOutcome::InvalidDescriptor;
            return Ok(report);
        }
    };
    let short_name = descriptor.short_name().to_string();
    info!(short_name = %short_name, "[IMPORT] Uploading problem");

    let problem_id = match marker.problem_id() {
        Some(id) => id,
        None => match create_problem(factory, &short_name, options.retry_count).await {
            Ok(created) => {
                marker.set_short_name(created.name.clone());
                marker.set_problem_id(created.id);
                marker.save()?;
                info!(
                    short_name = %created.name,
                    problem_id = created.id,
                    "[IMPORT] Created problem"
                );
                created.id
            }
            Err(e) => {
                error!(
                    short_name = %short_name,
                    error = %e,
                    "[IMPORT][ERROR] Failed to create problem, skipping"
                );
                report.short_name.get_or_insert(short_name);
                report.outcome = ProblemOutcome::CreateFailed;
                return Ok(report);
            }
        },
    };
    let remote_name = marker.short_name().unwrap_or(&short_name).to_string();
    report.short_name = Some(remote_name.clone());
    report.problem_id = Some(problem_id);

    let session = match factory.open_session(Some(problem_id)).await {
        Ok(session) => session,
        Err(e) => {
            error!(
                short_name = %short_name,
                problem_id,
                error = %e,
                "[IMPORT][ERROR] Failed to open problem session, skipping"
            );
            report.outcome = ProblemOutcome::SessionFailed;
            return Ok(report);
        }
    };

    // Diff before upload: the upload overwrites the remote resources.
    match diff_resource_files(&descriptor, problem_dir, session.as_ref(), &options.resource_files)
        .await
    {
        Ok(problem_diffs) => diffs.append(&remote_name, problem_diffs),
        Err(e) => error!(
            short_name = %short_name,
            error = %e,
            "[IMPORT][ERROR] Failed to calculate resource diffs"
        ),
    }

    if let Err(e) = session.import_problem_from_package(problem_dir, false).await {
        error!(
            short_name = %short_name,
            problem_id,
            error = %e,
            "[IMPORT][ERROR] Failed to import problem package"
        );
        report.outcome = ProblemOutcome::UploadFailed;
        return Ok(report);
    }

    let committed = async {
        session
            .send_api_request(
                "problem.commitChanges",
                api_params([("minorChanges", "true"), ("message", "new")]),
            )
            .await?;
        session
            .send_api_request(
                "problem.buildPackage",
                api_params([("full", "true"), ("verify", "true")]),
            )
            .await?;
        Ok::<(), ClientError>(())
    }
    .await;
    if let Err(e) = committed {
        error!(
            short_name = %short_name,
            problem_id,
            error = %e,
            "[IMPORT][ERROR] Failed to commit problem or build a package"
        );
        report.outcome = ProblemOutcome::CommitFailed;
        return Ok(report);
    }

    marker.set_imported();
    marker.save()?;
    info!(short_name = %remote_name, problem_id, "[IMPORT] Problem imported");
    report.outcome = ProblemOutcome::Imported;
    Ok(report)
}

/// Creates a remote problem named `short_name`. After a failure it retries
/// up to `retry_count` more times as `short_name-2`, `short_name-3`, ...;
/// when every attempt fails the last error is returned.
pub async fn create_problem<F>(
    factory: &F,
    short_name: &str,
    retry_count: u32,
) -> Result<CreatedProblem, ClientError>
where
    F: SessionFactory + ?Sized,
{
    let session = factory.open_session(None).await?;

    let mut attempt = 0;
    loop {
        let create_name = if attempt == 0 {
            short_name.to_string()
        } else {
            format!("{short_name}-{}", attempt + 1)
        };
        let result = session
            .send_api_request("problem.create", api_params([("name", create_name.as_str())]))
            .await
            .and_then(|json| CreatedProblem::from_json(&json));
        match result {
            Ok(created) => return Ok(created),
            Err(e) if attempt < retry_count => {
                warn!(name = %create_name, error = %e, "Failed to create problem, retrying");
                attempt += 1;
            }
            Err(e) => {
                warn!(name = %create_name, error = %e, "Failed to create problem");
                return Err(e);
            }
        }
    }
}
