//! Resource diffs between a local package and its remote problem.
//!
//! Shared resource files (the statement style and template) are often
//! customised locally. Before upload the importer diffs each tracked file
//! against the copy the remote problem currently has, and the diffs of a
//! whole batch are written out for human review. Nothing here influences
//! whether a problem gets imported.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use similar::TextDiff;
use tracing::{debug, info};

use crate::contract::{api_params, ApiParams, ClientError, ProblemSession};
use crate::descriptor::Descriptor;

pub const DEFAULT_RESOURCE_FILES: [&str; 2] = ["olymp.sty", "statements.ftl"];
pub const DIFF_SEPARATOR_WIDTH: usize = 100;
pub const DIFF_FILE_EXTENSION: &str = "diff";

/// Byte order mark the service prepends to some served files.
const BOM: char = '\u{feff}';

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("failed to read local resource {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("remote lookup failed: {0}")]
    Remote(#[from] ClientError),
    #[error("problem.files returned no resourceFiles list")]
    MissingListing,
}

/// Diffs each of `resource_files` (remote as "before", local as "after").
/// Files that are missing locally or remotely get no entry.
pub async fn diff_resource_files<S>(
    descriptor: &Descriptor,
    problem_dir: &Path,
    session: &S,
    resource_files: &[String],
) -> Result<BTreeMap<String, String>, DiffError>
where
    S: ProblemSession + ?Sized,
{
    info!(files = ?resource_files, "Calculating resource diffs");

    let mut local = BTreeMap::new();
    for name in resource_files {
        let Some(relative) = descriptor.resource_paths().find(|p| p.ends_with(name.as_str()))
        else {
            info!(file = %name, "Resource file not declared in package");
            continue;
        };
        let path = problem_dir.join(relative);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(file = %name, path = %path.display(), "Resource file missing on disk");
                continue;
            }
            Err(source) => return Err(DiffError::Io { path, source }),
        };
        local.insert(name.clone(), normalize_line_endings(&bytes));
    }
    if local.is_empty() {
        return Ok(BTreeMap::new());
    }

    let listing = session
        .send_api_request("problem.files", ApiParams::new())
        .await?;
    let remote_names: Vec<String> = listing
        .get("resourceFiles")
        .and_then(|files| files.as_array())
        .ok_or(DiffError::MissingListing)?
        .iter()
        .filter_map(|file| file.get("name").and_then(|n| n.as_str()))
        .map(str::to_string)
        .collect();

    let mut diffs = BTreeMap::new();
    for (name, local_content) in &local {
        let Some(remote_name) = remote_names.iter().find(|n| n.ends_with(name.as_str())) else {
            info!(file = %name, "Resource file not present remotely");
            continue;
        };
        let remote_bytes = session
            .send_raw_api_request(
                "problem.viewFile",
                api_params([("type", "resource"), ("name", remote_name.as_str())]),
            )
            .await?;
        let remote_content = normalize_line_endings(&remote_bytes).replace(BOM, "");
        let diff = unified_diff(name, &remote_content, local_content);
        debug!(file = %name, lines = diff.lines().count(), "Computed resource diff");
        diffs.insert(name.clone(), diff);
    }
    Ok(diffs)
}

fn normalize_line_endings(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

fn unified_diff(name: &str, remote: &str, local: &str) -> String {
    let diff = TextDiff::from_lines(remote, local);
    let old_header = format!("polygon/{name}");
    let new_header = format!("local/{name}");
    diff.unified_diff()
        .context_radius(3)
        .header(&old_header, &new_header)
        .to_string()
}

/// Collects diffs of a batch, keyed by resource file name, in processing order.
#[derive(Debug, Default)]
pub struct DiffAccumulator {
    diffs: BTreeMap<String, String>,
}

impl DiffAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one problem's diffs, each preceded by a separator line and
    /// the problem's short name.
    pub fn append(&mut self, short_name: &str, diffs: BTreeMap<String, String>) {
        let separator = "-".repeat(DIFF_SEPARATOR_WIDTH);
        for (file, diff) in diffs {
            let entry = self.diffs.entry(file).or_default();
            entry.push_str(&format!("\n{separator}\n{short_name}\n"));
            entry.push_str(&diff);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn get(&self, file: &str) -> Option<&str> {
        self.diffs.get(file).map(String::as_str)
    }

    /// Writes one `<resource>.diff` per collected resource into `dir`.
    pub fn dump(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (file, diff) in &self.diffs {
            let path = dir.join(format!("{file}.{DIFF_FILE_EXTENSION}"));
            fs::write(&path, diff)?;
            info!(file = %file, path = %path.display(), "Dumped resource diff");
            written.push(path);
        }
        Ok(written)
    }
}
