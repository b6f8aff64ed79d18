//! Per-problem import marker (`import-config.json`).
//!
//! The marker records how far a problem directory got through the import:
//! the remote id once `problem.create` succeeded, the confirmed short name,
//! and `imported` once upload, commit and build all went through. It is
//! created empty on first visit, rewritten whole on every save and never
//! deleted. Keys this tool does not know about survive a load/save cycle,
//! so hand edits between runs are preserved.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MARKER_FILE_NAME: &str = "import-config.json";

#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    #[error("failed to access marker {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("marker {path} is not a valid import config: {source}")]
    ConfigCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The persisted fields. Absent keys deserialize to `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProblemMarker {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A marker bound to the file it was loaded from.
#[derive(Debug, Clone)]
pub struct MarkerFile {
    path: PathBuf,
    marker: ProblemMarker,
}

impl MarkerFile {
    /// Reads the marker inside `problem_dir`, creating an empty one first if
    /// the directory has none. Invalid JSON is reported as
    /// [`MarkerError::ConfigCorrupt`].
    pub fn load(problem_dir: &Path) -> Result<Self, MarkerError> {
        let path = problem_dir.join(MARKER_FILE_NAME);
        let io_err = |source| MarkerError::Io {
            path: path.clone(),
            source,
        };

        if !path.exists() {
            debug!(path = %path.display(), "Creating empty import marker");
            fs::write(&path, b"{}").map_err(io_err)?;
        }

        let content = fs::read_to_string(&path).map_err(io_err)?;
        let marker: ProblemMarker =
            serde_json::from_str(&content).map_err(|source| MarkerError::ConfigCorrupt {
                path: path.clone(),
                source,
            })?;
        Ok(MarkerFile { path, marker })
    }

    /// Overwrites the marker file with the in-memory state. The content goes
    /// to a temporary file in the same directory which is then renamed over
    /// the marker, so a crash never leaves a truncated file.
    pub fn save(&self) -> Result<(), MarkerError> {
        let io_err = |source| MarkerError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let json = serde_json::to_vec(&self.marker).map_err(|e| io_err(e.into()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        debug!(path = %self.path.display(), "Saved import marker");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn marker(&self) -> &ProblemMarker {
        &self.marker
    }

    pub fn imported(&self) -> bool {
        self.marker.imported.unwrap_or(false)
    }

    pub fn set_imported(&mut self) {
        self.marker.imported = Some(true);
    }

    pub fn short_name(&self) -> Option<&str> {
        self.marker.short_name.as_deref()
    }

    pub fn set_short_name(&mut self, short_name: impl Into<String>) {
        self.marker.short_name = Some(short_name.into());
    }

    pub fn problem_id(&self) -> Option<i64> {
        self.marker.problem_id
    }

    pub fn set_problem_id(&mut self, problem_id: i64) {
        self.marker.problem_id = Some(problem_id);
    }
}
