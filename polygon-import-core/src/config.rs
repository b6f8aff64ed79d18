use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diff::DEFAULT_RESOURCE_FILES;

/// Knobs of an import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Extra `problem.create` attempts after the first one fails.
    #[serde(default)]
    pub retry_count: u32,
    /// Resource files whose remote/local difference is reported.
    #[serde(default = "default_resource_files")]
    pub resource_files: Vec<String>,
}

fn default_resource_files() -> Vec<String> {
    DEFAULT_RESOURCE_FILES.iter().map(|s| s.to_string()).collect()
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            retry_count: 0,
            resource_files: default_resource_files(),
        }
    }
}

impl ImportOptions {
    pub fn with_retry_count(retry_count: u32) -> Self {
        Self {
            retry_count,
            ..Self::default()
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            retry_count = self.retry_count,
            resource_files = self.resource_files.len(),
            "Loaded import options"
        );
        debug!(options = ?self, "Import options loaded (full debug)");
    }
}
