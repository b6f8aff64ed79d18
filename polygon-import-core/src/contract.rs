//! # contract: interface to the remote Polygon service
//!
//! The import pipeline never talks HTTP itself. It consumes two traits:
//! - [`SessionFactory`] performs session setup and hands out sessions, either
//!   unbound (used for `problem.create`) or bound to one problem id.
//! - [`ProblemSession`] exposes the generic API call, its file-upload and
//!   raw-bytes variants, and the package upload.
//!
//! Both traits are annotated for `mockall`, so the orchestrator can be driven
//! by mocks in tests (`MockSessionFactory`, `MockProblemSession`).

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use mockall::automock;

/// Parameters of one API call. Kept sorted, which request signing relies on.
pub type ApiParams = BTreeMap<String, String>;

/// File contents sent along with an API call, keyed by parameter name.
/// Sent byte for byte, never re-encoded as text.
pub type ApiFiles = BTreeMap<String, Vec<u8>>;

/// Builds [`ApiParams`] from string pairs.
pub fn api_params<'a, I>(pairs: I) -> ApiParams
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request never produced a usable HTTP response.
    #[error("transport error calling {method}: {message}")]
    Transport { method: String, message: String },
    /// The service answered with `status: FAILED`.
    #[error("{method} failed: {comment}")]
    Api { method: String, comment: String },
    /// The response could not be interpreted.
    #[error("unexpected response from {method}: {message}")]
    Decode { method: String, message: String },
    #[error("session setup failed: {0}")]
    Session(String),
    #[error("package error: {0}")]
    Package(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote problem record returned by `problem.create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedProblem {
    pub id: i64,
    pub name: String,
}

impl CreatedProblem {
    /// Reads `id` and `name` from a `problem.create` result. The id is
    /// accepted as a number or a numeric string.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ClientError> {
        let decode = |message: &str| ClientError::Decode {
            method: "problem.create".to_string(),
            message: message.to_string(),
        };
        let id = match value.get("id") {
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| decode("missing or non-integer `id`"))?;
        let name = value
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| decode("missing `name`"))?
            .to_string();
        Ok(CreatedProblem { id, name })
    }
}

/// An authenticated handle to the remote service, scoped to zero or one problem.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ProblemSession: Send + Sync {
    /// The problem this session is bound to, if any.
    fn problem_id(&self) -> Option<i64>;

    /// Call an API method and return the `result` part of the JSON response.
    async fn send_api_request(
        &self,
        method: &str,
        params: ApiParams,
    ) -> Result<serde_json::Value, ClientError>;

    /// Like [`ProblemSession::send_api_request`], with binary file parameters.
    async fn send_api_request_with_files(
        &self,
        method: &str,
        params: ApiParams,
        files: ApiFiles,
    ) -> Result<serde_json::Value, ClientError>;

    /// Call an API method whose response body is file content.
    async fn send_raw_api_request(
        &self,
        method: &str,
        params: ApiParams,
    ) -> Result<Vec<u8>, ClientError>;

    /// Upload the whole package found in `problem_dir` into the bound problem.
    /// With `skip_standard_resources` the service's standard resource files
    /// are left untouched.
    async fn import_problem_from_package(
        &self,
        problem_dir: &Path,
        skip_standard_resources: bool,
    ) -> Result<(), ClientError>;
}

/// Session setup. Implementations carry the credentials of one login profile.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open_session(
        &self,
        problem_id: Option<i64>,
    ) -> Result<Box<dyn ProblemSession>, ClientError>;
}
