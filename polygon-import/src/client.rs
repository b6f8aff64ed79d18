//! # Polygon client
//!
//! Implements [`SessionFactory`] and [`ProblemSession`] from
//! `polygon-import-core` on top of `reqwest`.
//!
//! Every call is a form POST to `<url>/api/<method>`, sent as multipart when
//! it carries file contents. Besides its own parameters a request carries
//! `apiKey`, `time`, `problemId` (for bound sessions) and `apiSig`: six
//! random characters followed by the hex SHA-512 of
//! `<rand>/<method>?<sorted params>#<secret>`. File contents take part in
//! the signature as their raw bytes.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use polygon_import_core::contract::{
    ApiFiles, ApiParams, ClientError, ProblemSession, SessionFactory,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha512};

use crate::load_config::Credentials;
use crate::package;

/// Envelope of every JSON answer.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    comment: Option<String>,
    result: Option<serde_json::Value>,
}

/// Computes `apiSig` for a call with the given (complete) parameters.
pub fn sign(
    method: &str,
    params: &ApiParams,
    files: &ApiFiles,
    secret: &str,
    rand_prefix: &str,
) -> String {
    let mut pairs: Vec<(&[u8], &[u8])> = params
        .iter()
        .map(|(k, v)| (k.as_bytes(), v.as_bytes()))
        .chain(files.iter().map(|(k, v)| (k.as_bytes(), v.as_slice())))
        .collect();
    pairs.sort();

    let mut payload = format!("{rand_prefix}/{method}?").into_bytes();
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            payload.push(b'&');
        }
        payload.extend_from_slice(key);
        payload.push(b'=');
        payload.extend_from_slice(value);
    }
    payload.push(b'#');
    payload.extend_from_slice(secret.as_bytes());

    let digest = Sha512::digest(&payload);
    format!("{rand_prefix}{}", hex::encode(digest))
}

fn random_prefix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Logged-in access to one Polygon instance.
pub struct PolygonClient {
    http: reqwest::Client,
    credentials: Arc<Credentials>,
}

impl PolygonClient {
    pub fn new(credentials: Credentials) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("polygon-import/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Session(e.to_string()))?;
        tracing::info!(url = %credentials.url, "Initialized Polygon client");
        Ok(Self {
            http,
            credentials: Arc::new(credentials),
        })
    }

    /// A session bound to `problem_id` (or unbound), without going through
    /// the trait object.
    pub fn session(&self, problem_id: Option<i64>) -> PolygonSession {
        PolygonSession {
            http: self.http.clone(),
            credentials: self.credentials.clone(),
            problem_id,
        }
    }
}

#[async_trait]
impl SessionFactory for PolygonClient {
    async fn open_session(
        &self,
        problem_id: Option<i64>,
    ) -> Result<Box<dyn ProblemSession>, ClientError> {
        tracing::debug!(?problem_id, "Opening Polygon session");
        Ok(Box::new(self.session(problem_id)))
    }
}

pub struct PolygonSession {
    http: reqwest::Client,
    credentials: Arc<Credentials>,
    problem_id: Option<i64>,
}

impl PolygonSession {
    fn endpoint(&self, method: &str) -> String {
        format!("{}/api/{method}", self.credentials.url.trim_end_matches('/'))
    }

    /// Adds authentication parameters and signs the call.
    fn signed_params(&self, method: &str, mut params: ApiParams, files: &ApiFiles) -> ApiParams {
        params.insert("apiKey".into(), self.credentials.api_key.clone());
        params.insert("time".into(), unix_time().to_string());
        if let Some(id) = self.problem_id {
            params.insert("problemId".into(), id.to_string());
        }
        let sig = sign(
            method,
            &params,
            files,
            &self.credentials.api_secret,
            &random_prefix(),
        );
        params.insert("apiSig".into(), sig);
        params
    }

    async fn post(
        &self,
        method: &str,
        params: ApiParams,
        files: ApiFiles,
    ) -> Result<reqwest::Response, ClientError> {
        let params = self.signed_params(method, params, &files);
        tracing::debug!(
            method,
            problem_id = ?self.problem_id,
            files = files.len(),
            "Calling Polygon API"
        );
        let request = self.http.post(self.endpoint(method));
        let request = if files.is_empty() {
            request.form(&params)
        } else {
            request.multipart(multipart_form(params, files))
        };
        request
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, method, "Polygon request failed");
                ClientError::Transport {
                    method: method.to_string(),
                    message: e.to_string(),
                }
            })
    }
}

fn multipart_form(params: ApiParams, files: ApiFiles) -> Form {
    let form = params
        .into_iter()
        .fold(Form::new(), |form, (key, value)| form.text(key, value));
    files.into_iter().fold(form, |form, (key, content)| {
        let part = Part::bytes(content).file_name(key.clone());
        form.part(key, part)
    })
}

fn decode_envelope(method: &str, body: &[u8]) -> Result<serde_json::Value, ClientError> {
    let response: ApiResponse =
        serde_json::from_slice(body).map_err(|e| ClientError::Decode {
            method: method.to_string(),
            message: e.to_string(),
        })?;
    if response.status == "OK" {
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    } else {
        Err(ClientError::Api {
            method: method.to_string(),
            comment: response
                .comment
                .unwrap_or_else(|| format!("status {}", response.status)),
        })
    }
}

#[async_trait]
impl ProblemSession for PolygonSession {
    fn problem_id(&self) -> Option<i64> {
        self.problem_id
    }

    async fn send_api_request(
        &self,
        method: &str,
        params: ApiParams,
    ) -> Result<serde_json::Value, ClientError> {
        self.send_api_request_with_files(method, params, ApiFiles::new())
            .await
    }

    async fn send_api_request_with_files(
        &self,
        method: &str,
        params: ApiParams,
        files: ApiFiles,
    ) -> Result<serde_json::Value, ClientError> {
        let response = self.post(method, params, files).await?;
        let body = response.bytes().await.map_err(|e| ClientError::Transport {
            method: method.to_string(),
            message: e.to_string(),
        })?;
        decode_envelope(method, &body)
    }

    async fn send_raw_api_request(
        &self,
        method: &str,
        params: ApiParams,
    ) -> Result<Vec<u8>, ClientError> {
        let response = self.post(method, params, ApiFiles::new()).await?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| ClientError::Transport {
            method: method.to_string(),
            message: e.to_string(),
        })?;
        if status.is_success() {
            return Ok(body.to_vec());
        }
        match decode_envelope(method, &body) {
            Err(e) => Err(e),
            Ok(_) => Err(ClientError::Api {
                method: method.to_string(),
                comment: format!("HTTP {status}"),
            }),
        }
    }

    async fn import_problem_from_package(
        &self,
        problem_dir: &Path,
        skip_standard_resources: bool,
    ) -> Result<(), ClientError> {
        package::upload_package(self, problem_dir, skip_standard_resources).await
    }
}
