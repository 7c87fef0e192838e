//! Training job submission over HTTP.
//!
//! One blocking `POST {api_base}/train` per call. Parameters are expected to
//! be validated already (see [`crate::form`]); transport failures are
//! returned as-is and never retried.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ureq::Agent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Hyperparameters for a training job, serialized in camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingParams {
    pub vocab_size: u64,
    pub embed_size: u64,
    pub num_heads: u64,
    pub num_steps: u64,
    pub train_sentence: String,
    pub pair_sentence: String,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            embed_size: 128,
            num_heads: 8,
            num_steps: 100,
            train_sentence: "Hello world".to_string(),
            pair_sentence: "Goodbye world".to_string(),
        }
    }
}

/// Opaque job identifier returned by the training API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors returned by [`TrainingClient::submit`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[source] ureq::Error),

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response did not include a job id")]
    MissingJobId,

    #[error("submission aborted before a response arrived")]
    Aborted,
}

impl From<ureq::Error> for ClientError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::StatusCode(code) => Self::Status(code),
            other => Self::Transport(other),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "jobId", alias = "job_id", default)]
    job_id: Option<Value>,
}

/// Client for the training API.
#[derive(Debug, Clone)]
pub struct TrainingClient {
    agent: Agent,
    train_url: String,
}

impl TrainingClient {
    /// Create a client for `api_base` (e.g. `http://localhost:8000/api`).
    pub fn new(api_base: &str) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .proxy(None)
            .build();
        Self {
            agent: config.into(),
            train_url: format!("{}/train", api_base.trim_end_matches('/')),
        }
    }

    pub fn train_url(&self) -> &str {
        &self.train_url
    }

    /// Submit `params` and return the new job's identifier.
    pub fn submit(&self, params: &TrainingParams) -> Result<JobId, ClientError> {
        let body = serde_json::to_vec(params)?;
        tracing::info!(url = %self.train_url, steps = params.num_steps, "submitting training job");

        let mut response = self
            .agent
            .post(&self.train_url)
            .header("Content-Type", "application/json")
            .send(&body)
            .map_err(|e| {
                tracing::warn!(error = %e, "training submission failed");
                ClientError::from(e)
            })?;

        let bytes = response.body_mut().read_to_vec()?;
        let job_id = parse_job_id(&bytes)?;
        tracing::info!(%job_id, "training job started");
        Ok(job_id)
    }
}

/// Extract the job id from a response body (`jobId` or `job_id`).
pub fn parse_job_id(body: &[u8]) -> Result<JobId, ClientError> {
    let response: SubmitResponse = serde_json::from_slice(body)?;
    match response.job_id {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(JobId(id)),
        Some(Value::Number(n)) => Ok(JobId(n.to_string())),
        _ => Err(ClientError::MissingJobId),
    }
}
