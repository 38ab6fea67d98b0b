//! External collaborators
//!
//! The engine never decides what an agent or tool does. It hands them a
//! payload, a deadline and a cancellation token, and waits. These traits
//! are the only seams through which step work leaves the process.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use workflow_types::{AgentId, HttpMethod, StepError};

/// Failure reported by a collaborator
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    /// The collaborator ran and reported an error
    #[error("{0}")]
    Failed(String),

    /// The collaborator gave up before the deadline
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The collaborator observed the cancellation token
    #[error("cancelled")]
    Cancelled,

    /// No collaborator of this kind is configured
    #[error("no {0} configured")]
    Unavailable(&'static str),
}

impl From<CollaboratorError> for StepError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::DeadlineExceeded => StepError::timeout("collaborator deadline exceeded"),
            CollaboratorError::Cancelled => StepError::cancelled(),
            other => StepError::executor(other.to_string()),
        }
    }
}

pub type CollaboratorResult = Result<Value, CollaboratorError>;

/// Runs agent tasks
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Invoke `agent` with a task payload
    ///
    /// Implementations should return promptly once `cancel` fires; the
    /// engine stops waiting at `deadline` either way.
    async fn invoke(
        &self,
        agent: &AgentId,
        payload: Value,
        deadline: Option<Instant>,
        cancel: CancellationToken,
    ) -> CollaboratorResult;
}

/// Invokes tool functions
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn call(
        &self,
        tool: &str,
        function: &str,
        params: Value,
        deadline: Option<Instant>,
        cancel: CancellationToken,
    ) -> CollaboratorResult;
}

/// Sends webhook requests
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &Value,
    ) -> CollaboratorResult;
}

// ── Defaults ─────────────────────────────────────────────────────────

/// Stand-in used when the engine is built without an agent or tool collaborator
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl AgentExecutor for Unconfigured {
    async fn invoke(
        &self,
        _agent: &AgentId,
        _payload: Value,
        _deadline: Option<Instant>,
        _cancel: CancellationToken,
    ) -> CollaboratorResult {
        Err(CollaboratorError::Unavailable("agent executor"))
    }
}

#[async_trait]
impl ToolInvoker for Unconfigured {
    async fn call(
        &self,
        _tool: &str,
        _function: &str,
        _params: Value,
        _deadline: Option<Instant>,
        _cancel: CancellationToken,
    ) -> CollaboratorResult {
        Err(CollaboratorError::Unavailable("tool invoker"))
    }
}

/// reqwest-backed webhook client
#[derive(Debug, Clone, Default)]
pub struct HttpWebhookClient {
    client: Client,
}

impl HttpWebhookClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &Value,
    ) -> CollaboratorResult {
        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url).json(body),
            HttpMethod::Put => self.client.put(url).json(body),
        };
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CollaboratorError::Failed(format!("{} {}: {}", method, url, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CollaboratorError::Failed(e.to_string()))?;

        if !status.is_success() {
            return Err(CollaboratorError::Failed(format!(
                "{} {} returned {}",
                method, url, status
            )));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}
