//! Single agent calls with a guaranteed fallback.
//!
//! Every agent exposes `POST {endpoint}/execute`. [`AgentInvoker::invoke`]
//! sends one instruction to one role and always returns text: when the call
//! fails for any reason (unreachable, timeout, non-success status, malformed
//! body) it returns a deterministic, role-aware degraded string instead.
//!
//! The wire transport sits behind [`AgentTransport`] so tests can inject
//! canned replies; production uses [`HttpTransport`] (reqwest).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use squadron_state::AgentRole;

use crate::config::AgentEndpoints;
use crate::metrics::METRICS;
use crate::obs;

/// Title sent with every kickoff-stage request
pub const KICKOFF_TITLE: &str = "Kickoff Step";

/// Output used when a live agent replies without an `output` field
pub const EMPTY_RESPONSE: &str = "Empty response";

/// Canned architecture returned for TechLead when the agent cannot be reached.
/// The trailing array keeps task derivation fed during a full outage.
pub const TECH_LEAD_FALLBACK: &str = r#"⚠️ API Quota Exceeded - Using Default Architecture

Technical Stack: .NET Core + Angular + PostgreSQL

Development Tasks:
[
  { "title": "⚠️ Setup Base Solution", "description": "[SIMULATED] Create solution with Clean Architecture layers." },
  { "title": "⚠️ Implement Authentication", "description": "[SIMULATED] Setup JWT and Identity." },
  { "title": "⚠️ Create Core API", "description": "[SIMULATED] Implement basic CRUD endpoints." }
]"#;

/// Degraded-mode text for `role`.
pub fn fallback_output(role: AgentRole) -> String {
    match role {
        AgentRole::TechLead => TECH_LEAD_FALLBACK.to_string(),
        other => format!(
            "⚠️ API Quota Exceeded (Simulation Mode): {other} analyzed the requirements but \
             could not generate a live response due to API limits. Proceeding with simulated \
             workflow step."
        ),
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// JSON body of `POST {endpoint}/execute`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecuteRequest {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub project_name: String,
    pub project_description: String,
    pub priority: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
}

/// Decoded success body: `{output, tokensUsed, success}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentReply {
    pub output: Option<String>,
    pub tokens_used: u32,
    pub success: bool,
    /// Agent-reported error text, when present
    pub error: Option<String>,
}

/// Why an agent call produced no usable reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvokeError {
    #[error("agent unreachable: {0}")]
    Transport(String),

    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),

    #[error("agent failed: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("malformed agent response: {0}")]
    Decode(String),
}

/// Look up `names` in `obj`, ignoring ASCII case.
pub(crate) fn field_ci<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    obj.iter()
        .find(|(k, _)| names.iter().any(|n| k.eq_ignore_ascii_case(n)))
        .map(|(_, v)| v)
}

/// Decode a success body. Field names are matched case-insensitively;
/// `tokens_used` is accepted alongside `tokensUsed`.
pub fn decode_reply(body: &str) -> Result<AgentReply, InvokeError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| InvokeError::Decode(e.to_string()))?;
    let obj = match value {
        Value::Object(obj) => obj,
        Value::Null => return Ok(AgentReply::default()),
        other => {
            return Err(InvokeError::Decode(format!(
                "expected a JSON object, got {other}"
            )))
        }
    };

    let output = match field_ci(&obj, &["output"]) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => return Err(InvokeError::Decode(format!("output is not a string: {other}"))),
    };
    let tokens_used = match field_ci(&obj, &["tokensUsed", "tokens_used"]) {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_u64()
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .ok_or_else(|| InvokeError::Decode(format!("tokensUsed is not a count: {v}")))?,
    };
    let success = match field_ci(&obj, &["success"]) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(other) => return Err(InvokeError::Decode(format!("success is not a bool: {other}"))),
    };
    let error = field_ci(&obj, &["error"])
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(AgentReply {
        output,
        tokens_used,
        success,
        error,
    })
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Outbound call to one agent endpoint.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn execute(&self, endpoint: &str, request: &ExecuteRequest)
        -> Result<AgentReply, InvokeError>;
}

/// reqwest-backed transport with a per-call timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, InvokeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("squadron/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| InvokeError::Transport(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, err: reqwest::Error) -> InvokeError {
        if err.is_timeout() {
            InvokeError::Timeout(self.timeout)
        } else {
            InvokeError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn execute(
        &self,
        endpoint: &str,
        request: &ExecuteRequest,
    ) -> Result<AgentReply, InvokeError> {
        let url = format!("{}/execute", endpoint.trim_end_matches('/'));
        debug!(url = %url, task_id = %request.task_id, "calling agent");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(InvokeError::Status {
                status: status.as_u16(),
                body,
            });
        }
        decode_reply(&body)
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Minimal project context sent with every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectContext {
    pub name: String,
    pub description: String,
}

impl From<&squadron_state::Project> for ProjectContext {
    fn from(p: &squadron_state::Project) -> Self {
        Self {
            name: p.name.clone(),
            description: p.description.clone(),
        }
    }
}

/// Text produced by one kickoff-stage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutput {
    pub text: String,
    /// True when `text` is the fallback rather than a live reply
    pub degraded: bool,
}

/// Sends instructions to role endpoints.
#[derive(Clone)]
pub struct AgentInvoker {
    transport: Arc<dyn AgentTransport>,
    endpoints: AgentEndpoints,
}

impl AgentInvoker {
    pub fn new(transport: Arc<dyn AgentTransport>, endpoints: AgentEndpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    /// Invoker over [`HttpTransport`] with the given per-call timeout.
    pub fn http(timeout: Duration, endpoints: AgentEndpoints) -> Result<Self, InvokeError> {
        Ok(Self::new(Arc::new(HttpTransport::new(timeout)?), endpoints))
    }

    pub fn endpoints(&self) -> &AgentEndpoints {
        &self.endpoints
    }

    /// Raw call used by work item execution; failures are returned.
    pub async fn call(
        &self,
        endpoint: &str,
        request: &ExecuteRequest,
    ) -> Result<AgentReply, InvokeError> {
        self.transport.execute(endpoint, request).await
    }

    /// Send `instruction` to `role`. Never fails: any error yields the
    /// role's fallback text with `degraded = true`.
    #[instrument(skip(self, instruction, project), fields(role = %role))]
    pub async fn invoke(
        &self,
        role: AgentRole,
        instruction: &str,
        project: &ProjectContext,
    ) -> AgentOutput {
        let endpoint = self.endpoints.for_role(role);
        let request = ExecuteRequest {
            task_id: uuid::Uuid::new_v4().to_string(),
            title: KICKOFF_TITLE.to_string(),
            description: instruction.to_string(),
            project_name: project.name.clone(),
            project_description: project.description.clone(),
            priority: squadron_state::TaskPriority::High.to_string(),
            context: None,
            expected_output: None,
        };

        match self.transport.execute(endpoint, &request).await {
            Ok(reply) => AgentOutput {
                text: reply.output.unwrap_or_else(|| EMPTY_RESPONSE.to_string()),
                degraded: false,
            },
            Err(err) => {
                warn!(role = %role, error = %err, "Agent unreachable or failed");
                METRICS.inc_agent_fallbacks();
                obs::emit_agent_degraded(role.as_str(), &err);
                AgentOutput {
                    text: fallback_output(role),
                    degraded: true,
                }
            }
        }
    }
}
