//! Orchestrator configuration
//!
//! Defaults, overridable from the environment (`SQUADRON_*`) and then by the
//! CLI. Parsing goes through [`OrchestratorConfig::from_lookup`] so tests can
//! supply a map instead of mutating the process environment.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use squadron_state::{AgentRole, TeamMember};

use crate::error::ConfigError;

/// Per-call timeout for agent requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra implementation-loop iterations after the first
pub const DEFAULT_MAX_RETRIES: usize = 2;

/// Who receives a kickoff progress event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationScope {
    /// Every observer sees every project's events
    #[default]
    Broadcast,
    /// Only observers joined to the project's group (plus unscoped observers)
    ProjectGroup,
}

impl FromStr for NotificationScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "broadcast" | "all" => Ok(Self::Broadcast),
            "project" | "group" | "project-group" => Ok(Self::ProjectGroup),
            _ => Err(ConfigError::Invalid {
                key: "notification_scope".into(),
                value: s.into(),
            }),
        }
    }
}

/// How a work item whose agent could not be reached is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegradedPolicy {
    /// Record a successful response explaining the failure; task Completed
    #[default]
    SurfaceAsCompleted,
    /// Record an unsuccessful response; task Failed
    MarkFailed,
}

impl FromStr for DegradedPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "complete" | "completed" | "surface" => Ok(Self::SurfaceAsCompleted),
            "fail" | "failed" => Ok(Self::MarkFailed),
            _ => Err(ConfigError::Invalid {
                key: "degraded_policy".into(),
                value: s.into(),
            }),
        }
    }
}

/// Built-in endpoint for `role`.
pub fn default_endpoint(role: AgentRole) -> &'static str {
    match role {
        AgentRole::ProductOwner => "http://localhost:8001",
        AgentRole::ProjectManager => "http://localhost:8002",
        AgentRole::Designer => "http://localhost:8003",
        AgentRole::TechLead => "http://localhost:8004",
        AgentRole::Developer => "http://localhost:8005",
        AgentRole::QA => "http://localhost:8006",
        AgentRole::DevOps => "http://localhost:8007",
    }
}

/// Role to endpoint table with optional overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentEndpoints {
    overrides: HashMap<AgentRole, String>,
}

impl AgentEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point every role at `endpoint`.
    pub fn uniform(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let mut out = Self::new();
        for role in AgentRole::ALL {
            out.overrides.insert(role, endpoint.clone());
        }
        out
    }

    pub fn with_override(mut self, role: AgentRole, endpoint: impl Into<String>) -> Self {
        self.overrides.insert(role, endpoint.into());
        self
    }

    pub fn for_role(&self, role: AgentRole) -> &str {
        self.overrides
            .get(&role)
            .map(String::as_str)
            .unwrap_or_else(|| default_endpoint(role))
    }

    /// Endpoint for a specific team member: its own override wins.
    pub fn for_member<'a>(&'a self, member: &'a TeamMember) -> &'a str {
        member
            .agent_endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| self.for_role(member.role))
    }
}

/// Runtime settings for the orchestrator and executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub request_timeout: Duration,
    pub max_retries: usize,
    pub notification_scope: NotificationScope,
    pub degraded_policy: DegradedPolicy,
    pub endpoints: AgentEndpoints,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            notification_scope: NotificationScope::default(),
            degraded_policy: DegradedPolicy::default(),
            endpoints: AgentEndpoints::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("SQUADRON_AGENT_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| invalid("SQUADRON_AGENT_TIMEOUT_SECS", &raw))?;
            cfg.request_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("SQUADRON_MAX_RETRIES") {
            cfg.max_retries = raw
                .trim()
                .parse()
                .map_err(|_| invalid("SQUADRON_MAX_RETRIES", &raw))?;
        }
        if let Some(raw) = lookup("SQUADRON_NOTIFY_SCOPE") {
            cfg.notification_scope = raw
                .parse()
                .map_err(|_| invalid("SQUADRON_NOTIFY_SCOPE", &raw))?;
        }
        if let Some(raw) = lookup("SQUADRON_DEGRADED_POLICY") {
            cfg.degraded_policy = raw
                .parse()
                .map_err(|_| invalid("SQUADRON_DEGRADED_POLICY", &raw))?;
        }
        for role in AgentRole::ALL {
            let key = format!("SQUADRON_{}_URL", role.env_key());
            if let Some(url) = lookup(&key) {
                let url = url.trim();
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(invalid(&key, url));
                }
                cfg.endpoints = cfg.endpoints.with_override(role, url);
            }
        }

        Ok(cfg)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}
