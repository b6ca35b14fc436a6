//! Shared fixtures: scripted transports, recording notifiers, seeded stores.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use squadron_core::notifier::NotifyError;
use squadron_core::{
    AgentEndpoints, AgentInvoker, AgentReply, AgentTransport, ExecuteRequest, InvokeError,
    StepNotifier, TaskUpdate, UpdatePublisher, WorkflowStep,
};
use squadron_state::fakes::MemoryStore;
use squadron_state::{AgentRole, Project, ProjectStore};

/// Endpoint that refuses connections immediately.
pub const UNROUTABLE: &str = "http://127.0.0.1:1";

type Handler = dyn Fn(AgentRole, &ExecuteRequest) -> Result<AgentReply, InvokeError> + Send + Sync;

/// Transport answering from a closure keyed by the role encoded in the
/// endpoint (`stub://<Role>`).
pub struct StubTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<(String, ExecuteRequest)>>,
}

impl StubTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(AgentRole, &ExecuteRequest) -> Result<AgentReply, InvokeError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every role answers `"<Role> output"`.
    pub fn echo() -> Arc<Self> {
        Self::new(|role, _| Ok(live(format!("{role} output"))))
    }

    pub fn unreachable() -> Arc<Self> {
        Self::new(|_, _| Err(InvokeError::Transport("connection refused".into())))
    }

    pub fn calls(&self) -> Vec<(String, ExecuteRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, role: AgentRole) -> Vec<ExecuteRequest> {
        let endpoint = stub_endpoint(role);
        self.calls()
            .into_iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, r)| r)
            .collect()
    }
}

#[async_trait]
impl AgentTransport for StubTransport {
    async fn execute(
        &self,
        endpoint: &str,
        request: &ExecuteRequest,
    ) -> Result<AgentReply, InvokeError> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.to_string(), request.clone()));
        let role = endpoint
            .strip_prefix("stub://")
            .and_then(|r| r.parse::<AgentRole>().ok())
            .ok_or_else(|| InvokeError::Transport(format!("unknown endpoint {endpoint}")))?;
        (self.handler)(role, request)
    }
}

pub fn live(output: impl Into<String>) -> AgentReply {
    AgentReply {
        output: Some(output.into()),
        tokens_used: 10,
        success: true,
        error: None,
    }
}

pub fn stub_endpoint(role: AgentRole) -> String {
    format!("stub://{role}")
}

/// Each role at `stub://<Role>`.
pub fn stub_endpoints() -> AgentEndpoints {
    AgentRole::ALL
        .into_iter()
        .fold(AgentEndpoints::new(), |acc, role| {
            acc.with_override(role, stub_endpoint(role))
        })
}

pub fn invoker(transport: Arc<dyn AgentTransport>) -> AgentInvoker {
    AgentInvoker::new(transport, stub_endpoints())
}

/// Collects every step in emission order.
#[derive(Default)]
pub struct RecordingNotifier {
    steps: Mutex<Vec<WorkflowStep>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn steps(&self) -> Vec<WorkflowStep> {
        self.steps.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<WorkflowStep> {
        self.steps().into_iter().filter(|s| s.is_completed).collect()
    }

    pub fn with_content(&self, content: &str) -> usize {
        self.steps().iter().filter(|s| s.content == content).count()
    }
}

#[async_trait]
impl StepNotifier for RecordingNotifier {
    async fn notify(&self, step: WorkflowStep) -> Result<(), NotifyError> {
        self.steps.lock().unwrap().push(step);
        Ok(())
    }
}

/// Notifier and publisher whose sink is always down.
pub struct FailingSink;

#[async_trait]
impl StepNotifier for FailingSink {
    async fn notify(&self, _step: WorkflowStep) -> Result<(), NotifyError> {
        Err(NotifyError::Closed)
    }
}

#[async_trait]
impl UpdatePublisher for FailingSink {
    async fn publish(&self, _channel: &str, _update: &TaskUpdate) -> Result<(), NotifyError> {
        Err(NotifyError::Delivery("broker down".into()))
    }
}

pub async fn seed_project(store: &MemoryStore, name: &str) -> Project {
    let project = Project::new(name, format!("{name} description"));
    store.create_project(project.clone()).await.unwrap();
    project
}
