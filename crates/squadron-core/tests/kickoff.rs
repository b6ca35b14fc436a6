//! Kickoff state machine: ordering, fallbacks, QA loop, task derivation,
//! single flight, cancellation and storage failures.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use squadron_core::kickoff::prompts::{KICKOFF_COMPLETED, QA_APPROVED, QA_REJECTED};
use squadron_core::{
    extract_tasks, AgentEndpoints, AgentInvoker, AgentReply, AgentTransport, ExecuteRequest,
    InvokeError, KickoffError, NotificationScope, Orchestrator, ProjectContext, QaVerdict,
    StepHub,
};
use squadron_state::fakes::MemoryStore;
use squadron_state::{AgentRole, ProjectId, ProjectStore, TaskPriority, TaskStatus, TaskStore};
use tokio::sync::{Barrier, Notify};
use tokio_util::sync::CancellationToken;

const TECH_LEAD_TASKS: &str = r#"Hexagonal architecture on Rust + Postgres.

[
  { "title": "Bootstrap workspace", "description": "Create crates and CI" },
  { "title": "Auth service" }
]"#;

fn orchestrator(
    store: &Arc<MemoryStore>,
    transport: Arc<dyn AgentTransport>,
    notifier: Arc<RecordingNotifier>,
) -> Orchestrator {
    Orchestrator::new(store.clone(), invoker(transport), notifier)
}

// ===========================================================================
// Full outage
// ===========================================================================

#[tokio::test]
async fn kickoff_completes_with_every_agent_unreachable() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Outage").await;
    let notifier = RecordingNotifier::new();
    let invoker = AgentInvoker::http(Duration::from_secs(2), AgentEndpoints::uniform(UNROUTABLE))
        .unwrap();
    let orch = Orchestrator::new(store.clone(), invoker, notifier.clone());

    let report = orch
        .run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap();

    let completed = notifier.completed();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].role, AgentRole::ProjectManager);
    assert_eq!(completed[0].content, KICKOFF_COMPLETED);
    assert_eq!(notifier.steps().last().unwrap(), &completed[0]);

    // Fallback text is never written as requirements.
    assert!(!report.requirements_updated);
    assert!(store.get_project(&project.id).await.unwrap().requirements.is_none());

    // The TechLead fallback still feeds task derivation.
    let tasks = store.list_tasks(Some(&project.id)).await.unwrap();
    let titles: Vec<_> = tasks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "⚠️ Setup Base Solution",
            "⚠️ Implement Authentication",
            "⚠️ Create Core API"
        ]
    );
    assert_eq!(report.derived_tasks.len(), 3);
    // Nine calls: four opening stages, two Developer/QA rounds, DevOps.
    assert_eq!(report.degraded_stages.len(), 9);
    assert_eq!(report.degraded_stages[2], AgentRole::TechLead);
}

#[tokio::test]
async fn tech_lead_fallback_carries_three_tasks() {
    let invoker = AgentInvoker::new(StubTransport::unreachable(), stub_endpoints());
    let ctx = ProjectContext {
        name: "Shop".into(),
        description: "An online shop".into(),
    };

    let out = invoker
        .invoke(AgentRole::TechLead, "Define architecture", &ctx)
        .await;
    assert!(out.degraded);

    let specs = extract_tasks(&out.text);
    let titles: Vec<_> = specs.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "⚠️ Setup Base Solution",
            "⚠️ Implement Authentication",
            "⚠️ Create Core API"
        ]
    );

    let designer = invoker.invoke(AgentRole::Designer, "Design", &ctx).await;
    assert!(designer.degraded);
    assert!(designer.text.contains("Designer"));
    assert!(extract_tasks(&designer.text).is_empty());
}

#[tokio::test]
async fn invoke_marks_missing_output_as_empty_response() {
    let transport = StubTransport::new(|_, _| {
        Ok(AgentReply {
            output: None,
            tokens_used: 0,
            success: true,
            error: None,
        })
    });
    let invoker = AgentInvoker::new(transport.clone(), stub_endpoints());
    let ctx = ProjectContext {
        name: "Shop".into(),
        description: "An online shop".into(),
    };
    let out = invoker.invoke(AgentRole::QA, "Test", &ctx).await;
    assert_eq!(out.text, "Empty response");
    assert!(!out.degraded);

    let (endpoint, request) = transport.calls().remove(0);
    assert_eq!(endpoint, "stub://QA");
    assert_eq!(request.title, "Kickoff Step");
    assert_eq!(request.priority, "High");
    assert_eq!(request.project_name, "Shop");
    assert_eq!(request.description, "Test");
}

// ===========================================================================
// Stage order and QA loop
// ===========================================================================

#[tokio::test]
async fn stages_run_in_fixed_order() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Order").await;
    let transport = StubTransport::echo();
    let notifier = RecordingNotifier::new();
    let orch = orchestrator(&store, transport.clone(), notifier.clone());

    orch.run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap();

    let thinking: Vec<AgentRole> = notifier
        .steps()
        .iter()
        .filter(|s| s.is_thinking)
        .map(|s| s.role)
        .collect();
    use AgentRole::*;
    assert_eq!(
        thinking,
        vec![
            ProjectManager,
            ProductOwner,
            TechLead,
            Designer,
            Developer,
            QA,
            Developer,
            QA,
            DevOps
        ]
    );
    assert!(notifier
        .steps()
        .iter()
        .all(|s| s.project_id == project.id && s.agent_name == s.role.to_string()));

    // Every call carries the project context.
    assert!(transport
        .calls()
        .iter()
        .all(|(_, r)| r.project_name == "Order" && r.project_description == "Order description"));
}

#[tokio::test]
async fn qa_loop_rejects_once_then_approves() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Loop").await;
    let transport = StubTransport::echo();
    let notifier = RecordingNotifier::new();
    let orch = orchestrator(&store, transport.clone(), notifier.clone());

    let report = orch
        .run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.qa_iterations, 2);
    assert!(report.qa_passed);
    assert_eq!(notifier.with_content(QA_REJECTED), 1);
    assert_eq!(notifier.with_content(QA_APPROVED), 1);

    let steps = notifier.steps();
    let rejected = steps.iter().position(|s| s.content == QA_REJECTED).unwrap();
    let approved = steps.iter().position(|s| s.content == QA_APPROVED).unwrap();
    assert!(rejected < approved);
    assert_eq!(steps[rejected].role, AgentRole::QA);

    let dev_calls = transport.calls_for(AgentRole::Developer);
    assert_eq!(dev_calls.len(), 2);
    assert!(dev_calls[0]
        .description
        .starts_with("Implement core structure based on design:\nDesigner output"));
    assert!(dev_calls[0].description.contains("And architecture:\nTechLead output"));
    assert_eq!(
        dev_calls[1].description,
        "Fix the bugs reported by QA and optimize the code."
    );

    let qa_calls = transport.calls_for(AgentRole::QA);
    assert_eq!(
        qa_calls[0].description,
        "Test this implementation:\nDeveloper output\n\nAnalyze for bugs and issues."
    );
}

#[tokio::test]
async fn gate_that_never_passes_is_bounded_by_retries() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Strict").await;
    let notifier = RecordingNotifier::new();
    let orch = orchestrator(&store, StubTransport::echo(), notifier.clone())
        .with_gate(|_: usize, _: &str| QaVerdict::Fail);

    let report = orch
        .run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.qa_iterations, 3);
    assert!(!report.qa_passed);
    assert_eq!(notifier.with_content(QA_REJECTED), 3);
    assert_eq!(notifier.with_content(QA_APPROVED), 0);
    assert_eq!(notifier.completed().len(), 1);
}

#[tokio::test]
async fn gate_sees_qa_output() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Content").await;
    let transport = StubTransport::new(|role, _| {
        Ok(live(match role {
            AgentRole::QA => "no bugs found",
            _ => "ok",
        }))
    });
    let orch = orchestrator(&store, transport, RecordingNotifier::new())
        .with_max_retries(0)
        .with_gate(|_: usize, out: &str| {
            if out == "no bugs found" {
                QaVerdict::Pass
            } else {
                QaVerdict::Fail
            }
        });

    let report = orch
        .run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.qa_iterations, 1);
    assert!(report.qa_passed);
}

// ===========================================================================
// Requirements and derived tasks
// ===========================================================================

#[tokio::test]
async fn live_requirements_are_persisted_and_tasks_derived() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Shop").await;
    let transport = StubTransport::new(|role, _| {
        Ok(live(match role {
            AgentRole::ProductOwner => "1. As a buyer I can pay".to_string(),
            AgentRole::TechLead => TECH_LEAD_TASKS.to_string(),
            other => format!("{other} output"),
        }))
    });
    let orch = orchestrator(&store, transport.clone(), RecordingNotifier::new());

    let report = orch
        .run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.requirements_updated);
    assert!(report.degraded_stages.is_empty());
    let stored = store.get_project(&project.id).await.unwrap();
    assert_eq!(stored.requirements.as_deref(), Some("1. As a buyer I can pay"));

    let tech_prompt = &transport.calls_for(AgentRole::TechLead)[0].description;
    assert!(tech_prompt.starts_with("Based on requirements:\n1. As a buyer I can pay"));

    let tasks = store.list_tasks(Some(&project.id)).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(report.derived_tasks, tasks.iter().map(|t| t.id).collect::<Vec<_>>());
    for task in &tasks {
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(task.assigned_to.is_none());
    }
    assert_eq!(tasks[0].description, "Create crates and CI");
    assert_eq!(tasks[1].title, "Auth service");
    assert_eq!(tasks[1].description, "Auth service");
}

#[tokio::test]
async fn unparseable_architecture_derives_nothing() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Prose").await;
    let notifier = RecordingNotifier::new();
    let orch = orchestrator(&store, StubTransport::echo(), notifier.clone());

    let report = orch
        .run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.derived_tasks.is_empty());
    assert!(store.list_tasks(Some(&project.id)).await.unwrap().is_empty());
    assert_eq!(notifier.completed().len(), 1);
}

// ===========================================================================
// Failures
// ===========================================================================

#[tokio::test]
async fn storage_failure_halts_the_run() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Down").await;
    let notifier = RecordingNotifier::new();
    let transport = StubTransport::echo();
    let orch = orchestrator(&store, transport.clone(), notifier.clone());

    store.fail_writes(true);
    let err = orch
        .run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, KickoffError::Storage(_)));
    assert!(notifier.completed().is_empty());
    assert!(transport.calls_for(AgentRole::TechLead).is_empty());
    assert!(!orch.is_running(&project.id));
}

#[tokio::test]
async fn unknown_project_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(&store, StubTransport::echo(), RecordingNotifier::new());
    let missing = ProjectId::new();

    let err = orch.start_kickoff(missing).await.unwrap_err();
    assert!(matches!(err, KickoffError::ProjectNotFound(id) if id == missing));
    assert!(!orch.is_running(&missing));
}

#[tokio::test]
async fn notifier_failures_do_not_stop_the_run() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Quiet").await;
    let orch = Orchestrator::new(
        store.clone(),
        invoker(StubTransport::echo()),
        Arc::new(FailingSink),
    );

    let report = orch
        .run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.qa_passed);
}

// ===========================================================================
// Concurrency
// ===========================================================================

/// Blocks every briefing call on a shared barrier.
struct BarrierTransport {
    barrier: Arc<Barrier>,
}

#[async_trait]
impl AgentTransport for BarrierTransport {
    async fn execute(
        &self,
        _endpoint: &str,
        request: &ExecuteRequest,
    ) -> Result<AgentReply, InvokeError> {
        if request.description.starts_with("Initiate project kickoff") {
            self.barrier.wait().await;
        }
        Ok(live("ok"))
    }
}

#[tokio::test]
async fn kickoffs_for_different_projects_run_concurrently() {
    let store = Arc::new(MemoryStore::new());
    let a = seed_project(&store, "A").await;
    let b = seed_project(&store, "B").await;
    let notifier = RecordingNotifier::new();
    let transport = Arc::new(BarrierTransport {
        barrier: Arc::new(Barrier::new(2)),
    });
    let orch = orchestrator(&store, transport, notifier.clone());

    let first = orch.start_kickoff(a.id).await.unwrap();
    let second = orch.start_kickoff(b.id).await.unwrap();

    // Each briefing waits for the other; a serialized run would hang here.
    let (ra, rb) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(first.join(), second.join())
    })
    .await
    .expect("kickoffs blocked each other");

    assert_eq!(ra.unwrap().project_id, a.id);
    assert_eq!(rb.unwrap().project_id, b.id);
    let completed = notifier.completed();
    assert_eq!(completed.len(), 2);
    assert!(completed.iter().any(|s| s.project_id == a.id));
    assert!(completed.iter().any(|s| s.project_id == b.id));
}

/// Signals when a ProductOwner call starts, then waits until released
/// (or forever when `release` is never notified).
struct GateTransport {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl AgentTransport for GateTransport {
    async fn execute(
        &self,
        endpoint: &str,
        _request: &ExecuteRequest,
    ) -> Result<AgentReply, InvokeError> {
        if endpoint == stub_endpoint(AgentRole::ProductOwner) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(live("ok"))
    }
}

fn gated() -> (Arc<GateTransport>, Arc<Notify>, Arc<Notify>) {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    (
        Arc::new(GateTransport {
            entered: entered.clone(),
            release: release.clone(),
        }),
        entered,
        release,
    )
}

#[tokio::test]
async fn second_trigger_for_same_project_conflicts() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Busy").await;
    let (transport, entered, release) = gated();
    let orch = orchestrator(&store, transport, RecordingNotifier::new());

    let handle = orch.start_kickoff(project.id).await.unwrap();
    entered.notified().await;

    let err = orch.start_kickoff(project.id).await.unwrap_err();
    assert!(matches!(err, KickoffError::AlreadyRunning(id) if id == project.id));
    let err = orch
        .run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, KickoffError::AlreadyRunning(_)));
    assert!(orch.is_running(&project.id));

    release.notify_one();
    handle.join().await.unwrap();
    assert!(!orch.is_running(&project.id));

    // Released: a new run may start.
    release.notify_one();
    let again = orch.start_kickoff(project.id).await.unwrap();
    again.join().await.unwrap();
}

#[tokio::test]
async fn cancel_stops_run_without_completed_event() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Stop").await;
    let (transport, entered, _release) = gated();
    let notifier = RecordingNotifier::new();
    let orch = orchestrator(&store, transport, notifier.clone());

    let handle = orch.start_kickoff(project.id).await.unwrap();
    entered.notified().await;
    assert!(orch.cancel(&project.id));

    let err = handle.join().await.unwrap_err();
    assert!(
        matches!(err, KickoffError::Cancelled { stage } if stage == "RequirementsAnalysis")
    );
    assert!(notifier.completed().is_empty());
    assert!(notifier
        .steps()
        .iter()
        .all(|s| s.role != AgentRole::TechLead));
    assert!(!orch.is_running(&project.id));
}

#[tokio::test]
async fn shutdown_cancels_in_flight_and_future_runs() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Shutdown").await;
    let other = seed_project(&store, "Later").await;
    let (transport, entered, _release) = gated();
    let orch = orchestrator(&store, transport, RecordingNotifier::new());

    let handle = orch.start_kickoff(project.id).await.unwrap();
    entered.notified().await;
    orch.shutdown();

    assert!(matches!(
        handle.join().await.unwrap_err(),
        KickoffError::Cancelled { .. }
    ));

    let err = orch
        .run_kickoff(other.id, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, KickoffError::Cancelled { stage } if stage == "Briefing"));
}

#[tokio::test]
async fn caller_token_cancels_inline_run() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Inline").await;
    let orch = orchestrator(&store, StubTransport::echo(), RecordingNotifier::new());

    let token = CancellationToken::new();
    token.cancel();
    let err = orch.run_kickoff(project.id, token).await.unwrap_err();
    assert!(matches!(err, KickoffError::Cancelled { stage } if stage == "Briefing"));
}

// ===========================================================================
// Notification scope
// ===========================================================================

#[tokio::test]
async fn broadcast_scope_leaks_events_to_other_projects_observers() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Loud").await;
    let hub = StepHub::new(1024, NotificationScope::Broadcast);
    let mut elsewhere = hub.subscribe(Some(ProjectId::new()));
    let orch = Orchestrator::new(
        store.clone(),
        invoker(StubTransport::echo()),
        Arc::new(hub.clone()),
    );

    orch.run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap();

    let first = elsewhere.recv().await.unwrap();
    assert_eq!(first.project_id, project.id);
}

#[tokio::test]
async fn project_scope_keeps_events_in_their_group() {
    let store = Arc::new(MemoryStore::new());
    let project = seed_project(&store, "Scoped").await;
    let hub = StepHub::new(1024, NotificationScope::ProjectGroup);
    let mut mine = hub.subscribe(Some(project.id));
    let mut elsewhere = hub.subscribe(Some(ProjectId::new()));
    let orch = Orchestrator::new(
        store.clone(),
        invoker(StubTransport::echo()),
        Arc::new(hub.clone()),
    );

    orch.run_kickoff(project.id, CancellationToken::new())
        .await
        .unwrap();

    let mut seen = 0;
    loop {
        let step = mine.recv().await.unwrap();
        seen += 1;
        if step.is_completed {
            break;
        }
    }
    assert!(seen > 10);
    assert!(
        tokio::time::timeout(Duration::from_millis(50), elsewhere.recv())
            .await
            .is_err()
    );
}
