//! Squadron CLI
//!
//! The `squadron` command manages projects, team members and work items,
//! triggers kickoffs and executes individual tasks against their agents.
//!
//! ## Commands
//!
//! - `project`: create or list projects
//! - `member`: add or list team members (agents)
//! - `task`: add, list, assign, execute tasks and show their responses
//! - `kickoff`: run the kickoff sequence for a project, streaming progress
//! - `demo`: in-memory end-to-end run (kickoff, then execute a derived task)

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use squadron_core::{
    AgentInvoker, DegradedPolicy, KickoffReport, NotificationScope, Orchestrator,
    OrchestratorConfig, StepHub, TaskExecutor, UpdateChannel, WorkflowStep,
};
use squadron_state::fakes::MemoryStore;
use squadron_state::{
    AgentResponse, AgentRole, MemberId, Project, ProjectId, Store, SurrealStore, TaskId,
    TaskPriority, TeamMember, WorkItem,
};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "squadron")]
#[command(author = "Squadron Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Orchestrate role-specialised agents through a project kickoff", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    runtime: RuntimeArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of `SQUADRON_*` environment settings.
#[derive(Args, Debug, Default)]
struct RuntimeArgs {
    /// Database URL (e.g. surrealkv://.squadron/db, mem://, ws://host:8000)
    #[arg(long, global = true, env = "SQUADRON_DB_URL")]
    db_url: Option<String>,

    /// Use a throwaway in-memory store
    #[arg(long, global = true)]
    memory: bool,

    /// Per-call agent timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Extra implementation/QA iterations after the first
    #[arg(long, global = true)]
    max_retries: Option<usize>,

    /// Who sees kickoff events: broadcast or project
    #[arg(long, global = true)]
    notify_scope: Option<String>,

    /// Finalization of tasks whose agent is unreachable: complete or fail
    #[arg(long, global = true)]
    degraded_policy: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage team members
    Member {
        #[command(subcommand)]
        action: MemberAction,
    },

    /// Manage and execute work items
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Run the kickoff sequence for a project and stream its progress
    Kickoff {
        /// Project ID
        project: String,
    },

    /// Run a kickoff and one task execution against an in-memory store
    Demo {
        #[arg(long, default_value = "Demo Shop")]
        name: String,

        #[arg(long, default_value = "An online shop selling handmade furniture")]
        description: String,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project
    Create {
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// List projects
    List,
}

#[derive(Subcommand)]
enum MemberAction {
    /// Add a team member
    Add {
        name: String,

        /// ProductOwner, ProjectManager, Designer, TechLead, Developer, QA or DevOps
        #[arg(short, long)]
        role: String,

        /// Agent endpoint for this member (default: the role's endpoint)
        #[arg(short, long)]
        endpoint: Option<String>,

        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// List team members
    List,
}

#[derive(Subcommand)]
enum TaskAction {
    /// Add a task to a project
    Add {
        /// Project ID
        #[arg(short, long)]
        project: String,

        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Low, Medium, High or Critical
        #[arg(long, default_value = "Medium")]
        priority: String,

        /// Team member ID to assign
        #[arg(short, long)]
        assign: Option<String>,

        #[arg(long)]
        context: Option<String>,

        #[arg(long)]
        expected_output: Option<String>,
    },
    /// List tasks, optionally for one project
    List {
        #[arg(short, long)]
        project: Option<String>,
    },
    /// Assign a task to a team member
    Assign {
        /// Task ID
        task: String,

        /// Team member ID
        member: String,
    },
    /// Execute an assigned task against its agent
    Execute {
        /// Task ID
        task: String,
    },
    /// Show the recorded responses for a task
    Responses {
        /// Task ID
        task: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    squadron_core::init_tracing(cli.json, level);

    let config = load_config(&cli.runtime)?;

    if let Commands::Demo { name, description } = &cli.command {
        return cmd_demo(&config, name, description).await;
    }

    let store = open_store(&cli.runtime).await?;

    match cli.command {
        Commands::Project { action } => match action {
            ProjectAction::Create { name, description } => {
                cmd_project_create(&store, &name, &description).await.map(|_| ())
            }
            ProjectAction::List => cmd_project_list(&store).await,
        },
        Commands::Member { action } => match action {
            MemberAction::Add {
                name,
                role,
                endpoint,
                description,
            } => cmd_member_add(&store, &name, &role, endpoint, &description)
                .await
                .map(|_| ()),
            MemberAction::List => cmd_member_list(&store).await,
        },
        Commands::Task { action } => match action {
            TaskAction::Add {
                project,
                title,
                description,
                priority,
                assign,
                context,
                expected_output,
            } => {
                let draft = TaskDraft {
                    project,
                    title,
                    description,
                    priority,
                    assign,
                    context,
                    expected_output,
                };
                cmd_task_add(&store, draft).await.map(|_| ())
            }
            TaskAction::List { project } => cmd_task_list(&store, project.as_deref()).await,
            TaskAction::Assign { task, member } => cmd_task_assign(&store, &task, &member).await,
            TaskAction::Execute { task } => cmd_task_execute(&store, &config, &task)
                .await
                .map(|_| ()),
            TaskAction::Responses { task } => cmd_task_responses(&store, &task).await,
        },
        Commands::Kickoff { project } => cmd_kickoff(&store, &config, &project).await.map(|_| ()),
        // handled before the store is opened
        Commands::Demo { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn load_config(args: &RuntimeArgs) -> Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::from_env().context("Invalid SQUADRON_* configuration")?;
    apply_overrides(&mut config, args)?;
    Ok(config)
}

fn apply_overrides(config: &mut OrchestratorConfig, args: &RuntimeArgs) -> Result<()> {
    if let Some(secs) = args.timeout {
        if secs == 0 {
            bail!("--timeout must be at least 1 second");
        }
        config.request_timeout = Duration::from_secs(secs);
    }
    if let Some(retries) = args.max_retries {
        config.max_retries = retries;
    }
    if let Some(scope) = &args.notify_scope {
        config.notification_scope = NotificationScope::from_str(scope)?;
    }
    if let Some(policy) = &args.degraded_policy {
        config.degraded_policy = DegradedPolicy::from_str(policy)?;
    }
    Ok(())
}

async fn open_store(args: &RuntimeArgs) -> Result<Arc<dyn Store>> {
    if args.memory {
        info!("Using in-memory store; nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = match &args.db_url {
        Some(url) => SurrealStore::connect(url).await,
        None => SurrealStore::from_env().await,
    }
    .context("Failed to connect to Squadron database")?;
    Ok(Arc::new(store))
}

fn parse_id<T>(kind: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid {kind} id '{raw}'"))
}

fn executor(store: &Arc<dyn Store>, config: &OrchestratorConfig) -> Result<TaskExecutor> {
    let invoker = AgentInvoker::http(config.request_timeout, config.endpoints.clone())?;
    Ok(TaskExecutor::new(store.clone(), invoker)
        .with_policy(config.degraded_policy)
        .with_publisher(Arc::new(UpdateChannel::default())))
}

// ---------------------------------------------------------------------------
// Projects and members
// ---------------------------------------------------------------------------

async fn cmd_project_create(
    store: &Arc<dyn Store>,
    name: &str,
    description: &str,
) -> Result<ProjectId> {
    if name.trim().is_empty() {
        bail!("Project name must not be empty");
    }
    let project = Project::new(name, description);
    store.create_project(project.clone()).await?;
    println!("Created project '{}' ({})", project.name, project.id);
    Ok(project.id)
}

async fn cmd_project_list(store: &Arc<dyn Store>) -> Result<()> {
    let projects = store.list_projects().await?;
    if projects.is_empty() {
        println!("No projects found. Run 'squadron project create' first.");
        return Ok(());
    }
    for p in projects {
        println!("{}  {:<12} {}", p.id, p.status, p.name);
        if let Some(req) = &p.requirements {
            let first = req.lines().next().unwrap_or_default();
            println!("    requirements: {first}");
        }
    }
    Ok(())
}

async fn cmd_member_add(
    store: &Arc<dyn Store>,
    name: &str,
    role: &str,
    endpoint: Option<String>,
    description: &str,
) -> Result<MemberId> {
    let role: AgentRole = role.parse()?;
    let mut member = TeamMember::new(name, role);
    member.description = description.to_string();
    if let Some(endpoint) = endpoint {
        member = member.with_endpoint(endpoint);
    }
    store.create_member(member.clone()).await?;
    println!("Added {} as {} ({})", member.name, member.role, member.id);
    Ok(member.id)
}

async fn cmd_member_list(store: &Arc<dyn Store>) -> Result<()> {
    let members = store.list_members().await?;
    if members.is_empty() {
        println!("No team members found.");
        return Ok(());
    }
    for m in members {
        let endpoint = m.agent_endpoint.as_deref().unwrap_or("(role default)");
        println!("{}  {:<15} {:<20} {}", m.id, m.role, m.name, endpoint);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

struct TaskDraft {
    project: String,
    title: String,
    description: String,
    priority: String,
    assign: Option<String>,
    context: Option<String>,
    expected_output: Option<String>,
}

async fn cmd_task_add(store: &Arc<dyn Store>, draft: TaskDraft) -> Result<TaskId> {
    let project_id: ProjectId = parse_id("project", &draft.project)?;
    store
        .get_project(&project_id)
        .await
        .with_context(|| format!("Project {project_id} not found"))?;
    let priority: TaskPriority = draft.priority.parse()?;

    let mut task =
        WorkItem::new(project_id, draft.title, draft.description).with_priority(priority);
    task.context = draft.context;
    task.expected_output = draft.expected_output;
    if let Some(raw) = draft.assign {
        let member_id: MemberId = parse_id("member", &raw)?;
        store
            .get_member(&member_id)
            .await
            .with_context(|| format!("Team member {member_id} not found"))?;
        task = task.assigned_to(member_id);
    }

    store.create_task(task.clone()).await?;
    println!("Created task '{}' ({}) [{}]", task.title, task.id, task.status);
    Ok(task.id)
}

async fn cmd_task_list(store: &Arc<dyn Store>, project: Option<&str>) -> Result<()> {
    let project_id = project
        .map(|p| parse_id::<ProjectId>("project", p))
        .transpose()?;
    let tasks = store.list_tasks(project_id.as_ref()).await?;
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }
    for t in tasks {
        let assignee = t
            .assigned_to
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<11} {:<8} {}  (assignee: {})",
            t.id, t.status, t.priority, t.title, assignee
        );
    }
    Ok(())
}

async fn cmd_task_assign(store: &Arc<dyn Store>, task: &str, member: &str) -> Result<()> {
    let task_id: TaskId = parse_id("task", task)?;
    let member_id: MemberId = parse_id("member", member)?;
    let task = store
        .get_task(&task_id)
        .await
        .with_context(|| format!("Task {task_id} not found"))?;
    if task.status.is_terminal() {
        bail!("Task {task_id} is already {}", task.status);
    }
    let member = store
        .get_member(&member_id)
        .await
        .with_context(|| format!("Team member {member_id} not found"))?;

    let task = task.assigned_to(member.id);
    store.update_task(&task).await?;
    println!(
        "Assigned '{}' ({}) to {} [{}]",
        task.title, task.id, member.name, task.status
    );
    Ok(())
}

async fn cmd_task_execute(
    store: &Arc<dyn Store>,
    config: &OrchestratorConfig,
    task: &str,
) -> Result<AgentResponse> {
    let task_id: TaskId = parse_id("task", task)?;
    let report = executor(store, config)?
        .execute_detailed(task_id)
        .await
        .with_context(|| format!("Failed to execute task {task_id}"))?;

    println!(
        "Task {} -> {} ({})",
        task_id,
        report.status,
        report.outcome.as_str()
    );
    print_response(&report.response);
    Ok(report.response)
}

async fn cmd_task_responses(store: &Arc<dyn Store>, task: &str) -> Result<()> {
    let task_id: TaskId = parse_id("task", task)?;
    let responses = store.list_responses(&task_id).await?;
    if responses.is_empty() {
        println!("No responses recorded for task {task_id}.");
    }
    for r in &responses {
        print_response(r);
        println!();
    }
    Ok(())
}

fn print_response(r: &AgentResponse) {
    println!("response {}", r.id);
    println!(
        "  success: {}  tokens: {}  time: {:.0}ms",
        r.is_successful, r.tokens_used, r.processing_time_ms
    );
    if let Some(err) = &r.error_message {
        println!("  error: {err}");
    }
    println!();
    for line in r.content.lines() {
        println!("    {line}");
    }
}

// ---------------------------------------------------------------------------
// Kickoff
// ---------------------------------------------------------------------------

async fn cmd_kickoff(
    store: &Arc<dyn Store>,
    config: &OrchestratorConfig,
    project: &str,
) -> Result<KickoffReport> {
    let project_id: ProjectId = parse_id("project", project)?;
    let hub = StepHub::new(1024, config.notification_scope);
    let orchestrator = Orchestrator::from_config(store.clone(), Arc::new(hub.clone()), config)?;
    run_kickoff(&orchestrator, &hub, project_id).await
}

async fn run_kickoff(
    orchestrator: &Orchestrator,
    hub: &StepHub,
    project_id: ProjectId,
) -> Result<KickoffReport> {
    let mut steps = hub.subscribe(Some(project_id));
    let handle = orchestrator
        .start_kickoff(project_id)
        .await
        .with_context(|| format!("Failed to start kickoff for {project_id}"))?;
    info!(project_id = %project_id, "Kickoff started");

    let printer = tokio::spawn(async move {
        while let Some(step) = steps.recv().await {
            print_step(&step);
            if step.is_completed {
                break;
            }
        }
    });

    let join = handle.join();
    tokio::pin!(join);
    let result = tokio::select! {
        res = &mut join => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; cancelling kickoff");
            orchestrator.cancel(&project_id);
            join.await
        }
    };

    match result {
        Ok(report) => {
            printer.await.ok();
            println!();
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(report)
        }
        Err(e) => {
            printer.abort();
            Err(e).context("Kickoff did not complete")
        }
    }
}

fn print_step(step: &WorkflowStep) {
    if step.is_thinking {
        println!("[{}] ... {}", step.agent_name, step.content);
    } else if step.is_completed {
        println!("[{}] ✔ {}", step.agent_name, step.content);
    } else {
        println!("[{}]", step.agent_name);
        for line in step.content.lines() {
            println!("    {line}");
        }
    }
}

// ---------------------------------------------------------------------------
// Demo
// ---------------------------------------------------------------------------

async fn cmd_demo(config: &OrchestratorConfig, name: &str, description: &str) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let project_id = cmd_project_create(&store, name, description).await?;

    let mut developer = None;
    for role in AgentRole::ALL {
        let id = cmd_member_add(&store, &format!("{role} agent"), role.as_str(), None, "").await?;
        if role == AgentRole::Developer {
            developer = Some(id);
        }
    }
    let developer = developer.context("no Developer member was created")?;

    let hub = StepHub::new(1024, config.notification_scope);
    let orchestrator = Orchestrator::from_config(store.clone(), Arc::new(hub.clone()), config)?;
    let report = run_kickoff(&orchestrator, &hub, project_id).await?;

    let Some(first) = report.derived_tasks.first() else {
        println!("No tasks were derived; nothing to execute.");
        return Ok(());
    };
    cmd_task_assign(&store, &first.to_string(), &developer.to_string()).await?;
    println!();
    cmd_task_execute(&store, config, &first.to_string()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use squadron_state::TaskStatus;

    fn memory() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn runtime_flags_override_config() {
        let cli = Cli::try_parse_from([
            "squadron",
            "--timeout",
            "5",
            "--notify-scope",
            "project",
            "--degraded-policy",
            "fail",
            "--max-retries",
            "1",
            "project",
            "list",
        ])
        .unwrap();
        let mut config = OrchestratorConfig::default();
        apply_overrides(&mut config, &cli.runtime).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.notification_scope, NotificationScope::ProjectGroup);
        assert_eq!(config.degraded_policy, DegradedPolicy::MarkFailed);
        assert_eq!(config.max_retries, 1);
    }

    #[test]
    fn bad_override_is_rejected() {
        let args = RuntimeArgs {
            notify_scope: Some("everyone".into()),
            ..RuntimeArgs::default()
        };
        assert!(apply_overrides(&mut OrchestratorConfig::default(), &args).is_err());

        let args = RuntimeArgs {
            timeout: Some(0),
            ..RuntimeArgs::default()
        };
        assert!(apply_overrides(&mut OrchestratorConfig::default(), &args).is_err());
    }

    #[tokio::test]
    async fn task_add_assigns_member() {
        let store = memory();
        let project = cmd_project_create(&store, "Shop", "sells things").await.unwrap();
        let member = cmd_member_add(&store, "Dev", "developer", None, "")
            .await
            .unwrap();

        let task_id = cmd_task_add(
            &store,
            TaskDraft {
                project: project.to_string(),
                title: "Cart".into(),
                description: "Shopping cart".into(),
                priority: "high".into(),
                assign: Some(member.to_string()),
                context: None,
                expected_output: Some("PR".into()),
            },
        )
        .await
        .unwrap();

        let task = store.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.assigned_to, Some(member));
        assert_eq!(task.expected_output.as_deref(), Some("PR"));
    }

    #[tokio::test]
    async fn task_assign_moves_derived_task_to_assigned() {
        let store = memory();
        let project = cmd_project_create(&store, "Shop", "sells things").await.unwrap();
        let derived = WorkItem::new(project, "Catalog", "Product catalog");
        store.create_task(derived.clone()).await.unwrap();
        let member = cmd_member_add(&store, "Dev", "Developer", None, "")
            .await
            .unwrap();

        assert!(cmd_task_assign(&store, &derived.id.to_string(), &MemberId::new().to_string())
            .await
            .is_err());
        assert_eq!(
            store.get_task(&derived.id).await.unwrap().status,
            TaskStatus::Pending
        );

        cmd_task_assign(&store, &derived.id.to_string(), &member.to_string())
            .await
            .unwrap();
        let task = store.get_task(&derived.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_to, Some(member));
    }

    #[tokio::test]
    async fn task_add_rejects_unknown_project_and_bad_ids() {
        let store = memory();
        let draft = |project: String| TaskDraft {
            project,
            title: "t".into(),
            description: String::new(),
            priority: "Medium".into(),
            assign: None,
            context: None,
            expected_output: None,
        };
        assert!(cmd_task_add(&store, draft("not-a-uuid".into())).await.is_err());
        assert!(cmd_task_add(&store, draft(ProjectId::new().to_string()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn member_add_rejects_unknown_role() {
        let store = memory();
        assert!(cmd_member_add(&store, "Jan", "Janitor", None, "").await.is_err());
    }

    #[tokio::test]
    async fn execute_against_unreachable_agent_records_degraded_response() {
        let store = memory();
        let project = cmd_project_create(&store, "Offline", "no agents").await.unwrap();
        let member = cmd_member_add(
            &store,
            "Dev",
            "Developer",
            Some("http://127.0.0.1:1".into()),
            "",
        )
        .await
        .unwrap();
        let task_id = cmd_task_add(
            &store,
            TaskDraft {
                project: project.to_string(),
                title: "Offline work".into(),
                description: String::new(),
                priority: "Low".into(),
                assign: Some(member.to_string()),
                context: None,
                expected_output: None,
            },
        )
        .await
        .unwrap();

        let response = cmd_task_execute(&store, &OrchestratorConfig::default(), &task_id.to_string())
            .await
            .unwrap();
        assert!(response.is_successful);
        assert!(response.error_message.is_some());
        assert_eq!(
            store.get_task(&task_id).await.unwrap().status,
            TaskStatus::Completed
        );
    }
}
