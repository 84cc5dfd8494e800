use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "flowline")]
#[command(about = "Tenant-scoped workflow automation engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage workflow definitions
    Workflows {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Trigger a workflow manually and wait for the run to finish
    Trigger {
        /// Workflow ID
        workflow_id: String,

        /// Trigger payload as a JSON object
        #[arg(short, long)]
        payload: Option<String>,

        /// Tenant to act as (defaults to the workflow's tenant)
        #[arg(long)]
        tenant: Option<String>,

        /// Actor recorded on the execution
        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Inspect and manage executions
    Executions {
        #[command(subcommand)]
        action: ExecutionAction,
    },

    /// Publish a domain event and run the workflows that listen for it
    Emit {
        /// Event name, e.g. lead_created
        event: String,

        /// Tenant the event belongs to
        #[arg(long)]
        tenant: String,

        /// Event payload as a JSON object
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// List the registered action types
    Actions,

    /// Run the engine service (recovery sweep, event bus, schedule ticker)
    Serve,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// List workflows
    List {
        /// Only show workflows owned by this tenant
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Show a workflow definition
    Show {
        /// Workflow ID
        workflow_id: String,
    },

    /// Create a workflow from a JSON definition file
    Create {
        /// Path to the definition file
        file: String,
    },

    /// Activate a workflow
    Activate {
        /// Workflow ID
        workflow_id: String,
    },

    /// Deactivate a workflow (in-flight runs finish, no new admissions)
    Deactivate {
        /// Workflow ID
        workflow_id: String,
    },

    /// Delete a workflow
    Delete {
        /// Workflow ID
        workflow_id: String,
    },
}

#[derive(Subcommand)]
enum ExecutionAction {
    /// Search executions
    List {
        /// Filter by workflow ID
        #[arg(long)]
        workflow: Option<String>,

        /// Filter by tenant
        #[arg(long)]
        tenant: Option<String>,

        /// Filter by status (pending, running, completed, failed, cancelled)
        #[arg(long)]
        status: Option<String>,

        /// Filter by trigger kind (manual, event, schedule)
        #[arg(long)]
        trigger: Option<String>,

        /// Only executions started at or after this RFC 3339 timestamp
        #[arg(long)]
        started_after: Option<String>,

        /// Only executions started at or before this RFC 3339 timestamp
        #[arg(long)]
        started_before: Option<String>,

        /// Maximum number of rows
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Rows to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show one execution with its action logs
    Show {
        /// Execution ID
        execution_id: String,
    },

    /// Show the action logs of an execution
    Logs {
        /// Execution ID
        execution_id: String,
    },

    /// Cancel a pending or running execution
    Cancel {
        /// Execution ID
        execution_id: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
            CompletionShell::PowerShell => Shell::PowerShell,
            CompletionShell::Elvish => Shell::Elvish,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "flowline=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Workflows { action } => match action {
            WorkflowAction::List { tenant } => cmd_workflow_list(tenant.as_deref()).await,
            WorkflowAction::Show { workflow_id } => cmd_workflow_show(&workflow_id).await,
            WorkflowAction::Create { file } => cmd_workflow_create(&file).await,
            WorkflowAction::Activate { workflow_id } => {
                cmd_workflow_set_active(&workflow_id, true).await
            }
            WorkflowAction::Deactivate { workflow_id } => {
                cmd_workflow_set_active(&workflow_id, false).await
            }
            WorkflowAction::Delete { workflow_id } => cmd_workflow_delete(&workflow_id).await,
        },
        Commands::Trigger {
            workflow_id,
            payload,
            tenant,
            actor,
        } => cmd_trigger(&workflow_id, payload.as_deref(), tenant.as_deref(), &actor).await,
        Commands::Executions { action } => match action {
            ExecutionAction::List {
                workflow,
                tenant,
                status,
                trigger,
                started_after,
                started_before,
                limit,
                offset,
            } => {
                cmd_execution_list(
                    workflow,
                    tenant,
                    status.as_deref(),
                    trigger.as_deref(),
                    started_after.as_deref(),
                    started_before.as_deref(),
                    limit,
                    offset,
                )
                .await
            }
            ExecutionAction::Show { execution_id } => cmd_execution_show(&execution_id).await,
            ExecutionAction::Logs { execution_id } => cmd_execution_logs(&execution_id).await,
            ExecutionAction::Cancel { execution_id } => cmd_execution_cancel(&execution_id).await,
        },
        Commands::Emit {
            event,
            tenant,
            payload,
        } => cmd_emit(&event, &tenant, payload.as_deref()).await,
        Commands::Actions => cmd_actions_list(),
        Commands::Serve => cmd_serve().await,
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
    }
}

async fn cmd_workflow_list(tenant: Option<&str>) -> anyhow::Result<()> {
    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;
    let workflows = storage.list_workflows(tenant).await?;

    if workflows.is_empty() {
        println!("No workflows found.");
        println!("Create one with: flowline workflows create <file.json>");
        return Ok(());
    }

    println!(
        "{:<36} {:<24} {:<14} {:<18} {:<8}",
        "ID", "NAME", "TENANT", "TRIGGER", "ACTIVE"
    );
    println!("{}", "-".repeat(102));

    for workflow in &workflows {
        println!(
            "{:<36} {:<24} {:<14} {:<18} {:<8}",
            workflow.id,
            truncate(&workflow.name, 24),
            truncate(&workflow.tenant_id, 14),
            describe_trigger(&workflow.trigger),
            if workflow.active { "yes" } else { "no" },
        );
    }

    println!("\n{} workflow(s)", workflows.len());
    Ok(())
}

async fn cmd_workflow_show(workflow_id: &str) -> anyhow::Result<()> {
    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;
    let workflow = storage
        .get_workflow(workflow_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;

    println!("Workflow: {}", workflow.name);
    println!("  ID:      {}", workflow.id);
    println!("  Tenant:  {}", workflow.tenant_id);
    println!("  Trigger: {}", describe_trigger(&workflow.trigger));
    println!("  Active:  {}", if workflow.active { "yes" } else { "no" });
    println!(
        "  Created: {}",
        workflow.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  Updated: {}",
        workflow.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    match &workflow.condition {
        Some(condition) => println!("  Condition: {}", serde_json::to_string(condition)?),
        None => println!("  Condition: none (always runs)"),
    }

    println!("\nActions ({}):", workflow.actions.len());
    for (index, action) in workflow.actions.iter().enumerate() {
        let name = action.name.as_deref().unwrap_or("-");
        let timeout = action
            .timeout_secs
            .map(|secs| format!("{}s", secs))
            .unwrap_or_else(|| "default".to_string());
        println!(
            "  [{}] {:<20} name={:<24} timeout={}",
            index,
            action.params.kind(),
            truncate(name, 24),
            timeout,
        );
    }

    Ok(())
}

async fn cmd_workflow_create(file: &str) -> anyhow::Result<()> {
    use flowline::workflow::Workflow;

    let contents = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file, e))?;
    let workflow: Workflow = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Invalid workflow definition: {}", e))?;

    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;
    storage.save_workflow(&workflow).await?;

    println!("✓ Workflow '{}' created", workflow.name);
    println!("  ID:      {}", workflow.id);
    println!("  Tenant:  {}", workflow.tenant_id);
    println!("  Trigger: {}", describe_trigger(&workflow.trigger));
    println!("  Actions: {}", workflow.actions.len());
    if matches!(workflow.trigger, flowline::workflow::Trigger::Manual) {
        println!("\nRun it with: flowline trigger {}", workflow.id);
    }
    Ok(())
}

async fn cmd_workflow_set_active(workflow_id: &str, active: bool) -> anyhow::Result<()> {
    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;

    if !storage.set_workflow_active(workflow_id, active).await? {
        anyhow::bail!("Workflow not found: {}", workflow_id);
    }

    if active {
        println!("✓ Workflow {} activated", workflow_id);
    } else {
        println!("✓ Workflow {} deactivated", workflow_id);
        println!("  In-flight executions finish; no new ones are admitted.");
    }
    Ok(())
}

async fn cmd_workflow_delete(workflow_id: &str) -> anyhow::Result<()> {
    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;

    if !storage.delete_workflow(workflow_id).await? {
        anyhow::bail!("Workflow not found: {}", workflow_id);
    }

    println!("✓ Workflow {} deleted", workflow_id);
    Ok(())
}

async fn cmd_trigger(
    workflow_id: &str,
    payload: Option<&str>,
    tenant: Option<&str>,
    actor: &str,
) -> anyhow::Result<()> {
    use flowline::actions::ActionRegistry;
    use flowline::engine::Engine;
    use flowline::triggers::{TriggerCapability, TriggerDispatcher};

    let payload = parse_payload(payload)?;
    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;

    // The CLI has direct database access, so it may act as any tenant;
    // without --tenant it acts as the workflow's owner.
    let tenant = match tenant {
        Some(tenant) => tenant.to_string(),
        None => storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?
            .tenant_id,
    };
    let capability = TriggerCapability::granted(tenant, actor);

    let registry = ActionRegistry::with_defaults(&config);
    let engine = Engine::new(registry, storage.clone()).with_engine_config(&config.engine);
    let dispatcher = TriggerDispatcher::new(storage.clone(), engine);

    let execution_id = dispatcher
        .dispatch_manual(workflow_id, payload, &capability)
        .await?;
    println!("Execution {} admitted", execution_id);

    let execution = wait_for_terminal(&storage, &execution_id).await?;
    print_execution(&execution);

    let logs = storage.get_action_logs(&execution_id).await?;
    if !logs.is_empty() {
        println!();
        print_logs(&logs);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_execution_list(
    workflow: Option<String>,
    tenant: Option<String>,
    status: Option<&str>,
    trigger: Option<&str>,
    started_after: Option<&str>,
    started_before: Option<&str>,
    limit: usize,
    offset: usize,
) -> anyhow::Result<()> {
    use flowline::storage::{ExecutionQuery, ExecutionStatus};

    let status = match status {
        Some(raw) => Some(raw.parse::<ExecutionStatus>()?),
        None => None,
    };
    let trigger_kind = match trigger {
        Some(kind @ ("manual" | "event" | "schedule")) => Some(kind.to_string()),
        Some(other) => anyhow::bail!(
            "Invalid trigger kind '{}' (expected manual, event or schedule)",
            other
        ),
        None => None,
    };

    let query = ExecutionQuery {
        workflow_id: workflow,
        tenant_id: tenant,
        status,
        trigger_kind,
        started_after: parse_timestamp(started_after)?,
        started_before: parse_timestamp(started_before)?,
        limit,
        offset,
    };

    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;
    let executions = storage.query_executions(&query).await?;

    if executions.is_empty() {
        println!("No executions match.");
        return Ok(());
    }

    println!(
        "{:<36} {:<36} {:<10} {:<9} {:<20}",
        "ID", "WORKFLOW", "STATUS", "TRIGGER", "STARTED"
    );
    println!("{}", "-".repeat(114));

    for execution in &executions {
        println!(
            "{:<36} {:<36} {:<10} {:<9} {:<20}",
            execution.id,
            execution.workflow_id,
            execution.status.to_string(),
            execution.triggered_by.kind(),
            execution.started_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }

    println!("\n{} execution(s)", executions.len());
    Ok(())
}

async fn cmd_execution_show(execution_id: &str) -> anyhow::Result<()> {
    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;
    let execution = storage
        .get_execution(execution_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Execution not found: {}", execution_id))?;

    print_execution(&execution);
    println!("  Payload:  {}", serde_json::to_string(&execution.payload)?);

    let logs = storage.get_action_logs(execution_id).await?;
    println!();
    if logs.is_empty() {
        println!("No actions were run.");
    } else {
        print_logs(&logs);
    }
    Ok(())
}

async fn cmd_execution_logs(execution_id: &str) -> anyhow::Result<()> {
    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;

    if storage.get_execution(execution_id).await?.is_none() {
        anyhow::bail!("Execution not found: {}", execution_id);
    }

    let logs = storage.get_action_logs(execution_id).await?;
    if logs.is_empty() {
        println!("No actions were run.");
        return Ok(());
    }

    print_logs(&logs);
    Ok(())
}

async fn cmd_execution_cancel(execution_id: &str) -> anyhow::Result<()> {
    use flowline::actions::ActionRegistry;
    use flowline::engine::Engine;

    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;

    // Cancellation touches only storage and the cancel registry, so an
    // empty action registry is enough here.
    let engine = Engine::new(ActionRegistry::empty(), storage);
    let execution = engine.cancel(execution_id).await?;

    println!("✓ Execution {} is now {}", execution.id, execution.status);
    if execution.status == flowline::storage::ExecutionStatus::Running {
        println!("  The run stops at the next action boundary.");
    }
    Ok(())
}

async fn cmd_emit(event: &str, tenant: &str, payload: Option<&str>) -> anyhow::Result<()> {
    use flowline::actions::ActionRegistry;
    use flowline::engine::Engine;
    use flowline::triggers::{EventMessage, TriggerDispatcher};

    let payload = parse_payload(payload)?;
    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;

    let registry = ActionRegistry::with_defaults(&config);
    let engine = Engine::new(registry, storage.clone()).with_engine_config(&config.engine);
    let dispatcher = TriggerDispatcher::new(storage.clone(), engine);

    let message = EventMessage::new(tenant, event, payload);
    let execution_ids = dispatcher.on_event(&message).await?;

    if execution_ids.is_empty() {
        println!(
            "No active workflows listen for '{}' in tenant {}",
            event, tenant
        );
        return Ok(());
    }

    println!(
        "✓ Event '{}' admitted {} execution(s)",
        event,
        execution_ids.len()
    );
    for execution_id in &execution_ids {
        let execution = wait_for_terminal(&storage, execution_id).await?;
        println!(
            "  {} {} ({})",
            execution.id,
            execution.status,
            execution
                .status_detail
                .as_deref()
                .unwrap_or(execution.triggered_by.kind()),
        );
    }
    Ok(())
}

fn cmd_actions_list() -> anyhow::Result<()> {
    use flowline::actions::ActionRegistry;

    let config = flowline::config::Config::load();
    let registry = ActionRegistry::with_defaults(&config);

    println!("{:<20} DESCRIPTION", "TYPE");
    println!("{}", "-".repeat(72));
    for (action_type, description) in registry.descriptions() {
        println!("{:<20} {}", action_type, description);
    }
    Ok(())
}

async fn cmd_serve() -> anyhow::Result<()> {
    use flowline::actions::ActionRegistry;
    use flowline::engine::Engine;
    use flowline::shutdown::ShutdownCoordinator;
    use flowline::triggers::{EventSubscriber, NativeEventBus, ScheduleTicker, TriggerDispatcher};
    use std::sync::Arc;

    let config = flowline::config::Config::load();
    let storage = get_storage(&config)?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    shutdown.start_signal_listener();

    let registry = ActionRegistry::with_defaults(&config);
    let engine = Engine::new(registry, storage.clone())
        .with_engine_config(&config.engine)
        .with_shutdown(shutdown.clone());
    let dispatcher = TriggerDispatcher::new(storage.clone(), engine);

    let recovered = dispatcher.recover_pending().await?;
    if recovered > 0 {
        println!("Recovered {} pending execution(s)", recovered);
    }

    let bus = Arc::new(NativeEventBus::new(config.triggers.event_buffer_size));
    let mut subscriber = EventSubscriber::new(dispatcher.clone(), bus.clone());
    subscriber.start();

    let ticker = ScheduleTicker::new(dispatcher, config.triggers.schedule_tick_secs).await?;
    ticker.start().await?;

    println!("flowline engine running");
    println!("  Database: {}", config.database_path().display());
    println!(
        "  Schedule tick: every {}s",
        config.triggers.schedule_tick_secs
    );
    println!("\nPress Ctrl+C to stop");

    shutdown.wait_for_shutdown().await;

    println!("\nShutting down...");
    subscriber.stop().await;
    ticker.stop().await?;
    drain_running(&storage, std::time::Duration::from_secs(10)).await;
    println!("✓ Engine stopped");
    Ok(())
}

fn cmd_completions(shell: CompletionShell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(Shell::from(shell), &mut cmd, name, &mut std::io::stdout());
}

/// Open the configured SQLite database, creating its parent directory.
fn get_storage(
    config: &flowline::config::Config,
) -> anyhow::Result<flowline::storage::SqliteStorage> {
    let path = config.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(flowline::storage::SqliteStorage::open(&path)?)
}

fn parse_payload(raw: Option<&str>) -> anyhow::Result<serde_json::Value> {
    match raw {
        Some(raw) => {
            serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("Invalid JSON payload: {}", e))
        }
        None => Ok(serde_json::json!({})),
    }
}

fn parse_timestamp(raw: Option<&str>) -> anyhow::Result<Option<chrono::DateTime<chrono::Utc>>> {
    match raw {
        Some(raw) => {
            let parsed = chrono::DateTime::parse_from_rfc3339(raw)
                .map_err(|e| anyhow::anyhow!("Invalid timestamp '{}': {}", raw, e))?;
            Ok(Some(parsed.with_timezone(&chrono::Utc)))
        }
        None => Ok(None),
    }
}

/// Poll until the execution reaches a terminal status.
async fn wait_for_terminal(
    storage: &flowline::storage::SqliteStorage,
    execution_id: &str,
) -> anyhow::Result<flowline::storage::Execution> {
    loop {
        let execution = storage
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Execution not found: {}", execution_id))?;
        if execution.status.is_terminal() {
            return Ok(execution);
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}

/// Wait for claimed executions to stop at their next action boundary.
async fn drain_running(storage: &flowline::storage::SqliteStorage, grace: std::time::Duration) {
    use flowline::storage::{ExecutionQuery, ExecutionStatus};

    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let query = ExecutionQuery {
            status: Some(ExecutionStatus::Running),
            limit: 1,
            ..Default::default()
        };
        match storage.query_executions(&query).await {
            Ok(running) if running.is_empty() => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Drain check failed");
                return;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("Executions still running after the grace period");
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

fn print_execution(execution: &flowline::storage::Execution) {
    println!("Execution: {}", execution.id);
    println!("  Workflow: {}", execution.workflow_id);
    println!("  Tenant:   {}", execution.tenant_id);
    println!("  Status:   {}", execution.status);
    if let Some(detail) = &execution.status_detail {
        println!("  Detail:   {}", detail);
    }
    println!("  Trigger:  {}", execution.triggered_by.kind());
    println!(
        "  Started:  {}",
        execution.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    match execution.finished_at {
        Some(finished_at) => {
            println!(
                "  Finished: {}",
                finished_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            let elapsed = finished_at - execution.started_at;
            println!("  Duration: {}", format_millis(elapsed.num_milliseconds()));
        }
        None => println!("  Finished: -"),
    }
}

fn print_logs(logs: &[flowline::storage::ActionLogEntry]) {
    println!(
        "{:<6} {:<20} {:<10} {:<10} ERROR",
        "STEP", "ACTION", "STATUS", "DURATION"
    );
    println!("{}", "-".repeat(72));
    for entry in logs {
        let elapsed = entry.finished_at - entry.started_at;
        println!(
            "{:<6} {:<20} {:<10} {:<10} {}",
            entry.action_index,
            entry.action_type,
            entry.status.to_string(),
            format_millis(elapsed.num_milliseconds()),
            entry.error.as_deref().unwrap_or("-"),
        );
    }
}

fn format_millis(millis: i64) -> String {
    if millis >= 1000 {
        format!("{:.1}s", millis as f64 / 1000.0)
    } else {
        format!("{}ms", millis.max(0))
    }
}

fn describe_trigger(trigger: &flowline::workflow::Trigger) -> String {
    use flowline::workflow::Trigger;

    match trigger {
        Trigger::Manual => "manual".to_string(),
        Trigger::Event { event } => format!("event:{}", event),
        Trigger::Schedule { every_minutes } => format!("every {}m", every_minutes),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
