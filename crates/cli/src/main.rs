mod console;
mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentflow_core::{Requirement, WorkflowMode, WorkflowPhase};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use orchestrator::config::CONFIG_DIR;
use orchestrator::execution::{AgentRecoveryStrategy, ToolActionHandler};
use orchestrator::phases::{artifacts, ExecutionRunner, PlanningRunner, ReviewRunner};
use orchestrator::services::{
    ChatOptions, HeadlessInteraction, HttpAgentClient, InteractionHandler, LocalFileStore,
    ShellProcessRunner,
};
use orchestrator::tools::{register_builtin_tools, ApprovalPrompt, StaticApprovalPrompt};
use orchestrator::{
    ExecutionContext, OrchestratorConfig, RunnerHarness, SequentialOptions, Session,
    SessionStateMachine, ToolManager, ToolRegistry, Workflow, WorkflowOutcome, WorkflowReport,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::console::{ConsoleApprovalPrompt, ConsoleInteraction, IndicatifProgressSink};
use crate::settings::Settings;

const DEFAULT_AGENT: &str = "default";

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(about = "Agent-assisted coding workflows with guarded tool execution", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write default configuration into the current directory
    Init,
    /// Plan and execute a requirement, or execute an existing action list
    Run {
        /// What to build
        requirement: Option<String>,

        /// Skip planning and execute this action list
        #[arg(long, conflicts_with = "requirement")]
        actions: Option<PathBuf>,

        #[arg(long, value_parser = parse_mode)]
        mode: Option<WorkflowMode>,

        /// Never prompt; abort on the first unrecoverable failure
        #[arg(long)]
        headless: bool,

        /// Approve phase gates and tool calls without asking
        #[arg(short, long)]
        yes: bool,

        #[arg(long)]
        api_url: Option<String>,

        #[arg(long)]
        model: Option<String>,
    },
    /// List the built-in tools and their security descriptors
    Tools,
    /// Print the risk assessment for a prospective tool call
    Assess {
        tool: String,
        /// Call parameters as a JSON object
        params: String,
    },
}

fn parse_mode(s: &str) -> Result<WorkflowMode, String> {
    WorkflowMode::parse(s).ok_or_else(|| format!("unknown mode '{s}', expected speed or structured"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Init => init_project(&cwd).await,
        Commands::Run {
            requirement,
            actions,
            mode,
            headless,
            yes,
            api_url,
            model,
        } => {
            let options = RunOptions {
                requirement,
                actions,
                mode,
                headless,
                yes,
                api_url,
                model,
            };
            run(&cwd, options).await
        }
        Commands::Tools => list_tools(&cwd).await,
        Commands::Assess { tool, params } => assess(&cwd, &tool, &params).await,
    }
}

async fn init_project(cwd: &Path) -> Result<()> {
    let config_dir = cwd.join(CONFIG_DIR);
    if config_dir.exists() {
        println!("Project already initialized at {}", config_dir.display());
        return Ok(());
    }

    let project_name = cwd
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("my-project")
        .to_string();

    let mut settings = Settings::default();
    settings.project.name = project_name.clone();
    settings.write(cwd).await?;

    OrchestratorConfig::default()
        .with_default_agent(DEFAULT_AGENT)
        .write(cwd)
        .await
        .context("Failed to write orchestrator config")?;

    println!();
    println!("Initialized agentflow for '{}'", project_name);
    println!();
    println!("Created:");
    println!("  {}", settings::SETTINGS_FILE);
    println!("  {}/", CONFIG_DIR);
    println!("  └── config.json");
    println!();
    println!("Next steps:");
    println!("  1. Point [agent] api_url in {} at your model server", settings::SETTINGS_FILE);
    println!("  2. Export {} if the server needs a key", settings.agent.api_key_env);
    println!("  3. Run 'agentflow run \"<requirement>\"'");

    Ok(())
}

struct RunOptions {
    requirement: Option<String>,
    actions: Option<PathBuf>,
    mode: Option<WorkflowMode>,
    headless: bool,
    yes: bool,
    api_url: Option<String>,
    model: Option<String>,
}

async fn run(cwd: &Path, options: RunOptions) -> Result<()> {
    let settings = Settings::load(cwd).await?;
    let mut config = OrchestratorConfig::read(cwd).await;
    if let Some(mode) = options.mode {
        config = config.with_mode(mode);
    }
    if options.headless {
        config = config.with_interactive(false);
    }
    if config.agents.default_agent.is_none() {
        config = config.with_default_agent(DEFAULT_AGENT);
    }

    let requirement = match (&options.requirement, &options.actions) {
        (Some(text), _) => requirement_from_text(text),
        (None, Some(path)) => Requirement::new(
            format!("Execute {}", path.display()),
            "Execute a prepared action list",
        ),
        (None, None) => bail!("Give a requirement or --actions <file>"),
    };

    let files = Arc::new(LocalFileStore::new(cwd));
    if let Some(path) = &options.actions {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        tokio::fs::create_dir_all(cwd.join(CONFIG_DIR)).await?;
        tokio::fs::write(cwd.join(artifacts::ACTIONS), content).await?;
    }

    let approval: Arc<dyn ApprovalPrompt> = if options.yes {
        Arc::new(StaticApprovalPrompt::allow())
    } else if !config.interactive {
        Arc::new(StaticApprovalPrompt::deny())
    } else {
        Arc::new(ConsoleApprovalPrompt)
    };
    let tools = Arc::new(build_tool_manager(cwd, &config, approval));

    let session = Session::new(requirement.clone(), config.mode)
        .with_workspace(cwd)
        .with_assignments(config.agents.clone());
    let progress = Arc::new(IndicatifProgressSink::new());
    let session = Arc::new(
        SessionStateMachine::new(session)
            .with_policy(config.transition_policy)
            .with_progress_sink(progress.clone()),
    );

    let interaction: Arc<dyn InteractionHandler> = if config.interactive {
        Arc::new(ConsoleInteraction {
            auto_approve: options.yes,
        })
    } else {
        Arc::new(HeadlessInteraction)
    };
    let harness = RunnerHarness::new(session.clone(), interaction).with_interactive(config.interactive);

    let api_url = options.api_url.as_deref().unwrap_or(&settings.agent.api_url);
    let mut client = HttpAgentClient::new(api_url)?;
    if let Some(key) = settings.api_key() {
        client = client.with_api_key(key);
    }
    let client = Arc::new(client);
    let chat = ChatOptions {
        model: Some(options.model.unwrap_or_else(|| settings.agent.model.clone())),
        ..Default::default()
    };

    let agent = session
        .agent_for(WorkflowPhase::Execution)
        .unwrap_or_else(|| DEFAULT_AGENT.to_string());
    let context = ExecutionContext::new(agent, session.id())
        .with_all_permissions()
        .with_workspace(cwd);
    let handler = Arc::new(ToolActionHandler::new(tools.clone(), context));
    let execution = ExecutionRunner::new(files.clone(), handler)
        .with_options(SequentialOptions::from(&config.recovery))
        .with_recovery_strategy(Arc::new(
            AgentRecoveryStrategy::new(client.clone()).with_options(chat.clone()),
        ));

    let mut workflow = Workflow::new(harness)
        .configure(&config)
        .with_tools(tools.clone())
        .with_runner(WorkflowPhase::Execution, Arc::new(execution));
    if options.actions.is_none() {
        workflow = workflow
            .with_runner(
                WorkflowPhase::Planning,
                Arc::new(
                    PlanningRunner::new(client.clone(), files.clone(), requirement.clone())
                        .with_action_types(tools.tool_names())
                        .with_options(chat.clone()),
                ),
            )
            .with_runner(
                WorkflowPhase::Review,
                Arc::new(ReviewRunner::new(client, files, requirement).with_options(chat)),
            );
    }

    let cancel = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    println!("{} {} ({} mode)", "agentflow".bold(), settings.project.name, config.mode.as_str());
    let report = workflow.run().await;
    progress.finish();

    print_report(&report);
    if !report.outcome.is_completed() {
        bail!("Workflow did not complete");
    }
    Ok(())
}

fn requirement_from_text(text: &str) -> Requirement {
    let title: String = text.lines().next().unwrap_or(text).chars().take(80).collect();
    Requirement::new(title, text)
}

fn build_tool_manager(cwd: &Path, config: &OrchestratorConfig, approval: Arc<dyn ApprovalPrompt>) -> ToolManager {
    let files = Arc::new(LocalFileStore::new(cwd));
    let processes = Arc::new(ShellProcessRunner::new(cwd).with_timeout(config.process_timeout()));

    let mut registry = ToolRegistry::new().with_environment(config.environment);
    register_builtin_tools(&mut registry, files, processes);

    ToolManager::new(registry, approval)
        .with_high_risk_threshold(config.approval.high_risk_threshold)
        .with_log_capacity(config.audit.max_entries)
}

fn print_report(report: &WorkflowReport) {
    println!();
    for phase in &report.phases {
        let mark = if phase.skipped {
            "-".yellow()
        } else if phase.success {
            "✓".green()
        } else {
            "x".red()
        };
        let detail = phase
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .or_else(|| {
                phase
                    .data
                    .as_ref()
                    .and_then(|d| d.get("summary"))
                    .and_then(|s| s.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        println!("  {} {:<12} {}", mark, phase.phase.to_string(), detail);
    }
    println!();

    let outcome = match &report.outcome {
        WorkflowOutcome::Completed => "completed".green().bold(),
        WorkflowOutcome::Cancelled => "cancelled".yellow().bold(),
        WorkflowOutcome::Aborted { phase } => format!("aborted in {phase}").red().bold(),
        WorkflowOutcome::Rejected { phase } => format!("{phase} rejected").red().bold(),
        WorkflowOutcome::NeedsReconfiguration { phase } => {
            format!("reconfigure {phase} and rerun").yellow().bold()
        }
    };
    println!("Workflow {} (session {}, state {})", outcome, report.session_id, report.final_state);
}

async fn list_tools(cwd: &Path) -> Result<()> {
    let config = OrchestratorConfig::read(cwd).await;
    let tools = build_tool_manager(cwd, &config, Arc::new(StaticApprovalPrompt::deny()));

    println!();
    for name in tools.tool_names() {
        let Some(tool) = tools.get_tool(&name) else {
            continue;
        };
        let security = &tool.security;
        let mut flags = vec![security.risk_level.as_str().to_string()];
        if security.requires_approval {
            flags.push("approval".to_string());
        }
        if !security.allowed_in_web {
            flags.push("desktop-only".to_string());
        }
        println!("  {:<18} {}", tool.name.bold(), tool.description);
        println!("  {:<18} [{}] {}", "", flags.join(", "), security.permissions.join(", ").dimmed());
    }
    println!();
    Ok(())
}

async fn assess(cwd: &Path, tool: &str, params: &str) -> Result<()> {
    let params: serde_json::Value = serde_json::from_str(params).context("Parameters must be JSON")?;
    let config = OrchestratorConfig::read(cwd).await;
    let tools = build_tool_manager(cwd, &config, Arc::new(StaticApprovalPrompt::deny()));

    let context = ExecutionContext::new("cli", Uuid::new_v4())
        .with_all_permissions()
        .with_workspace(cwd);
    let risk = tools.assess(tool, &params, &context)?;

    println!("{}", serde_json::to_string_pretty(&risk)?);
    if risk.is_high_risk(config.approval.high_risk_threshold) {
        println!("{}", "High risk: a second confirmation would be required".red());
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentflow=info,orchestrator=info".into()),
        )
        .init();
}
