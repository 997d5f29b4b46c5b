mod config;

pub use config::{InfraFlowConfig, ProvisionerConfig, ServerConfig, StageOverride, TtlConfig};

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::collaborators::Collaborators;
use crate::collaborators::compliance::RuleValidator;
use crate::collaborators::llm::OpenAiReasoner;
use crate::collaborators::provision::{TerraformProvisioner, WorkspaceProvisioner};
use crate::collaborators::scripted::ScriptedReasoner;
use crate::engine::types::{AnswerSlot, ExecutionStatus, RequestConfig, StageId};
use crate::engine::{Engine, ExecutionResponse, StartOptions, StatusView};
use crate::stages::pipeline::standard_graph;
use crate::storage::SnapshotStore;
use crate::storage::json_store::JsonSnapshotStore;

const DEFAULT_STORE_DIR: &str = "data/executions";
const DEFAULT_WORKSPACE_DIR: &str = "data/workspaces";

#[derive(Parser)]
#[command(
    name = "infraflow",
    version,
    about = "Stage-graph orchestrator for infrastructure pipelines"
)]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to infraflow.yaml (default: auto-detect in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot store directory
    #[arg(long, global = true, env = "STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Use canned agent replies instead of a chat endpoint
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new execution for an infrastructure request
    Start {
        /// Natural-language request
        request: String,

        /// Compliance frameworks to check (repeatable or comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        framework: Vec<String>,

        /// Loop back to generation until the enforced quality gate passes
        #[arg(long)]
        enforce: bool,

        /// Skip the human approval step
        #[arg(long)]
        no_approval: bool,

        /// Provision the configuration after approval
        #[arg(long)]
        deploy: bool,

        /// Never route to the consultant
        #[arg(long)]
        no_consultation: bool,

        /// Provisioning variable as key=value (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Execution id (default: random UUID)
        #[arg(long)]
        id: Option<String>,

        /// Answer to the architect's clarifying question, supplied up front
        #[arg(long)]
        clarification: Option<String>,

        /// Approval answer, supplied up front
        #[arg(long)]
        approval: Option<String>,

        /// Print the generated configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Resume a suspended execution with the requested answer
    Resume {
        /// Execution ID
        execution_id: String,

        /// Answer text. For approvals: a keyword, `approve <id>`, `reject <id>`, `changes <notes>` or free text
        answer: String,

        /// Print the generated configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Continue an execution left running by a crashed process
    Recover {
        /// Execution ID
        execution_id: String,
    },

    /// Show the status of an execution
    Status {
        /// Execution ID
        execution_id: String,
    },

    /// Cancel a suspended execution
    Cancel {
        /// Execution ID
        execution_id: String,
    },

    /// List executions
    List {
        /// Filter by status (running, suspended, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<ExecutionStatus>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Print the full snapshot of an execution
    Inspect {
        /// Execution ID
        execution_id: String,
    },

    /// Show the stage graph and check it
    Graph,

    /// Delete expired snapshots
    Purge,

    /// Start the REST API server
    Serve {
        /// Host to bind to
        #[arg(long, env = "HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        /// Maximum request body size in bytes (default: 1048576 = 1 MB)
        #[arg(long, env = "MAX_BODY")]
        max_body: Option<usize>,
    },
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file
    load_dotenv(cli.dotenv.as_deref());

    let config = InfraFlowConfig::load(cli.config.as_deref())?;
    let store_dir = cli
        .store_dir
        .clone()
        .or_else(|| config.store_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
    let offline = cli.offline;

    match cli.command {
        Commands::Start {
            request,
            framework,
            enforce,
            no_approval,
            deploy,
            no_consultation,
            vars,
            id,
            clarification,
            approval,
            verbose,
        } => {
            let request_config = RequestConfig {
                enforce_compliance: enforce,
                selected_frameworks: framework
                    .into_iter()
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect::<BTreeSet<_>>(),
                require_approval: !no_approval,
                deploy,
                consultation_enabled: !no_consultation,
                variables: vars.into_iter().collect(),
            };
            let mut answers = BTreeMap::new();
            if let Some(answer) = clarification {
                answers.insert(AnswerSlot::Clarification, answer);
            }
            if let Some(answer) = approval {
                answers.insert(AnswerSlot::ApprovalResponse, answer);
            }
            let options = StartOptions {
                execution_id: id,
                answers,
            };

            let engine = build_engine(&config, &store_dir, offline)?;
            let response = engine.start_with(&request, request_config, options).await?;
            print_response(&response, verbose)
        }
        Commands::Resume {
            execution_id,
            answer,
            verbose,
        } => {
            let engine = build_engine(&config, &store_dir, offline)?;
            let response = engine.resume(&execution_id, &answer).await?;
            print_response(&response, verbose)
        }
        Commands::Recover { execution_id } => {
            let engine = build_engine(&config, &store_dir, offline)?;
            let response = engine.recover(&execution_id).await?;
            print_response(&response, false)
        }
        Commands::Status { execution_id } => {
            // Status and cancel never run a stage, so no chat endpoint is needed.
            let engine = build_engine(&config, &store_dir, true)?;
            let view = engine.status(&execution_id).await?;
            print_status(&view)
        }
        Commands::Cancel { execution_id } => {
            let engine = build_engine(&config, &store_dir, true)?;
            let view = engine.cancel(&execution_id).await?;
            println!("Execution {} cancelled.", view.execution_id);
            Ok(())
        }
        Commands::List { status, format } => cmd_list(status, &store_dir, &format).await,
        Commands::Inspect { execution_id } => cmd_inspect(&execution_id, &store_dir).await,
        Commands::Graph => cmd_graph(&config),
        Commands::Purge => {
            let store = JsonSnapshotStore::new(&store_dir);
            let removed = store.purge_expired().await?;
            println!("Purged {} expired snapshot(s).", removed);
            Ok(())
        }
        Commands::Serve {
            host,
            port,
            max_body,
        } => {
            let host = host
                .or_else(|| config.server.host.clone())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            let port = port.or(config.server.port).unwrap_or(3000);
            let max_body = max_body.or(config.server.max_body).unwrap_or(1_048_576);

            let engine = build_engine(&config, &store_dir, offline)?;
            crate::api::serve(&host, port, Arc::new(engine), max_body).await
        }
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (error if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

/// Wire collaborators, the standard graph and the JSON store from configuration.
pub fn build_engine(config: &InfraFlowConfig, store_dir: &Path, offline: bool) -> Result<Engine> {
    let reasoner: Arc<dyn crate::collaborators::Reasoner> = if offline {
        Arc::new(ScriptedReasoner::offline())
    } else {
        Arc::new(OpenAiReasoner::from_settings(&config.llm).context(
            "Failed to configure the chat endpoint (use --offline to run without one)",
        )?)
    };

    let workspace_dir = config
        .workspace_dir
        .as_deref()
        .unwrap_or(DEFAULT_WORKSPACE_DIR);
    let provisioner: Arc<dyn crate::collaborators::Provisioner> =
        match config.provisioner.kind.as_deref().unwrap_or("workspace") {
            "workspace" => Arc::new(WorkspaceProvisioner::new(workspace_dir)),
            "terraform" => Arc::new(TerraformProvisioner::new(
                workspace_dir,
                config
                    .provisioner
                    .terraform_bin
                    .clone()
                    .unwrap_or_else(|| "terraform".to_string()),
                config.provisioner.timeout.unwrap_or(900.0),
            )),
            other => {
                return Err(anyhow!(
                    "Unknown provisioner '{}'. Use: workspace, terraform",
                    other
                ));
            }
        };

    let collaborators = Collaborators {
        reasoner,
        validator: Arc::new(RuleValidator::standard()?),
        provisioner,
    };
    let graph = standard_graph(&collaborators, &config.pipeline_options());
    let store = Arc::new(JsonSnapshotStore::new(store_dir));

    Ok(Engine::new(graph, store, config.engine_settings())?)
}

fn print_response(response: &ExecutionResponse, verbose: bool) -> Result<()> {
    match response {
        ExecutionResponse::Suspended(handle) => {
            println!("Execution: {}", handle.execution_id);
            println!("Status:    suspended");
            println!("Waiting:   {} (resumes at {})", handle.answer_slot, handle.resume_stage);
            println!("Reason:    {}", handle.reason);
            println!(
                "\nResume with: infraflow resume {} \"<answer>\"",
                handle.execution_id
            );
        }
        ExecutionResponse::Completed {
            execution_id,
            output,
        }
        | ExecutionResponse::Failed {
            execution_id,
            output,
        } => {
            println!("Execution: {}", execution_id);
            println!("Status:    {}", output.status);
            println!("\n{}", output.summary);
            for warning in &output.warnings {
                println!("  ! {}", warning);
            }
            for error in &output.errors {
                println!("  ✗ {}", error);
            }
            if verbose && let Some(ref artifact) = output.artifact {
                println!("\n{}", artifact);
            }
        }
    }
    Ok(())
}

fn print_status(view: &StatusView) -> Result<()> {
    println!("Execution: {}", view.execution_id);
    println!("Status:    {}", view.status);
    println!("Stage:     {}", view.current_stage);
    let completed: Vec<&str> = view.completed_stages.iter().map(|s| s.as_str()).collect();
    println!("Completed: {}", completed.join(", "));
    if let Some(ref reason) = view.reason {
        println!("Reason:    {}", reason);
    }
    for (phase, count) in &view.phase_iteration_counts {
        println!("  {:<12} {} iteration(s)", phase.as_str(), count);
    }
    for error in &view.errors {
        println!("  ✗ {}", error);
    }
    Ok(())
}

async fn cmd_list(status: Option<ExecutionStatus>, store_dir: &Path, format: &str) -> Result<()> {
    let store = JsonSnapshotStore::new(store_dir);
    let snapshots = store.list(status).await?;

    if snapshots.is_empty() {
        println!("No executions found.");
        return Ok(());
    }

    if format == "json" {
        let views: Vec<StatusView> = snapshots.iter().map(StatusView::from).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    // Table format
    println!(
        "{:<38} {:<10} {:<18} {:<20}",
        "EXECUTION ID", "STATUS", "STAGE", "UPDATED"
    );
    println!("{}", "-".repeat(88));

    for snapshot in &snapshots {
        let stage = snapshot
            .resume_stage
            .unwrap_or(snapshot.state.current_stage);
        println!(
            "{:<38} {:<10} {:<18} {:<20}",
            snapshot.execution_id,
            snapshot.status.to_string(),
            stage.as_str(),
            snapshot.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\nTotal: {} execution(s)", snapshots.len());
    Ok(())
}

async fn cmd_inspect(execution_id: &str, store_dir: &Path) -> Result<()> {
    let store = JsonSnapshotStore::new(store_dir);

    let snapshot = store
        .get(execution_id)
        .await?
        .with_context(|| format!("Execution '{}' not found", execution_id))?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn cmd_graph(config: &InfraFlowConfig) -> Result<()> {
    let engine = build_engine(config, Path::new(DEFAULT_STORE_DIR), true)?;
    let graph = engine.graph();

    println!("{:<18} {:<12} {:<9} DESCRIPTION", "STAGE", "PHASE", "CRITICAL");
    println!("{}", "-".repeat(80));
    for id in graph.stages() {
        let spec = graph.get(*id)?;
        println!(
            "{:<18} {:<12} {:<9} {}",
            id.as_str(),
            id.phase().as_str(),
            if spec.critical { "yes" } else { "no" },
            spec.stage.description()
        );
    }

    println!("\nEdges (priority order):");
    for edge in graph.edges() {
        println!("  {} -> {} [{}]", edge.from, edge.to, edge.priority);
    }

    let entry = graph.entry().unwrap_or(StageId::Requirements);
    println!("\nEntry: {}", entry);
    println!(
        "Invocation bound: {}",
        engine.settings().guard.invocation_bound(graph)
    );
    println!("Validation: OK");
    Ok(())
}
