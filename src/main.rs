//! Agent Orchestrator Core — CLI entry point.
//!
//! This binary wires the library crate together with the `TestAdapter`
//! stub in place of a real Language-Model Adapter (§1: transport clients are
//! named interfaces only in this crate). It exists to exercise
//! `Orchestrator::handle_user_task` end to end from the command line; a
//! production deployment supplies its own `LanguageModelAdapter` and worker
//! processes reading from the sub-task channels instead of this binary's
//! built-in echo worker.

use clap::{Parser, Subcommand};
use orchestrator_core::{
    capabilities::Capabilities,
    config::AppConfig,
    context::{word_count_tokenizer, ContextAssembler},
    dispatch::ResultRouter,
    executor::PlanExecutor,
    llm::TestAdapter,
    memory::MemoryStore,
    planner::{templates::load_templates, PlanManager},
    types::{Mode, SubTaskResult, TaskId, TaskRequest},
    Orchestrator,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Multi-agent task orchestrator core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a plan for a task without executing it.
    Plan { task: String },

    /// Generate and fully execute a plan for a task.
    Run { task: String },

    /// Re-synthesize a final answer from a previously saved task.
    Synthesize { task_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level: Level = cli.log_level.parse().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path).await?,
        None => AppConfig::default(),
    };

    let memory = Arc::new(MemoryStore::new(config.storage_root.clone(), config.max_jsonl_scan_lines));
    let context_assembler = Arc::new(ContextAssembler::with_memory(
        word_count_tokenizer(),
        (*memory).clone(),
    ));

    let capabilities = Capabilities::from_file(&config.capabilities_path)
        .await
        .unwrap_or_default();
    let templates = load_templates(&config.templates_dir).await.unwrap_or_default();

    let adapter = Arc::new(TestAdapter::new("cli-demo-adapter"));
    adapter.queue_response(
        r#"[[{"assigned_agent_role":"researcher","tool_name":"search","sub_task_input":{},"narrative_step":"investigate the task"}]]"#,
    );
    adapter.queue_response("This is a demo synthesis produced by the bundled test adapter.");

    let plan_manager = Arc::new(PlanManager::new(templates, capabilities, adapter.clone()));

    let (sub_tx, mut sub_rx) = tokio::sync::mpsc::channel(32);
    let (res_tx, res_rx) = tokio::sync::mpsc::channel(32);
    let router = Arc::new(ResultRouter::new());
    let router_bg = router.clone();
    tokio::spawn(async move { router_bg.run(res_rx).await });

    // Built-in echo worker standing in for the out-of-scope worker
    // collaborators named in §1.
    tokio::spawn(async move {
        while let Some(message) = sub_rx.recv().await {
            info!(sub_task_id = %message.sub_task_id, "echo worker handling sub-task");
            let _ = res_tx
                .send(SubTaskResult::success(
                    message.sub_task_id,
                    serde_json::json!({"echo": message.definition.narrative_step}),
                ))
                .await;
        }
    });

    let mut senders = HashMap::new();
    senders.insert("researcher".to_string(), sub_tx);
    let executor = Arc::new(PlanExecutor::new(
        senders,
        router,
        (*memory).clone(),
        config.default_sub_task_timeout(),
    ));

    let orchestrator = Orchestrator::new(
        memory,
        context_assembler,
        adapter,
        plan_manager,
        executor,
        config.max_revisions,
        config.default_context_token_budget,
        config.max_context_key_findings,
    );

    let (user_task, mode, task_to_load) = match cli.command {
        Commands::Plan { task } => (task, Mode::PlanOnly, None),
        Commands::Run { task } => (task, Mode::ExecuteFullPlan, None),
        Commands::Synthesize { task_id } => (String::new(), Mode::SynthesizeOnly, Some(TaskId::from(task_id))),
    };

    let req = TaskRequest {
        user_task,
        uploaded_files: vec![],
        parent_task_id: task_to_load.clone().unwrap_or_else(TaskId::new),
        task_to_load,
        mode,
    };

    let response = orchestrator.handle_user_task(req, CancellationToken::new()).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.success {
        std::process::exit(1);
    }

    Ok(())
}
