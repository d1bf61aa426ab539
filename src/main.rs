//! Parent Concierge - 新手父母对话助手
//!
//! 入口：加载 .env 与配置、初始化日志、构造 handler 树与 Turn Runner，然后运行逐行 REPL。
//! 用法：`concierge [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use concierge::{
    artifacts::InMemoryArtifactService,
    care::{JsonCareLogStore, JsonProfileStore, SvgBarChart},
    cli::{parse_repl_input, ReplInput},
    concierge::{build_concierge, ConciergeDeps},
    config::load_config,
    core::{SessionSupervisor, Shutdown},
    llm::create_llm_client,
    observability,
    pipeline::{EventPayload, PipelineEvent, TurnRunner},
    session::{InMemorySessionService, SessionIds},
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let llm = create_llm_client(&cfg).context("Failed to create inference client")?;
    tokio::fs::create_dir_all(&cfg.app.data_dir)
        .await
        .with_context(|| format!("Failed to create data dir {}", cfg.app.data_dir.display()))?;
    let profiles = JsonProfileStore::open(cfg.app.data_dir.join("profile.json"))
        .await
        .context("Failed to open profile store")?;
    let care_log = JsonCareLogStore::open(cfg.app.data_dir.join("care_log.json"))
        .await
        .context("Failed to open care log store")?;

    let deps = ConciergeDeps {
        llm: llm.clone(),
        profiles: Arc::new(profiles),
        care_log: Arc::new(care_log),
        artifacts: Arc::new(InMemoryArtifactService::new()),
        renderer: Arc::new(SvgBarChart::default()),
        today: None,
        settings: cfg.pipeline_settings(),
    };
    let root = build_concierge(&deps).context("Failed to build handler tree")?;

    let sessions = Arc::new(InMemorySessionService::new());
    let ids = SessionIds::new(&cfg.app.name, &cfg.app.user_id, &cfg.app.session_id);
    sessions.create_session(ids).await;

    let supervisor = SessionSupervisor::new();
    let runner = TurnRunner::new(Arc::new(root), sessions, supervisor.clone());

    let shutdown = Shutdown::new(supervisor);
    shutdown.listen_for_signals();

    tracing::info!(
        app = %cfg.app.name,
        session = %cfg.app.session_id,
        model = %llm.model_name(),
        "concierge ready"
    );
    println!("New Parent Concierge is ready. Type 'exit' or 'quit' to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"\nYou > ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            _ = shutdown.triggered() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            break;
        };
        let text = match parse_repl_input(&line) {
            ReplInput::Skip => continue,
            ReplInput::Exit => {
                shutdown.trigger("repl");
                break;
            }
            ReplInput::Turn(text) => text,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_events(rx));
        let reply = runner
            .run_turn(&cfg.app.session_id, &text, Some(tx))
            .await
            .context("Turn could not start")?;
        let _ = printer.await;

        println!("\nConcierge > {}", reply.text);
        if shutdown.is_triggered() {
            break;
        }
    }

    let (prompt_tokens, completion_tokens, total_tokens) = llm.token_usage();
    tracing::info!(prompt_tokens, completion_tokens, total_tokens, "session finished");
    println!("Goodbye!");
    Ok(())
}

/// 在回复前打印子 handler 的工具活动
async fn print_events(mut rx: mpsc::UnboundedReceiver<PipelineEvent>) {
    while let Some(event) = rx.recv().await {
        match event.payload {
            EventPayload::ToolCall { tool, .. } => {
                println!("  [{}] calling {}", event.author, tool);
            }
            EventPayload::ToolResult { tool, ok: false, preview, .. } => {
                println!("  [{}] {} failed: {}", event.author, tool, preview);
            }
            EventPayload::Error { kind, .. } => {
                println!("  [{}] error ({})", event.author, kind);
            }
            _ => {}
        }
    }
}
