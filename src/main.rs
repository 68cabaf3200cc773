// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::oneshot;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, McpCommands};
use quill_config::{load_mcp_config, write_mcp_config, McpServerConfig, McpTransport};
use quill_core::advisors::{
    ContextAdvisor, FinishTaskAdvisor, FinishTaskTool, RequestLogAdvisor, SystemPromptAdvisor,
};
use quill_core::{
    Agent, AdvisorChain, ApprovalDecision, ApprovalHandler, CheckpointStore, ContextManager,
    RegistryAgentView, Session, SessionStore, TurnOutcome,
};
use quill_events::{AgentEvent, EventBridge, EventBus, EventKind, UiEventQueue};
use quill_mcp::McpPool;
use quill_model::{ModelProvider, OpenAiCompatProvider};
use quill_runtime::{ActivateSkillTool, CommandRegistry, ModelCommand, SkillsAdvisor, SkillsManager};
use quill_tools::{
    ListFilesTool, ReadFileTool, RunCommandTool, ToolDescriptor, ToolRegistry, WriteFileTool,
};

const RENDER_TICK: Duration = Duration::from_millis(16);
const TYPEWRITER_INTERVAL: Duration = Duration::from_millis(50);
const TYPEWRITER_CHARS_PER_TICK: usize = 20;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let workspace = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: cannot determine working directory: {e}");
            std::process::exit(1);
        }
    };

    match run(cli, workspace).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Ok(path) = std::env::var("QUILL_LOG_FILE") {
        if let Ok(file) = std::fs::File::options().create(true).append(true).open(path) {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
                .with(filter)
                .init();
            return;
        }
    }
    if verbose {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

async fn run(cli: Cli, workspace: PathBuf) -> anyhow::Result<i32> {
    match cli.command {
        Some(Commands::Init) => cmd_init(&workspace),
        Some(Commands::Mcp { command }) => cmd_mcp(&workspace, command),
        Some(Commands::Restore { checkpoint }) => cmd_restore(&workspace, checkpoint).await,
        Some(Commands::Resume { session_id }) => {
            run_composer(workspace, Some(session_id)).await
        }
        None => run_composer(workspace, None).await,
    }
}

// ── Subcommands ───────────────────────────────────────────────────────────────

fn cmd_init(workspace: &Path) -> anyhow::Result<i32> {
    let state = workspace.join(quill_config::STATE_DIR);
    std::fs::create_dir_all(&state)?;
    let path = state.join("config.yaml");
    if path.exists() {
        println!("{} already exists", path.display());
        return Ok(1);
    }
    let config = quill_config::Config::default();
    std::fs::write(&path, serde_yaml::to_string(&config)?)?;
    println!("wrote {}", path.display());
    Ok(0)
}

fn cmd_mcp(workspace: &Path, command: McpCommands) -> anyhow::Result<i32> {
    match command {
        McpCommands::List => {
            let servers = load_mcp_config(workspace)?;
            if servers.is_empty() {
                println!("no MCP servers configured");
            }
            for s in servers {
                let target = s
                    .command
                    .as_deref()
                    .or(s.url.as_deref())
                    .unwrap_or("?");
                println!("{}  [{}]  {}", s.name, s.transport, target);
            }
            Ok(0)
        }
        McpCommands::Add { name, transport, command, args, env, url } => {
            let transport = match transport.as_str() {
                "stdio" => McpTransport::Stdio,
                "http" => McpTransport::Http,
                "sse" => McpTransport::Sse,
                other => {
                    eprintln!("unknown transport: {other} (expected stdio, http or sse)");
                    return Ok(1);
                }
            };
            let env = env
                .iter()
                .filter_map(|kv| kv.split_once('=').map(|(k, v)| (k.into(), v.into())))
                .collect();
            let mut servers = load_mcp_config(workspace)?;
            servers.retain(|s| s.name != name);
            servers.push(McpServerConfig {
                name: name.clone(),
                transport,
                command,
                args,
                env,
                url,
                headers: Default::default(),
            });
            write_mcp_config(workspace, &servers)?;
            println!("added MCP server {name}");
            Ok(0)
        }
        McpCommands::Remove { name } => {
            let mut servers = load_mcp_config(workspace)?;
            let before = servers.len();
            servers.retain(|s| s.name != name);
            if servers.len() == before {
                eprintln!("no such server: {name}");
                return Ok(1);
            }
            write_mcp_config(workspace, &servers)?;
            println!("removed MCP server {name}");
            Ok(0)
        }
    }
}

async fn cmd_restore(workspace: &Path, checkpoint: Option<String>) -> anyhow::Result<i32> {
    let store = CheckpointStore::new(workspace).context("cannot locate home directory")?;
    let checkpoints = store.list_checkpoints();
    match checkpoint.as_deref() {
        Some("list") | None if checkpoints.is_empty() => {
            println!("no checkpoints recorded for this workspace");
            Ok(0)
        }
        Some("list") => {
            for (name, cp) in &checkpoints {
                println!(
                    "{name}  tool={}  commit={}",
                    cp.tool_call.name,
                    cp.commit_hash.as_deref().unwrap_or("-")
                );
            }
            Ok(0)
        }
        selected => {
            let found = match selected {
                Some(name) => checkpoints.iter().find(|(n, _)| n == name),
                None => checkpoints.first(),
            };
            let Some((name, cp)) = found else {
                eprintln!("no such checkpoint");
                return Ok(1);
            };
            let Some(hash) = cp.commit_hash.as_deref() else {
                eprintln!("checkpoint {name} has no snapshot commit");
                return Ok(1);
            };
            store.restore(hash).await.context("restore failed")?;
            println!("restored workspace from {name}");
            Ok(0)
        }
    }
}

// ── Composer ──────────────────────────────────────────────────────────────────

async fn run_composer(
    workspace: PathBuf,
    resume: Option<Option<String>>,
) -> anyhow::Result<i32> {
    let config = match quill_config::load(&workspace) {
        Ok(c) => c,
        Err(e) => {
            // Malformed config is fatal at startup, with path and cause.
            eprintln!("config error: {e}");
            return Ok(1);
        }
    };

    let store = SessionStore::new(&workspace);
    let session = match resume {
        None => Session::new(),
        Some(maybe_id) => {
            let id = match maybe_id {
                Some(id) => id,
                None => match store.list_recent(1).first() {
                    Some(summary) => summary.id.clone(),
                    None => {
                        eprintln!("no sessions to resume");
                        return Ok(1);
                    }
                },
            };
            match store.load(&id) {
                Some(s) => {
                    println!("resuming session {id} ({} messages)", s.messages.len());
                    s
                }
                None => {
                    eprintln!("no such session: {id}");
                    return Ok(1);
                }
            }
        }
    };

    // Event pipeline: bus → bridge → UI queue → render task.
    let bus = Arc::new(EventBus::new());
    let ui_queue = Arc::new(UiEventQueue::new());
    let bridge = EventBridge::all_kinds(Arc::clone(&bus), Arc::clone(&ui_queue));
    bridge.start();

    // Tools.
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(ListFilesTool)).expect("fresh registry");
    registry.register(Arc::new(ReadFileTool)).expect("fresh registry");
    registry.register(Arc::new(WriteFileTool)).expect("fresh registry");
    registry.register(Arc::new(RunCommandTool)).expect("fresh registry");
    registry.register(Arc::new(FinishTaskTool)).expect("fresh registry");

    // Skills.
    let skills = Arc::new(SkillsManager::for_workspace(&workspace));
    let changes = skills.scan();
    if changes.has_changes() {
        tracing::info!(
            added = changes.added.len(),
            modified = changes.modified.len(),
            removed = changes.removed.len(),
            "skills scanned"
        );
    }
    registry
        .register(Arc::new(ActivateSkillTool::new(Arc::clone(&skills))))
        .expect("fresh registry");

    // MCP servers.
    let pool = Arc::new(McpPool::new(load_mcp_config(&workspace)?));
    pool.connect_and_register(&registry).await;

    // Provider.
    let model_config = Arc::new(Mutex::new(config.model.clone()));
    let provider: Arc<dyn ModelProvider> =
        Arc::new(OpenAiCompatProvider::from_config(&config.model));

    // Advisor chain — order is significant.
    let view = Arc::new(RegistryAgentView::new(
        Arc::clone(&registry),
        config.model.name.clone(),
        workspace.clone(),
    ));
    let finish = Arc::new(FinishTaskAdvisor::new());
    let mut chain = AdvisorChain::default();
    let advisor_view: Arc<dyn quill_core::AgentView> = Arc::clone(&view) as Arc<dyn quill_core::AgentView>;
    chain.push(Arc::new(SystemPromptAdvisor::new(
        advisor_view,
        config.agent.system_prompt.clone(),
    )));
    chain.push(Arc::new(SkillsAdvisor::new(Arc::clone(&skills))));
    chain.push(Arc::new(ContextAdvisor::new(ContextManager::new(
        config.context.clone(),
        config.model.max_context_length,
        Some(Arc::clone(&provider)),
    ))));
    chain.push(Arc::new(RequestLogAdvisor::new(
        workspace.join(quill_config::STATE_DIR).join("logs"),
        &session.id,
    )));
    chain.push(Arc::clone(&finish) as Arc<dyn quill_core::Advisor>);

    let checkpoints = CheckpointStore::new(&workspace).map(Arc::new);

    let mut agent = Agent::new(
        session,
        store,
        Arc::clone(&registry),
        provider,
        chain,
        finish,
        checkpoints,
        Arc::clone(&bus),
        Arc::new(StdinApproval),
        config.agent.clone(),
        workspace.clone(),
    );

    // Slash commands.
    let mut commands = CommandRegistry::new();
    commands.register(Arc::new(ModelCommand::new(
        Arc::clone(&model_config),
        Arc::clone(&bus),
    )));

    // Renderer: drains the UI queue each tick within the frame budget and
    // advances the typewriter.
    let typewriter = Arc::new(Typewriter::new());
    register_render_handlers(&ui_queue, &typewriter);
    let render_queue = Arc::clone(&ui_queue);
    let render_tw = Arc::clone(&typewriter);
    let render_task = tokio::spawn(async move {
        loop {
            render_queue.process_events(None, Some(RENDER_TICK));
            render_tw.tick();
            tokio::time::sleep(RENDER_TICK).await;
        }
    });

    println!("quill — session {}", agent.session().id);
    println!("type a request, /help for commands, /exit to quit");

    let exit_code = loop {
        match read_line("\n› ").await? {
            Input::Interrupt => break 130,
            Input::Eof => break 0,
            Input::Line(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if line == "/exit" || line == "/quit" {
                    break 0;
                }
                if CommandRegistry::is_command(&line) {
                    if commands.dispatch(&line).await {
                        refresh_provider(&mut agent, &model_config, &view);
                    } else {
                        println!("unknown command — /help lists commands");
                    }
                    continue;
                }

                // A running turn is cancellable with Ctrl-C.
                let (cancel_tx, mut cancel_rx) = oneshot::channel();
                let ctrlc = tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        let _ = cancel_tx.send(());
                    }
                });
                let outcome = agent.submit_with_cancel(&line, &mut cancel_rx).await?;
                ctrlc.abort();

                // Let the bridge and render task drain before prompting again.
                tokio::time::sleep(Duration::from_millis(80)).await;
                typewriter.flush();

                match outcome {
                    TurnOutcome::Completed => {}
                    TurnOutcome::Canceled => println!("\n[canceled]"),
                    TurnOutcome::Aborted => println!("\n[turn aborted — see error above]"),
                    TurnOutcome::Terminated => {
                        println!("\n[task complete]");
                    }
                }
            }
        }
    };

    render_task.abort();
    bridge.stop();
    pool.shutdown().await;
    Ok(exit_code)
}

fn refresh_provider(
    agent: &mut Agent,
    model_config: &Arc<Mutex<quill_config::ModelConfig>>,
    view: &Arc<RegistryAgentView>,
) {
    let current = model_config.lock().expect("model config lock").clone();
    if current.name != agent.provider_model() {
        view.set_model_name(current.name.clone());
        agent.set_provider(Arc::new(OpenAiCompatProvider::from_config(&current)));
        println!("model switched to {}", current.name);
    }
}

// ── Terminal input ────────────────────────────────────────────────────────────

enum Input {
    Line(String),
    Eof,
    Interrupt,
}

async fn read_line(prompt: &str) -> anyhow::Result<Input> {
    print!("{prompt}");
    std::io::stdout().flush().ok();
    let read = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(_) => None,
        }
    });
    tokio::select! {
        _ = tokio::signal::ctrl_c() => Ok(Input::Interrupt),
        result = read => match result? {
            Some(line) => Ok(Input::Line(line)),
            None => Ok(Input::Eof),
        },
    }
}

/// Interactive y/N approval prompt on stdin.
struct StdinApproval;

#[async_trait::async_trait]
impl ApprovalHandler for StdinApproval {
    async fn request_approval(
        &self,
        descriptor: &ToolDescriptor,
        arguments: &str,
    ) -> ApprovalDecision {
        println!("\n⚠ tool {} wants to run with arguments: {arguments}", descriptor.name);
        match read_line("allow? [y/N] ").await {
            Ok(Input::Line(answer)) => {
                let answer = answer.trim().to_lowercase();
                if answer == "y" || answer == "yes" {
                    ApprovalDecision::Approved
                } else {
                    ApprovalDecision::Refused
                }
            }
            Ok(Input::Interrupt) => ApprovalDecision::Canceled,
            _ => ApprovalDecision::Refused,
        }
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Releases streamed text at a readable pace (~20 chars per 50 ms).
struct Typewriter {
    buf: Mutex<String>,
    last_release: Mutex<Instant>,
}

impl Typewriter {
    fn new() -> Self {
        Self {
            buf: Mutex::new(String::new()),
            last_release: Mutex::new(Instant::now()),
        }
    }

    fn push(&self, text: &str) {
        self.buf.lock().expect("typewriter lock").push_str(text);
    }

    fn tick(&self) {
        let mut last = self.last_release.lock().expect("typewriter lock");
        if last.elapsed() < TYPEWRITER_INTERVAL {
            return;
        }
        *last = Instant::now();
        drop(last);

        let mut buf = self.buf.lock().expect("typewriter lock");
        if buf.is_empty() {
            return;
        }
        let mut cut = TYPEWRITER_CHARS_PER_TICK.min(buf.len());
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let chunk: String = buf.drain(..cut).collect();
        print!("{chunk}");
        std::io::stdout().flush().ok();
    }

    fn flush(&self) {
        let mut buf = self.buf.lock().expect("typewriter lock");
        if !buf.is_empty() {
            print!("{}", *buf);
            std::io::stdout().flush().ok();
            buf.clear();
        }
    }
}

fn register_render_handlers(ui_queue: &Arc<UiEventQueue>, typewriter: &Arc<Typewriter>) {
    let tw = Arc::clone(typewriter);
    ui_queue.subscribe(
        EventKind::MessageDelta,
        0,
        Arc::new(move |ev| {
            if let AgentEvent::MessageDelta { delta } = ev {
                tw.push(delta);
            }
        }),
    );
    let tw = Arc::clone(typewriter);
    ui_queue.subscribe(
        EventKind::MessageStop,
        0,
        Arc::new(move |_| {
            tw.flush();
            println!();
        }),
    );
    ui_queue.subscribe(
        EventKind::ToolCallStart,
        0,
        Arc::new(|ev| {
            if let AgentEvent::ToolCallStart { name, .. } = ev {
                println!("⚙ {name} …");
            }
        }),
    );
    ui_queue.subscribe(
        EventKind::ToolResult,
        0,
        Arc::new(|ev| {
            if let AgentEvent::ToolResult { name, result, .. } = ev {
                let first_line = result.lines().next().unwrap_or("");
                let more = result.lines().count().saturating_sub(1);
                if more > 0 {
                    println!("✓ {name}: {first_line} (+{more} lines)");
                } else {
                    println!("✓ {name}: {first_line}");
                }
            }
        }),
    );
    ui_queue.subscribe(
        EventKind::Error,
        0,
        Arc::new(|ev| {
            if let AgentEvent::Error { message } = ev {
                eprintln!("✗ {message}");
            }
        }),
    );
}
