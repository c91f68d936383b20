//! mcpilot CLI: chat with a local model that can use MCP tool servers.

mod commands;

use anyhow::{Context, Result, bail};
use clap::Parser;
use commands::Command;
use mcpilot_api::{OllamaProvider, RetryConfig};
use mcpilot_config::{AppConfig, CliOverrides};
use mcpilot_core::{Orchestrator, TurnOutcome, build_system_prompt};
use mcpilot_mcp::CapabilityRegistry;
use mcpilot_types::ToolExecutor;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "mcpilot",
    version,
    about = "Chat with a local model that can use MCP tool servers"
)]
struct Cli {
    /// Send a single prompt and print the response (non-interactive)
    #[arg(short, long)]
    print: Option<String>,

    /// Config file to use instead of ~/.mcpilot/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model to use (overrides MCPILOT_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Model API base URL (overrides OLLAMA_HOST)
    #[arg(long)]
    base_url: Option<String>,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = AppConfig::load(CliOverrides {
        config_path: cli.config,
        model: cli.model,
        base_url: cli.base_url,
    })
    .context("Failed to load configuration")?;

    let registry = Arc::new(CapabilityRegistry::from_config(&config.mcp));
    start_servers(&registry, &config).await;

    let result = match &cli.print {
        Some(prompt) => match new_session(&config, &registry) {
            Ok(session) => print_once(&session, prompt).await,
            Err(e) => Err(e),
        },
        None => repl(&config, &registry).await,
    };

    registry.shutdown().await;
    result
}

/// Connect every configured server and report what happened.
async fn start_servers(registry: &CapabilityRegistry, config: &AppConfig) {
    let descriptors = config.server_descriptors();
    if descriptors.is_empty() {
        return;
    }

    let summary = registry.initialize(&descriptors).await;
    for (name, reason) in &summary.failed {
        eprintln!("Warning: tool server '{name}' failed to start: {reason}");
    }
    for ov in &summary.overridden {
        eprintln!(
            "Warning: {} '{}' from '{}' is shadowed by '{}'",
            ov.kind, ov.key, ov.previous, ov.current
        );
    }
}

fn new_session(config: &AppConfig, registry: &Arc<CapabilityRegistry>) -> Result<Orchestrator> {
    let tools = registry.all_tools();
    let resources = registry.all_resources();
    let prompts = registry.all_prompts();
    if tools.is_empty() && resources.is_empty() && prompts.is_empty() {
        tracing::warn!("No capabilities available; the model will have no tool access");
    }
    let system_prompt = build_system_prompt(&tools, &resources, &prompts);

    let provider = OllamaProvider::new(&config.base_url, config.model_timeout)
        .context("Failed to create model client")?
        .with_retry_config(RetryConfig::with_retries(config.max_retries));

    let executor: Arc<dyn ToolExecutor> = Arc::clone(registry) as Arc<dyn ToolExecutor>;
    Ok(Orchestrator::new(
        Arc::new(provider),
        executor,
        config.model.clone(),
        registry.tool_definitions(),
        system_prompt,
    ))
}

/// Run one turn, writing assistant text to stdout and status to stderr.
async fn run_turn(session: &Orchestrator, text: &str) -> TurnOutcome {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut status = io::stderr();
    session
        .submit_user_message(text, |event| {
            commands::render_event(&mut out, &mut status, event)
        })
        .await
}

async fn print_once(session: &Orchestrator, prompt: &str) -> Result<()> {
    match run_turn(session, prompt).await {
        TurnOutcome::Completed => Ok(()),
        TurnOutcome::ModelFailed => bail!("the model request failed"),
        TurnOutcome::IterationLimit => bail!("the request needed too many tool-use steps"),
        TurnOutcome::Rejected => bail!("another request is already running"),
    }
}

async fn repl(config: &AppConfig, registry: &Arc<CapabilityRegistry>) -> Result<()> {
    let session = new_session(config, registry)?;
    let stdin = io::stdin();

    eprintln!(
        "mcpilot v{} (model: {}, {} tool server(s), {} tool(s))",
        env!("CARGO_PKG_VERSION"),
        config.model,
        registry.client_count(),
        session.tools().len()
    );
    eprintln!("Type your message, or /help for commands. Press Ctrl+D to exit.\n");

    loop {
        eprint!("> ");
        io::stderr().flush()?;

        let mut input = String::new();
        let bytes_read = stdin.lock().read_line(&mut input)?;
        if bytes_read == 0 {
            eprintln!();
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match commands::parse(input) {
            None => {
                run_turn(&session, input).await;
                println!();
            }
            Some(Command::Quit) => break,
            Some(Command::Help) => commands::print_help(),
            Some(Command::Clear) => {
                session.clear_history();
                eprintln!("Conversation cleared.");
            }
            Some(Command::Tools) => commands::print_tools(&registry.all_tools()),
            Some(Command::Resources) => commands::print_resources(&registry.all_resources()),
            Some(Command::Prompts) => commands::print_prompts(&registry.all_prompts()),
            Some(Command::Servers) => commands::print_servers(&registry.server_summary()),
            Some(Command::Read(uri)) => match registry.read_resource(uri).await {
                Ok(contents) => commands::print_resource_contents(&mut io::stdout(), &contents),
                Err(e) => eprintln!("Error: {e}"),
            },
            Some(Command::Prompt { name, arguments }) => {
                match registry.get_prompt(name, &arguments).await {
                    Ok(result) => commands::print_prompt_result(&mut io::stdout(), &result),
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
            Some(Command::MissingArgument(usage)) => eprintln!("{usage}"),
            Some(Command::Unknown(cmd)) => {
                eprintln!("Unknown command: {cmd}. Type /help for available commands.");
            }
        }
    }

    Ok(())
}
