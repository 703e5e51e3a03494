use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use switchboard_agents::{AgentDefinition, AgentRegistry};
use switchboard_config::AppConfig;
use switchboard_core::{QueryError, QueryRequest};
use switchboard_mcp::{CatalogTimeouts, ToolCatalog};
use switchboard_metrics::TimingRecorder;
use switchboard_provider::{OpenAiChatProvider, OpenAiOptions};
use switchboard_runner::{SessionLimits, SessionRunner};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "MCP tool-server orchestrator with multi-agent hand-off", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "switchboard.yaml")]
    config: PathBuf,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single query through the orchestrator
    Query {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Starting agent (defaults to the configured routing default)
        #[arg(short, long)]
        agent: Option<String>,
    },

    /// Interactive mode; each line runs as a fresh session
    Chat,

    /// List the tools currently routable through the catalog
    Tools,

    /// Show tool server lifecycle states
    Servers,

    /// Show operation timing statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("Loading configuration from: {:?}", cli.config);
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let app = App::assemble(config).await?;

    let result = match cli.command {
        Commands::Query { message, agent } => run_query(&app, message, agent).await,
        Commands::Chat => interactive_chat(&app).await,
        Commands::Tools => list_tools(&app).await,
        Commands::Servers => show_servers(&app).await,
        Commands::Stats => show_stats(&app),
    };

    app.catalog.shutdown_all().await;
    result
}

/// Everything a command needs, wired together once at startup.
struct App {
    catalog: Arc<ToolCatalog>,
    metrics: Arc<TimingRecorder>,
    runner: SessionRunner,
}

impl App {
    async fn assemble(config: AppConfig) -> Result<Self> {
        let metrics = Arc::new(TimingRecorder::new());
        let timeouts = CatalogTimeouts {
            handshake: Duration::from_millis(config.session.handshake_timeout_ms),
            call: Duration::from_millis(config.session.tool_timeout_ms),
            ..CatalogTimeouts::default()
        };
        let catalog = Arc::new(ToolCatalog::new(timeouts, metrics.clone()));

        // Servers start concurrently; a failed one is logged and skipped so
        // the rest of the system comes up with whatever became Ready.
        let registrations = config
            .enabled_servers()
            .into_iter()
            .map(|(name, spec)| {
                let catalog = catalog.clone();
                async move {
                    let outcome = catalog.register(name.as_str(), spec).await;
                    (name, outcome)
                }
            })
            .collect::<Vec<_>>();
        for (name, outcome) in join_all(registrations).await {
            if let Err(err) = outcome {
                warn!("Tool server '{}' failed to start: {}", name, err);
            }
        }

        let mut registry = AgentRegistry::new(config.routing.default_agent.clone());
        for (name, settings) in &config.agents {
            registry.register(
                AgentDefinition::new(name.as_str(), settings.instructions.as_str())
                    .with_servers(settings.servers.iter().map(String::as_str))
                    .with_handoffs(settings.handoffs.iter().cloned()),
            )?;
        }
        registry.validate_handoff_graph()?;

        let mut options = OpenAiOptions::new(
            config.provider.base_url.as_str(),
            config.provider.model.as_str(),
        );
        options.temperature = config.provider.temperature;
        options.max_tokens = config.provider.max_tokens as u32;
        options.timeout = Duration::from_millis(config.session.provider_timeout_ms);
        options.api_key = config.provider.api_key.clone();
        let provider = Arc::new(OpenAiChatProvider::new(options)?);

        let limits = SessionLimits {
            step_budget: config.session.step_budget,
            message_limit: config.session.message_limit,
        };
        let runner = SessionRunner::new(
            provider,
            catalog.clone(),
            Arc::new(registry),
            metrics.clone(),
            limits,
        );

        Ok(Self {
            catalog,
            metrics,
            runner,
        })
    }
}

async fn run_query(app: &App, message: String, agent: Option<String>) -> Result<()> {
    let request_id = Uuid::new_v4();
    let mut request = QueryRequest::new(message).with_request_id(request_id);
    if let Some(agent) = agent {
        request = request.with_agent(agent);
    }

    match app.runner.run(request).await {
        Ok(outcome) => {
            println!("\n{}\n", outcome.response);
            println!("═══════════════════════════════════════");
            println!(
                "Agent: {} | Steps: {} | Duration: {}ms",
                outcome.active_agent, outcome.steps_used, outcome.duration_ms
            );
            Ok(())
        }
        Err(err) => {
            let shaped = QueryError::new(&err, Some(request_id));
            eprintln!("❌ {}", serde_json::to_string(&shaped)?);
            Err(err.into())
        }
    }
}

async fn interactive_chat(app: &App) -> Result<()> {
    println!("🤖 Switchboard Interactive Chat");
    println!("Type 'exit' or 'quit' to end the conversation");
    println!("Type 'tools' or 'servers' for a catalog snapshot");
    println!("═══════════════════════════════════════\n");

    loop {
        print!("You> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }
        if input.eq_ignore_ascii_case("tools") {
            list_tools(app).await?;
            continue;
        }
        if input.eq_ignore_ascii_case("servers") {
            show_servers(app).await?;
            continue;
        }

        // Each line is its own session; nothing carries over.
        match app.runner.run(QueryRequest::new(input)).await {
            Ok(outcome) => {
                println!("\n{}\n", outcome.response);
                println!(
                    "(agent: {} | steps: {} | {}ms)\n",
                    outcome.active_agent, outcome.steps_used, outcome.duration_ms
                );
            }
            Err(err) => {
                eprintln!("❌ {err}\n");
            }
        }
    }

    Ok(())
}

async fn list_tools(app: &App) -> Result<()> {
    println!("\n🛠️  Available Tools:");
    println!("═══════════════════════════════════════");

    let tools = app.catalog.list_all().await;
    if tools.is_empty() {
        println!("\n(no tool server is currently ready)");
    }
    for tool in tools {
        println!("\n📦 {} (via {})", tool.name, tool.server);
        println!("   {}", tool.description);
    }
    println!();
    Ok(())
}

async fn show_servers(app: &App) -> Result<()> {
    println!("\n🔌 Tool Servers:");
    println!("═══════════════════════════════════════");

    let status = app.catalog.status().await;
    if status.is_empty() {
        println!("\n(none configured)");
    }
    for (server, state) in status {
        println!("  {server}: {state}");
    }
    println!();
    Ok(())
}

fn show_stats(app: &App) -> Result<()> {
    println!("\n📊 Operation Timings:");
    println!("═══════════════════════════════════════");

    let stats = app.metrics.all_stats();
    if stats.is_empty() {
        println!("\n(no samples recorded yet)");
    }
    for (operation, stats) in stats {
        println!(
            "  {operation}: avg {:.1}ms | min {:.1}ms | max {:.1}ms | count {}",
            stats.avg, stats.min, stats.max, stats.count
        );
    }
    println!();
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
