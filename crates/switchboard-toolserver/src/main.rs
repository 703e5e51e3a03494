use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchboard_toolserver::{serve, Calculator, Echo, ServeOptions, Toolset};

#[derive(Parser)]
#[command(
    name = "switchboard-toolserver",
    about = "Reference MCP tool servers spoken over stdio",
    version
)]
struct Cli {
    /// Toolset to serve
    #[arg(value_enum)]
    toolset: ToolsetKind,

    /// Answer the initialize request with an error (testing aid)
    #[arg(long)]
    reject_initialize: bool,

    /// Read requests but never answer (testing aid)
    #[arg(long)]
    mute: bool,

    /// Exit after answering N tools/call requests (testing aid)
    #[arg(long, value_name = "N")]
    exit_after_calls: Option<u64>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ToolsetKind {
    Calculator,
    Echo,
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_logging();

    let cli = Cli::parse();
    let toolset: Arc<dyn Toolset> = match cli.toolset {
        ToolsetKind::Calculator => Arc::new(Calculator),
        ToolsetKind::Echo => Arc::new(Echo),
    };
    let options = ServeOptions {
        reject_initialize: cli.reject_initialize,
        mute: cli.mute,
        exit_after_calls: cli.exit_after_calls,
    };

    serve(toolset, tokio::io::stdin(), tokio::io::stdout(), options).await?;
    Ok(())
}

fn initialize_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout carries the protocol; diagnostics must stay on stderr.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
