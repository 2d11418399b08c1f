use std::sync::Arc;

use aa_domain::config::Config;
use aa_domain::entities::PlanType;
use aa_domain::ids::{CompletionId, ReportId};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aa_orchestrator::runtime::{run_turn, TurnInput};

mod bootstrap;
mod demo;

#[derive(Parser)]
#[command(name = "aa-orchestrator-demo", version)]
struct Cli {
    /// Path to a TOML config file. Falls back to built-in defaults.
    #[arg(long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one demo turn against the in-memory collaborators and print the
    /// SSE-shaped event stream to stdout.
    Run {
        /// The user prompt driving the turn.
        prompt: String,
    },
    /// Validate config and report any issues without starting anything.
    Doctor,
    /// Print the effective config as TOML.
    ShowConfig,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(load_config(&cli.config));

    match cli.command.unwrap_or(Command::Run { prompt: "how is revenue trending?".into() }) {
        Command::Run { prompt } => {
            init_tracing(&config);
            bootstrap::validate_or_bail(&config)?;
            run_demo_turn(config, prompt).await
        }
        Command::Doctor => {
            init_tracing(&config);
            bootstrap::validate_or_bail(&config)?;
            println!("config ok");
            Ok(())
        }
        Command::ShowConfig => {
            println!("{}", toml::to_string_pretty(&*config)?);
            Ok(())
        }
        Command::Version => {
            println!("aa-orchestrator-demo {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: &str) -> Config {
    match std::fs::read_to_string(path) {
        Ok(raw) => match toml::from_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to parse {path}: {err}; falling back to defaults");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,aa_orchestrator=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();
    if let Some(endpoint) = &config.observability.otlp_endpoint {
        tracing::info!(
            endpoint,
            service = %config.observability.service_name,
            sample_rate = config.observability.sample_rate,
            "otlp exporter configured (wiring left to deployment tooling)"
        );
    }
}

async fn run_demo_turn(config: Arc<Config>, prompt: String) -> anyhow::Result<()> {
    let (storage, watcher, llm, tool_executor) = demo::build_demo_collaborators();
    let engine = Arc::new(bootstrap::build_engine(
        config,
        storage,
        watcher,
        llm,
        tool_executor,
        Arc::new(demo::demo_tool_registry()),
    ));

    let input = TurnInput {
        report_id: ReportId::new(),
        completion_id: CompletionId::new(),
        prompt,
        model: None,
        build_id: None,
        schema_filter: Default::default(),
        plan_type: PlanType::Action,
    };

    let (execution_id, mut events) = run_turn(engine, input);
    println!("agent_execution_id = {execution_id}");
    while let Some(event) = events.recv().await {
        println!(
            "[{:>4}] {:<22} {}",
            event.seq,
            event.event_name,
            serde_json::to_string(&event.data).unwrap_or_default()
        );
    }
    Ok(())
}
