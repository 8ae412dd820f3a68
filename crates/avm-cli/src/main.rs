use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use avm_interface::{CallResults, ProtocolVersion, RunParameters};
use avm_runtime::{
    Avm, AvmConfig, FileDataStore, HostImports, Interpreter, ParticleRunner, ServiceInvoker,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

mod services;

use services::StaticServices;

#[derive(Parser)]
#[command(name = "avm", about = "Run AIR particles through an AVM interpreter module")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one particle on this peer and print the outcome as JSON
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the avm.toml configuration
    #[arg(long, default_value = "avm.toml")]
    config: PathBuf,

    /// AIR script to execute
    #[arg(long)]
    script: PathBuf,

    /// State returned by the previous execution
    #[arg(long)]
    prev_data: Option<PathBuf>,

    /// Incoming particle state
    #[arg(long)]
    data: Option<PathBuf>,

    #[arg(long)]
    init_peer_id: String,

    /// Defaults to the configured peer id, then to the init peer id
    #[arg(long)]
    current_peer_id: Option<String>,

    #[arg(long, default_value = "")]
    particle_id: String,

    /// Particle time-to-live in milliseconds
    #[arg(long, default_value_t = 0)]
    ttl: u32,

    /// JSON object of call id -> {ret_code, result} answering earlier requests
    #[arg(long)]
    call_results: Option<PathBuf>,

    /// JSON object of "service.function" -> {ret_code, result}; runs the
    /// particle until no call requests remain
    #[arg(long)]
    services: Option<PathBuf>,

    /// Keep particle state in this directory: the previous data is loaded
    /// from it and the new data stored back
    #[arg(long, conflicts_with_all = ["prev_data", "services"])]
    state_dir: Option<PathBuf>,

    /// Where to write the raw state bytes of the outcome
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the outcome
    fmt()
        .with_env_filter(EnvFilter::from_env("AVM_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = AvmConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let mut interpreter_config = config.interpreter_config();

    let current_peer_id = args
        .current_peer_id
        .clone()
        .or_else(|| interpreter_config.current_peer_id.clone())
        .unwrap_or_else(|| args.init_peer_id.clone());
    interpreter_config.current_peer_id = Some(current_peer_id.clone());

    let services: Option<Arc<dyn ServiceInvoker>> = match &args.services {
        Some(path) => {
            let services = StaticServices::from_file(path).await?;
            tracing::info!(entries = services.len(), "Loaded static services");
            Some(Arc::new(services))
        }
        // the callback protocol needs a handler even for a single invoke
        None if interpreter_config.protocol == ProtocolVersion::Callback => {
            Some(Arc::new(StaticServices::default()))
        }
        None => None,
    };

    let mut imports = HostImports::new();
    if let Some(services) = &services {
        imports = imports.with_shared_services(Arc::clone(services));
    }

    tracing::info!(
        wasm = %config.interpreter.wasm_path.display(),
        protocol = %interpreter_config.protocol,
        "Starting interpreter"
    );
    let mut interpreter =
        Interpreter::from_file(&config.interpreter.wasm_path, interpreter_config, imports).await?;

    let script = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("Failed to read script {}", args.script.display()))?;
    let prev_data = read_optional(args.prev_data.as_deref()).await?;
    let data = read_optional(args.data.as_deref()).await?;
    let call_results: CallResults = match &args.call_results {
        Some(path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read call results {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid call results {}", path.display()))?
        }
        None => CallResults::new(),
    };

    let run_params = RunParameters::new(args.init_peer_id.clone(), current_peer_id)
        .with_particle_id(args.particle_id.clone())
        .with_ttl(args.ttl)
        .with_timestamp(now_millis())
        .with_limits(config.limits.particle);

    let (state, rendered) = match (&args.state_dir, args.services.is_some(), services) {
        (Some(dir), _, _) => {
            let mut avm = Avm::new(interpreter, FileDataStore::new(dir.clone()))?;
            let outcome = avm.call(&script, &data, &run_params, &call_results)?;
            tracing::info!(
                memory_delta = outcome.memory_delta,
                execution_time_ms = outcome.execution_time.as_millis() as u64,
                "Particle state persisted"
            );
            let rendered = serde_json::to_string_pretty(&outcome)?;
            (outcome.result.data, rendered)
        }
        (None, true, Some(services)) => {
            let mut runner =
                ParticleRunner::new(interpreter, services).with_max_rounds(config.limits.max_rounds);
            let outcome = runner.run(&script, &prev_data, &data, &run_params, call_results)?;
            let rendered = serde_json::to_string_pretty(&outcome)?;
            (outcome.result.data, rendered)
        }
        _ => {
            let result =
                interpreter.invoke(&script, &prev_data, &data, &run_params, &call_results)?;
            let rendered = serde_json::to_string_pretty(&result)?;
            (result.data, rendered)
        }
    };

    println!("{rendered}");

    if let Some(path) = &args.output {
        tokio::fs::write(path, &state)
            .await
            .with_context(|| format!("Failed to write state to {}", path.display()))?;
        tracing::info!(path = %path.display(), size = state.len(), "Wrote particle state");
    }

    Ok(())
}

async fn read_optional(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => Ok(Vec::new()),
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
