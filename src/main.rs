//! foundry-deploy CLI - DAG deployment executor

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use foundry_deploy::ast::{DeploymentPlan, EnvironmentType, Region};
use foundry_deploy::config::DeployConfig;
use foundry_deploy::dag::{self, ExecutionOrder};
use foundry_deploy::error::{DeployError, FixSuggestion, Result};
use foundry_deploy::provider::create_provider;
use foundry_deploy::queue::{handler_fn, MemoryQueue, RequestEnvelope, Requester, Worker};
use foundry_deploy::resilience::RetryPolicy;
use foundry_deploy::runtime::{ApplyOutcome, Executor, ModuleState};
use foundry_deploy::store::{FileStateStore, StateStore};

#[derive(Parser)]
#[command(name = "foundry-deploy")]
#[command(about = "foundry-deploy - DAG deployment executor for AI Foundry infrastructure")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a plan file
    Validate {
        /// Path to plan YAML file
        file: PathBuf,
    },

    /// Print the execution waves of a plan
    Plan {
        /// Path to plan YAML file
        file: PathBuf,
    },

    /// Apply a plan
    Apply {
        /// Path to plan YAML file
        file: PathBuf,

        /// Override environment (dev, staging, prod, sweden)
        #[arg(short, long)]
        environment: Option<EnvironmentType>,

        /// Override region (canadaeast, eastus, westeurope, swedencentral)
        #[arg(short = 'l', long)]
        region: Option<Region>,

        /// Module provider (mock, command)
        #[arg(short, long, default_value = "command")]
        provider: String,

        /// State file for idempotent re-runs
        #[arg(long)]
        state: Option<PathBuf>,

        /// Skip later waves as soon as a module fails
        #[arg(long)]
        fail_fast: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Write the event log as JSON
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Run requester and workers over in-process queues
    QueueDemo {
        /// Number of concurrent requests
        #[arg(short = 'n', long, default_value_t = 5)]
        requests: usize,

        /// Number of worker loops
        #[arg(short, long, default_value_t = 2)]
        workers: usize,

        /// Response timeout in seconds (defaults to config)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Initialize tracing (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => validate_plan(&file),
        Commands::Plan { file } => show_plan(&file),
        Commands::Apply {
            file,
            environment,
            region,
            provider,
            state,
            fail_fast,
            format,
            events,
        } => {
            let options = ApplyOptions {
                environment,
                region,
                provider,
                state,
                fail_fast,
                format,
                events,
            };
            apply_plan(&file, options).await
        }
        Commands::QueueDemo {
            requests,
            workers,
            timeout,
        } => queue_demo(requests, workers, timeout).await,
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    }
}

fn print_error(e: &DeployError) {
    match e {
        DeployError::PlanInvalid { issues } => {
            eprintln!("{} plan has {} issue(s)", "Error:".red().bold(), issues.len());
            for issue in issues {
                eprintln!("  {} {}", "✗".red(), issue);
                if let Some(suggestion) = issue.fix_suggestion() {
                    eprintln!("    {} {}", "Fix:".yellow(), suggestion);
                }
            }
        }
        _ => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
        }
    }
}

fn load_plan(file: &Path) -> Result<DeploymentPlan> {
    let yaml = std::fs::read_to_string(file)?;
    DeploymentPlan::from_yaml(&yaml)
}

fn validate_plan(file: &Path) -> Result<bool> {
    let plan = load_plan(file)?;
    dag::validate(&plan).into_result()?;
    let order = dag::plan(&plan)?;

    println!("{} Plan '{}' is valid", "✓".green(), file.display());
    println!("  Name: {}", plan.name);
    println!("  Modules: {}", order.module_count());
    println!("  Waves: {}", order.len());
    println!("  Outputs: {}", plan.outputs.len());

    Ok(true)
}

fn show_plan(file: &Path) -> Result<bool> {
    let plan = load_plan(file)?;
    let order = dag::plan(&plan)?;

    println!(
        "{} {} ({} modules, {} waves)",
        "→".cyan(),
        plan.name.cyan().bold(),
        order.module_count(),
        order.len()
    );
    print_waves(&plan, &order);

    Ok(true)
}

fn print_waves(plan: &DeploymentPlan, order: &ExecutionOrder) {
    for (index, wave) in order.waves().iter().enumerate() {
        println!("  {} {}", "wave".dimmed(), index + 1);
        for module in wave {
            let deps = plan
                .module(module)
                .map(|m| m.depends_on.join(", "))
                .unwrap_or_default();
            if deps.is_empty() {
                println!("    {}", module);
            } else {
                println!("    {} {}", module, format!("← {}", deps).dimmed());
            }
        }
    }
}

struct ApplyOptions {
    environment: Option<EnvironmentType>,
    region: Option<Region>,
    provider: String,
    state: Option<PathBuf>,
    fail_fast: bool,
    format: Format,
    events: Option<PathBuf>,
}

async fn apply_plan(file: &Path, options: ApplyOptions) -> Result<bool> {
    let config = DeployConfig::load()?.with_env()?;
    let mut plan = load_plan(file)?;
    if options.fail_fast {
        plan.fail_fast = true;
    }

    let params = config.resolve_params(plan.params, options.environment, options.region);
    let provider = create_provider(&options.provider)?;

    let mut executor =
        Executor::new(provider).with_retry(RetryPolicy::new(config.retry_config()));
    if let Some(path) = options.state.or(config.defaults.state_file.clone()) {
        let store: Arc<dyn StateStore> = Arc::new(FileStateStore::open(path)?);
        executor = executor.with_state_store(store);
    }

    if options.format == Format::Text {
        println!(
            "{} Applying '{}' | provider: {} | {} / {}",
            "→".cyan(),
            plan.name.cyan().bold(),
            options.provider.cyan(),
            params.environment,
            params.region
        );
    }

    // Ctrl-C skips every module not yet started
    let cancel = executor.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling remaining modules");
            cancel.cancel();
        }
    });

    let result = executor.apply(&plan, params).await;
    ctrl_c.abort();
    let outcome = result?;

    if let Some(path) = &options.events {
        executor.event_log().write_json(path)?;
    }

    match options.format {
        Format::Json => {
            let body = serde_json::to_string_pretty(&outcome).map_err(|e| DeployError::Config {
                reason: format!("Failed to serialize outcome: {}", e),
            })?;
            println!("{}", body);
        }
        Format::Text => print_outcome(&outcome),
    }

    Ok(outcome.is_success())
}

fn print_outcome(outcome: &ApplyOutcome) {
    for (module, state) in &outcome.states {
        let marker = match state {
            ModuleState::Applied => "✓".green(),
            ModuleState::Failed => "✗".red(),
            _ => "-".yellow(),
        };
        let unchanged = if outcome.unchanged.contains(module) {
            " (unchanged)".dimmed().to_string()
        } else {
            String::new()
        };
        println!("  {} {} {}{}", marker, module, state.as_str().dimmed(), unchanged);
    }

    if !outcome.outputs.is_empty() {
        println!("{}", "Outputs:".cyan().bold());
        for (name, value) in &outcome.outputs {
            println!("  {} = {}", name, display_value(value));
        }
    }

    if outcome.is_success() {
        println!(
            "{} {} applied in {}ms",
            "✓".green(),
            outcome.count(ModuleState::Applied),
            outcome.duration_ms
        );
    } else {
        println!("{}", "Failures:".red().bold());
        for line in outcome.report.to_string().lines() {
            println!("  {}", line);
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn queue_demo(requests: usize, workers: usize, timeout: Option<u64>) -> Result<bool> {
    let config = DeployConfig::load()?.with_env()?;
    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.response_timeout());

    let request_queue = Arc::new(MemoryQueue::new(config.queue.request_queue.clone()));
    let response_queue = Arc::new(MemoryQueue::new(config.queue.response_queue.clone()));

    let handler = handler_fn(|request: RequestEnvelope| async move {
        let reply = match request.payload.as_str() {
            Some("ping") => json!("pong"),
            _ => json!({ "echo": request.payload.clone() }),
        };
        Ok::<Value, anyhow::Error>(reply)
    });
    let mut worker = Worker::new(
        request_queue.clone(),
        response_queue.clone(),
        Arc::new(handler),
        config.worker_config(),
    );
    if let Some(name) = &config.queue.poison_queue {
        worker = worker.with_poison_queue(Arc::new(MemoryQueue::new(name.clone())));
    }
    let shutdown = CancellationToken::new();
    let pool = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run_pool(workers.max(1), shutdown).await })
    };

    let requester = Requester::new(request_queue, response_queue, config.requester_config());
    println!(
        "{} Sending {} request(s) to {} worker(s)",
        "→".cyan(),
        requests,
        workers.max(1)
    );

    let started = Instant::now();
    let mut sends = JoinSet::new();
    for i in 0..requests {
        let requester = requester.clone();
        let payload = if i == 0 { json!("ping") } else { json!({ "query": i }) };
        sends.spawn(async move { (i, requester.send(payload, timeout).await) });
    }

    let mut answered = 0;
    while let Some(joined) = sends.join_next().await {
        match joined {
            Ok((i, Ok(response))) => {
                answered += 1;
                println!(
                    "  {} #{} {} {}",
                    "✓".green(),
                    i,
                    response.correlation_id.dimmed(),
                    display_value(&response.payload)
                );
            }
            Ok((i, Err(e))) => println!("  {} #{} {}", "✗".red(), i, e),
            Err(e) => println!("  {} send task failed: {}", "✗".red(), e),
        }
    }

    shutdown.cancel();
    let stats = pool.await.unwrap_or_default();

    println!(
        "{} {}/{} answered in {}ms (worker received {}, answered {})",
        if answered == requests { "✓".green() } else { "✗".red() },
        answered,
        requests,
        started.elapsed().as_millis(),
        stats.received,
        stats.answered
    );

    Ok(answered == requests)
}
