use anyhow::{Context, Result};
use ctrun::cli::{Args, ConfigDiscovery, ExecutionMode, RunConfig, RunOverrides, RunnerConfig, ValidateConfig};
use ctrun::report::{self, Summary};
use ctrun::task::{ContainerEngine, Scheduler};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(report::EXIT_SETUP_ERROR);
        }
    };

    let result = match mode {
        ExecutionMode::Run(config) => run(config).await,
        ExecutionMode::Validate(config) => validate(config),
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            Ok(report::EXIT_SUCCESS)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(report::EXIT_SETUP_ERROR)
        }
    }
}

/// Install the global subscriber.
///
/// Priority: RUST_LOG env var > --verbose > log_level from the config > info
fn init_logging(verbose: bool, configured: Option<tracing::Level>) {
    let level = if verbose {
        "debug".to_string()
    } else {
        configured
            .map(|level| level.as_str().to_ascii_lowercase())
            .unwrap_or_else(|| "info".to_string())
    };
    let default_filter = format!("ctrun={}", level);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter)))
        .init();
}

fn load_config(explicit: Option<&Path>, overrides: &RunOverrides) -> Result<(PathBuf, RunnerConfig)> {
    let path = ConfigDiscovery::resolve(explicit)?;
    let mut config = RunnerConfig::from_toml_file(&path)?;
    config.apply_overrides(overrides);
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok((path, config))
}

async fn run(run: RunConfig) -> Result<u8> {
    let (path, config) = load_config(run.config_path.as_deref(), &run.overrides)?;
    init_logging(run.verbose, config.log_level()?);

    info!("Starting ctrun with configuration {:?}", path);
    let tasks = config.resolve_tasks()?;

    let engine = connect_engine(&config).await?;
    let scheduler = Scheduler::new(engine, config.scheduler_config());

    let started = Instant::now();
    let verdicts = scheduler.run(tasks).await?;
    let elapsed = started.elapsed();

    print!("{}", report::render_console(&verdicts, elapsed));

    if let Some(junit_path) = &config.junit_output {
        report::junit::write(junit_path, &verdicts, elapsed)
            .with_context(|| format!("failed to write JUnit report {}", junit_path.display()))?;
        info!("JUnit report written to {:?}", junit_path);
    }

    if let Some(json_path) = &config.json_output {
        report::write_json(json_path, &verdicts)
            .with_context(|| format!("failed to write JSON report {}", json_path.display()))?;
        info!("JSON report written to {:?}", json_path);
    }

    Ok(Summary::from_verdicts(&verdicts).exit_code())
}

fn validate(validate: ValidateConfig) -> Result<u8> {
    let (path, config) = load_config(validate.config_path.as_deref(), &RunOverrides::default())?;
    init_logging(validate.verbose, config.log_level()?);

    let tasks = config.resolve_tasks()?;
    let timeout = config
        .timeout_secs
        .map(|secs| format!("{}s", secs))
        .unwrap_or_else(|| "none".to_string());

    println!("Configuration {} is valid", path.display());
    println!(
        "  {} tasks, at most {} running, poll every {}s, timeout {}, kill_on_timeout={}, delete_failed={}",
        tasks.len(),
        config.max_running_tasks,
        config.poll_interval_secs,
        timeout,
        config.kill_on_timeout,
        config.delete_failed
    );

    for (i, task) in tasks.iter().enumerate() {
        println!();
        println!("  {}. {} ({})", i + 1, task.name, task.image);
        println!("      entrypoint: {:?}", task.entrypoint);
        println!("      command:    {:?}", task.command);
        if validate.verbose {
            for (key, value) in &task.environment {
                println!("      env:        {}={}", key, value);
            }
        }
        if task.assertions.is_empty() {
            println!("      passes when the container exits on its own");
        }
        for assertion in &task.assertions {
            println!("      assert:     {}", assertion);
        }
    }

    Ok(report::EXIT_SUCCESS)
}

#[cfg(feature = "containers")]
async fn connect_engine(config: &RunnerConfig) -> Result<Arc<dyn ContainerEngine>> {
    use ctrun::container::{ContainerClient, ContainerOrchestrator};

    let client = ContainerClient::with_config(config.client_config())
        .await
        .context("failed to connect to the container engine")?;

    match client.runtime_type().await {
        Ok(runtime) => info!("Using {} runtime", runtime),
        Err(e) => warn!("Could not detect the container runtime: {}", e),
    }

    Ok(Arc::new(ContainerOrchestrator::with_client(
        client,
        config.orchestrator_config(),
    )))
}

#[cfg(not(feature = "containers"))]
async fn connect_engine(_config: &RunnerConfig) -> Result<Arc<dyn ContainerEngine>> {
    warn!("Built without the `containers` feature");
    anyhow::bail!("no container engine available: rebuild with the `containers` feature")
}
