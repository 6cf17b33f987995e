use std::{path::PathBuf, process::ExitCode, sync::Arc};

use chat_sweeper::{
    config::{DEFAULT_CONFIG_TOML, SweeperConfig},
    db, observability,
    retention::{RetentionSweeper, SweepError, SweepSchedule, start_retention_worker},
    services,
};
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// Config file looked up in the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "chat-sweeper.toml";

/// CLI arguments for the chat retention sweeper
#[derive(Parser, Debug)]
#[command(version, about = "Chat message retention sweeper", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./chat-sweeper.toml if it exists,
    /// otherwise built-in defaults with in-memory stores)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the sweeper on its cron schedule until Ctrl+C / SIGTERM (default)
    Serve,
    /// Run a single sweep, print the outcome as JSON and exit
    ///
    /// Exits non-zero when the sweep fails, for use from cron, a Kubernetes
    /// CronJob or any other external scheduler.
    RunOnce {
        /// Report what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate the config file and print the next scheduled runs
    CheckConfig,
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ./chat-sweeper.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Show enabled compile-time features
    Features,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match args.command {
        Some(Command::RunOnce { dry_run }) => run_once(args.config.as_deref(), dry_run).await,
        Some(Command::CheckConfig) => run_check_config(args.config.as_deref()),
        Some(Command::Init { output, force }) => run_init(output, force),
        Some(Command::Features) => {
            run_features();
            ExitCode::SUCCESS
        }
        Some(Command::Serve) | None => run_server(args.config.as_deref()).await,
    }
}

/// Load the config from the explicit path, the working directory, or defaults.
fn load_config(explicit_path: Option<&str>) -> Result<(SweeperConfig, Option<PathBuf>), String> {
    if let Some(path) = explicit_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }
        let config = SweeperConfig::from_file(&path).map_err(|e| e.to_string())?;
        return Ok((config, Some(path)));
    }

    let cwd_config = PathBuf::from(DEFAULT_CONFIG_FILE);
    if cwd_config.exists() {
        let config = SweeperConfig::from_file(&cwd_config).map_err(|e| e.to_string())?;
        return Ok((config, Some(cwd_config)));
    }

    let config = SweeperConfig::from_str("").map_err(|e| e.to_string())?;
    Ok((config, None))
}

/// Load config and initialize logging, or report why not.
fn load_and_init(explicit_path: Option<&str>) -> Result<(SweeperConfig, Option<PathBuf>), ExitCode> {
    let (config, path) = load_config(explicit_path).map_err(|e| {
        eprintln!("Error: {}", e);
        ExitCode::FAILURE
    })?;

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {}", e);
        return Err(ExitCode::FAILURE);
    }

    match &path {
        Some(path) => tracing::info!(config = %path.display(), "Loaded configuration"),
        None => tracing::warn!(
            "No config file found; using defaults with in-memory stores. \
             Run `chat-sweeper init` to create one."
        ),
    }

    Ok((config, path))
}

/// Build the sweeper and its store handles from configuration.
async fn build_sweeper(config: &SweeperConfig) -> Result<RetentionSweeper, String> {
    let documents = db::create_document_store(&config.database)
        .await
        .map_err(|e| format!("Failed to open document store: {e}"))?;
    let blobs = services::create_blob_storage(&config.storage.blobs)
        .await
        .map_err(|e| format!("Failed to open blob storage: {e}"))?;

    tracing::info!(
        documents = documents.backend_name(),
        blobs = blobs.backend_name(),
        "Stores ready"
    );

    Ok(RetentionSweeper::new(
        documents,
        blobs,
        config.retention.clone(),
    ))
}

/// Run the sweeper daemon
async fn run_server(explicit_config_path: Option<&str>) -> ExitCode {
    let (config, _) = match load_and_init(explicit_config_path) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        return ExitCode::FAILURE;
    }

    let schedule = match SweepSchedule::from_config(&config.schedule) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::error!(error = %e, "Invalid schedule");
            return ExitCode::FAILURE;
        }
    };

    let sweeper = match build_sweeper(&config).await {
        Ok(sweeper) => Arc::new(sweeper),
        Err(e) => {
            tracing::error!(error = %e, "Failed to start sweeper");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(start_retention_worker(
        sweeper,
        schedule,
        config.schedule.run_on_startup,
        shutdown.clone(),
    ));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, waiting for the current sweep to finish...");
    shutdown.cancel();

    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Retention worker task failed");
        return ExitCode::FAILURE;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}

/// Run a single sweep and print the outcome
async fn run_once(explicit_config_path: Option<&str>, dry_run: bool) -> ExitCode {
    let (mut config, _) = match load_and_init(explicit_config_path) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };
    if dry_run {
        config.retention.safety.dry_run = true;
    }

    let sweeper = match build_sweeper(&config).await {
        Ok(sweeper) => sweeper,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start sweeper");
            return ExitCode::FAILURE;
        }
    };

    let result = sweeper.run().await;
    let (outcome, code) = match &result {
        Ok(outcome) => (Some(outcome), ExitCode::SUCCESS),
        Err(e) => {
            tracing::error!(error = %e, "Retention sweep failed");
            if let SweepError::BatchCommit { failures, .. } = e {
                for failure in failures {
                    tracing::error!(
                        batch = failure.index,
                        size = failure.size,
                        error = %failure.error,
                        "Batch not committed"
                    );
                }
            }
            (e.outcome(), ExitCode::FAILURE)
        }
    };

    if let Some(outcome) = outcome {
        match serde_json::to_string_pretty(outcome) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!(error = %e, "Failed to serialize sweep outcome"),
        }
    }

    code
}

/// Validate config and show the upcoming schedule
fn run_check_config(explicit_config_path: Option<&str>) -> ExitCode {
    let (config, path) = match load_config(explicit_config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let schedule = match SweepSchedule::from_config(&config.schedule) {
        Ok(schedule) => schedule,
        Err(e) => {
            eprintln!("Invalid schedule: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match &path {
        Some(path) => println!("Configuration OK: {}", path.display()),
        None => println!("Configuration OK: built-in defaults (no config file found)"),
    }
    println!();

    let retention = &config.retention;
    println!("Retention:");
    println!("  collection:        {}", retention.collection);
    if retention.enabled && retention.has_retention() {
        println!("  keep messages for: {} days", retention.periods.messages_days);
    } else {
        println!("  keep messages for: forever (retention disabled)");
    }
    println!("  batch size:        {}", retention.safety.batch_size);
    println!("  dry run:           {}", retention.safety.dry_run);
    if retention.safety.max_deletes_per_run > 0 {
        println!("  max deletes/run:   {}", retention.safety.max_deletes_per_run);
    }
    println!();

    println!(
        "Schedule: \"{}\" at UTC{}",
        schedule.expression(),
        schedule.offset()
    );
    match schedule.upcoming(Utc::now(), 5) {
        Ok(times) => {
            for time in times {
                println!("  {}", time.format("%Y-%m-%d %H:%M %:z (%a)"));
            }
        }
        Err(e) => {
            eprintln!("Invalid schedule: {}", e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

/// Initialize a new configuration file
fn run_init(output: Option<String>, force: bool) -> ExitCode {
    let output_path = PathBuf::from(output.unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string()));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        return ExitCode::FAILURE;
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = std::fs::write(&output_path, DEFAULT_CONFIG_TOML) {
        eprintln!("Failed to write config file: {}", e);
        return ExitCode::FAILURE;
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("To check the schedule, run:");
    println!("  chat-sweeper check-config --config {}", output_path.display());
    println!();
    println!("To start the daemon, run:");
    println!("  chat-sweeper serve --config {}", output_path.display());
    ExitCode::SUCCESS
}

/// Print enabled compile-time features.
fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        ("server", "Runtime", cfg!(feature = "server")),
        ("database-sqlite", "Document stores", cfg!(feature = "database-sqlite")),
        ("s3-storage", "Blob stores", cfg!(feature = "s3-storage")),
        ("prometheus", "Observability", cfg!(feature = "prometheus")),
    ];

    println!("Chat Sweeper v{version}\n");
    println!("Compile-time features:");

    let mut current_group = "";
    for &(name, group, enabled) in features {
        if group != current_group {
            if !current_group.is_empty() {
                println!();
            }
            println!("  {group}:");
            current_group = group;
        }
        let status = if enabled { "enabled" } else { "disabled" };
        println!("    {name:<32} {status}");
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
