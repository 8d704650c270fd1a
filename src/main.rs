use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

use hone::evaluator::{CommandEvaluator, EvalConfig};
use hone::executor::GitExecutor;
use hone::provider::{AnthropicConfig, AnthropicProvider};
use hone::report::write_report;
use hone::review::{ReviewPolicy, Reviewer};
use hone::runner::{CancelToken, RunnerConfig, SessionRunner};
use hone::session::{SessionStatus, Task, Verdict};
use hone::storage::SessionStore;
use hone::workspace::ensure_workspace;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hone")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("hone.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    // RUST_LOG wins over the configured level
    if std::env::var("RUST_LOG").is_err() {
        if let Some(level) = level {
            builder.parse_filters(level);
        }
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run {
            goal,
            accept,
            workspace,
            max_iterations,
            model,
            report,
            init_workspace,
        } => {
            handle_run_command(
                goal,
                accept,
                workspace,
                *max_iterations,
                model.as_deref(),
                *report,
                *init_workspace,
                config,
            )
            .await
        }
        Commands::List { status } => handle_list_command(status.as_deref(), config),
        Commands::Show { id } => handle_show_command(id, config),
        Commands::Report { id } => handle_report_command(id, config),
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_run_command(
    goal: &str,
    accept: &str,
    workspace: &Path,
    max_iterations: Option<u32>,
    model: Option<&str>,
    report: bool,
    init_workspace: bool,
    config: &Config,
) -> Result<()> {
    let workspace = ensure_workspace(workspace, init_workspace)?;
    info!("Running session in {}", workspace.display());

    let task = Task::new(goal, accept, &workspace)
        .with_max_iterations(max_iterations.unwrap_or(config.session.max_iterations));

    let provider_config = AnthropicConfig {
        model: model.unwrap_or(&config.llm.model).to_string(),
        max_tokens: config.llm.max_tokens,
        timeout: Duration::from_millis(config.llm.timeout_ms),
        api_key_env: config.llm.api_key_env.clone(),
    };
    let provider = Arc::new(AnthropicProvider::new(provider_config)?);
    let executor = Arc::new(GitExecutor::open(&workspace).await?);
    let evaluator = Arc::new(CommandEvaluator::new(EvalConfig {
        timeout_ms: config.evaluator.timeout_ms,
        ..EvalConfig::default()
    }));
    let store = Arc::new(SessionStore::open(&config.storage.data_dir)?);

    let policy = ReviewPolicy {
        deletion_ratio_threshold: config.review.deletion_ratio_threshold,
        stall_threshold: config.review.stall_threshold,
        fatal_repeat_threshold: config.review.fatal_repeat_threshold,
    };
    let runner_config = RunnerConfig {
        retries_per_iteration: config.session.retries_per_iteration,
        call_timeout_ms: config.session.call_timeout_ms,
        ..RunnerConfig::default()
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n{}", "Stopping after the current step...".yellow());
                cancel.cancel();
            }
        });
    }

    let runner = SessionRunner::new(provider, executor, evaluator)
        .with_reviewer(Reviewer::new(policy))
        .with_config(runner_config)
        .with_store(store.clone())
        .with_cancel_token(cancel);

    println!("{} {}", "Goal:".cyan(), goal);
    println!("{} {}", "Acceptance:".cyan(), accept);

    let outcome = runner.run(task).await?;

    let status_text = match outcome.status {
        SessionStatus::Succeeded => "Succeeded".green().bold(),
        SessionStatus::Failed => "Failed".red().bold(),
        SessionStatus::Aborted => "Aborted".yellow().bold(),
        SessionStatus::Running => "Running".cyan(),
    };
    println!(
        "{} after {} iteration(s)  [{}]",
        status_text, outcome.iterations_used, outcome.session_id
    );
    if !outcome.final_diagnostics.is_empty() {
        println!("{}", outcome.final_diagnostics.dimmed());
    }

    if report {
        let session = store.load_session(&outcome.session_id)?;
        let path = write_report(store.data_dir(), &session)?;
        println!("{} {}", "Report written:".green(), path.display());
    }

    if !outcome.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn handle_list_command(status: Option<&str>, config: &Config) -> Result<()> {
    info!("Listing sessions - status: {:?}", status);
    let store = SessionStore::open(&config.storage.data_dir)?;

    let filter = match status {
        Some(text) => Some(text.parse::<SessionStatus>().map_err(|e| eyre!(e))?),
        None => None,
    };

    let mut shown = 0;
    for summary in store.list_sessions()? {
        if let Some(wanted) = filter {
            if summary.status != wanted {
                continue;
            }
        }
        let started = chrono::DateTime::from_timestamp_millis(summary.started_at)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<9}  {:>3} iter  {}  {}",
            summary.id,
            colorize_status(summary.status),
            summary.iterations,
            started,
            truncate(&summary.goal, 48)
        );
        shown += 1;
    }
    if shown == 0 {
        println!("{}", "No sessions found".dimmed());
    }
    Ok(())
}

fn handle_show_command(id: &str, config: &Config) -> Result<()> {
    info!("Showing session: {}", id);
    let store = SessionStore::open(&config.storage.data_dir)?;
    let session = store.load_session(id)?;

    println!("{} {}", "Session:".cyan().bold(), session.header.session_id);
    println!("  Goal:       {}", session.header.goal);
    println!("  Acceptance: {}", session.header.acceptance_command);
    println!("  Workspace:  {}", session.header.workspace_path.display());
    println!("  Status:     {}", colorize_status(session.status()));

    for record in &session.records {
        let check = match &record.eval {
            Some(eval) if eval.passed => "check passed".green().to_string(),
            Some(eval) => match eval.exit_code {
                Some(code) => format!("{} (exit {})", "check failed".red(), code),
                None => "check failed".red().to_string(),
            },
            None => "check not run".yellow().to_string(),
        };
        println!(
            "  {}. [{}] {} - {}",
            record.iteration,
            colorize_verdict(&record.verdict),
            record.description,
            check
        );
    }

    if let Some(outcome) = &session.outcome {
        println!(
            "  Finished {} after {} iteration(s)",
            colorize_status(outcome.status),
            outcome.iterations_used
        );
        if !outcome.final_diagnostics.is_empty() {
            println!("  {}", outcome.final_diagnostics.dimmed());
        }
    }
    Ok(())
}

fn handle_report_command(id: &str, config: &Config) -> Result<()> {
    info!("Writing report for session: {}", id);
    let store = SessionStore::open(&config.storage.data_dir)?;
    let session = store.load_session(id)?;
    let path = write_report(store.data_dir(), &session)?;
    println!("{} {}", "Report written:".green(), path.display());
    Ok(())
}

fn colorize_status(status: SessionStatus) -> String {
    match status {
        SessionStatus::Succeeded => status.as_str().green(),
        SessionStatus::Failed => status.as_str().red(),
        SessionStatus::Aborted => status.as_str().yellow(),
        SessionStatus::Running => status.as_str().cyan(),
    }
    .to_string()
}

fn colorize_verdict(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Accept => verdict.label().green(),
        Verdict::Revert => verdict.label().red(),
        Verdict::RetryWithFeedback(_) => verdict.label().yellow(),
    }
    .to_string()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}...", head)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration, then point logging at the configured level
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
