use clap::{CommandFactory, Parser};
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::{Cli, Commands};
use genqueue::config::Config;
use genqueue::domain::QueueEvent;
use genqueue::executor::{SimulatedExecutor, TimeoutExecutor};
use genqueue::manager::QueueManager;
use genqueue::scheduler::Scheduler;

fn setup_logging(level: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("genqueue")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("genqueue.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Options for the run command
struct RunOptions {
    failure_rate: f64,
    steps: u8,
    step_delay: Duration,
    json: bool,
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        eprintln!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => {
            Cli::command().print_help().context("Failed to print help")?;
            Ok(())
        }
        Some(Commands::Run {
            prompts,
            failure_rate,
            steps,
            step_delay_ms,
            json,
        }) => {
            let options = RunOptions {
                failure_rate: *failure_rate,
                steps: *steps,
                step_delay: Duration::from_millis(*step_delay_ms),
                json: *json,
            };
            handle_run_command(prompts, &options, config)
        }
        Some(Commands::Config) => handle_config_command(config),
    }
}

fn handle_config_command(config: &Config) -> Result<()> {
    info!("Printing effective configuration");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}

fn handle_run_command(prompts: &[String], options: &RunOptions, config: &Config) -> Result<()> {
    info!("Running {} prompts (failure rate {})", prompts.len(), options.failure_rate);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(run_queue(prompts, options, config))
}

async fn run_queue(prompts: &[String], options: &RunOptions, config: &Config) -> Result<()> {
    let manager = Arc::new(QueueManager::new(config).context("Invalid queue configuration")?);
    let simulated =
        SimulatedExecutor::new(options.steps, options.step_delay).with_failure_rate(options.failure_rate);
    let executor = TimeoutExecutor::new(simulated, config.executor.timeout());
    info!(
        "Queue ready: {} slots, capacity {}, executor timeout {}ms",
        config.queue.max_concurrent,
        config.queue.capacity,
        executor.timeout().as_millis()
    );
    let executor = Arc::new(executor);

    let mut subscription = manager.subscribe();
    let scheduler = Scheduler::new(manager.clone(), executor, &config.scheduler).start();

    let mut outstanding = HashSet::new();
    for prompt in prompts {
        match manager.submit(prompt) {
            Ok(task) => {
                outstanding.insert(task.id);
            }
            Err(e) => eprintln!("{} {:?}: {}", "Rejected".red().bold(), prompt, e),
        }
    }

    let streamed = loop {
        if outstanding.is_empty() {
            break Ok(());
        }
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    break Err(eyre!("Event stream closed before all tasks finished"));
                };
                print_event(&event, options.json)?;
                if event.is_terminal() {
                    if let Some(id) = event.task_id() {
                        outstanding.remove(id);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{}", "Interrupted, shutting down".yellow());
                break Ok(());
            }
        }
    };

    scheduler.shutdown().await;
    manager.unsubscribe(subscription.id());

    if !options.json {
        let stats = manager.stats();
        println!(
            "{} {} completed, {} failed, {} unfinished",
            "Done:".bold(),
            stats.completed.to_string().green(),
            stats.failed.to_string().red(),
            stats.total - stats.completed - stats.failed
        );
    }
    streamed
}

fn print_event(event: &QueueEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event).context("Failed to serialize event")?);
        return Ok(());
    }

    match event {
        QueueEvent::TaskSubmitted(task) => {
            let wait = task.estimated_wait_ms.unwrap_or(0);
            println!("{} {} {:?} (est. wait {}ms)", "submitted".cyan(), task.id, task.input, wait)
        }
        QueueEvent::TaskStarted(task) => {
            println!("{} {} attempt {}", "started".blue(), task.id, task.retry_count + 1)
        }
        QueueEvent::TaskProgress { id, progress } => println!("{} {} {}%", "progress".dimmed(), id, progress),
        QueueEvent::TaskCompleted(task) => {
            let (duration, payload) = task
                .result
                .as_ref()
                .map(|r| (r.duration_ms, r.payload.to_string()))
                .unwrap_or_default();
            println!("{} {} in {}ms {}", "completed".green().bold(), task.id, duration, payload)
        }
        QueueEvent::TaskRetryScheduled {
            id,
            retry_count,
            max_retries,
            next_retry_at,
            error,
        } => println!(
            "{} {} retry {}/{} at {} ({}: {})",
            "retrying".yellow(),
            id,
            retry_count,
            max_retries,
            next_retry_at.format("%H:%M:%S%.3f"),
            error.code,
            error.message
        ),
        QueueEvent::TaskRequeued(task) => println!("{} {}", "requeued".yellow(), task.id),
        QueueEvent::TaskFailed(task) => {
            let reason = task
                .error
                .as_ref()
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_default();
            println!("{} {} {}", "failed".red().bold(), task.id, reason)
        }
        QueueEvent::TaskCancelled { id } => println!("{} {}", "cancelled".magenta(), id),
        QueueEvent::QueueStats(stats) => println!(
            "{}",
            format!(
                "stats pending={} processing={} retrying={} completed={} failed={} total={}",
                stats.pending, stats.processing, stats.retrying, stats.completed, stats.failed, stats.total
            )
            .dimmed()
        ),
        QueueEvent::QueueSnapshot(tasks) => {
            println!("{}", format!("snapshot {} tasks", tasks.len()).dimmed())
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging; -v wins over the configured level
    let level = if cli.is_verbose() {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("info")
    };
    setup_logging(level).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
