//! Autonomous task backlog runner.
//!
//! Reads `task_list.json` from the project root, picks the next eligible task
//! and drives it through plan -> execute -> test -> correct using a planner
//! chat model, a coding CLI and a debugger chat model.

use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use taskloop::agents::AgentSet;
use taskloop::agents::cli::CliExecutor;
use taskloop::agents::debugger::Debugger;
use taskloop::agents::planner::Planner;
use taskloop::exit_codes;
use taskloop::io::config::{OrchestratorConfig, load_config};
use taskloop::io::project::{ProjectPaths, discover};
use taskloop::io::task_store::TaskStore;
use taskloop::logging;
use taskloop::looping::{DriverError, LoopStop, TaskReport, TaskResult, run_continuous, run_single};
use taskloop::pipeline::PipelineConfig;
use taskloop::select::{SelectOutcome, select_from_store};
use taskloop::task::Task;
use taskloop::validate::validate_store;

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Autonomous plan/execute/test/correct loop over a task backlog"
)]
struct Cli {
    /// TOML config file. Environment variables override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project root (overrides PROJECT_ROOT and the config file).
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run eligible tasks until none is left.
    Continuous,
    /// Run one task by id, ignoring its dependencies.
    Single {
        #[arg(long = "task")]
        task: String,
    },
    /// Print the id of the next eligible task.
    Select,
    /// Check the task list for duplicate ids, self-dependencies and unknown dependencies.
    Validate,
    /// Append a pending task to the task list.
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,
        /// Ids that must be completed first (repeatable or comma-separated).
        #[arg(long = "depends-on", value_delimiter = ',')]
        depends_on: Vec<String>,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(root) = cli.project_root {
        config.project_root = root;
    }
    let paths = discover(&config.project_root, config.task_file())?;
    let store = TaskStore::new(&paths.task_file);

    match cli.command {
        Command::Continuous => cmd_continuous(config, &paths, &store),
        Command::Single { task } => cmd_single(config, &paths, &store, &task),
        Command::Select => cmd_select(&store),
        Command::Validate => cmd_validate(&store),
        Command::Add {
            id,
            title,
            description,
            priority,
            depends_on,
        } => {
            let task = Task {
                description,
                priority,
                depends_on,
                ..Task::new(id, title)
            };
            cmd_add(&store, task)
        }
    }
}

/// Concrete collaborators built from configuration.
struct Collaborators {
    planner: Planner,
    executor: CliExecutor,
    debugger: Debugger,
}

impl Collaborators {
    fn new(config: &mut OrchestratorConfig, paths: &ProjectPaths) -> Result<Self> {
        config.require_credentials()?;
        Ok(Self {
            planner: Planner::new(&config.planner),
            executor: CliExecutor::new(&config.executor, &paths.root),
            debugger: Debugger::new(&config.debugger),
        })
    }

    fn set(&self) -> AgentSet<'_> {
        AgentSet {
            planner: &self.planner,
            executor: &self.executor,
            debugger: &self.debugger,
        }
    }
}

fn cmd_continuous(
    mut config: OrchestratorConfig,
    paths: &ProjectPaths,
    store: &TaskStore,
) -> Result<i32> {
    let collaborators = Collaborators::new(&mut config, paths)?;
    let cancel = spawn_signal_watcher()?;
    let outcome = run_continuous(
        store,
        collaborators.set(),
        &PipelineConfig::from(&config),
        &cancel,
        print_report,
    );
    match outcome {
        Ok(outcome) => {
            println!(
                "completed {}, failed {}",
                outcome.completed.len(),
                outcome.failed.len()
            );
            if let LoopStop::Blocked { pending } = &outcome.stop {
                println!("blocked: {}", pending.join(", "));
            }
            Ok(exit_codes::OK)
        }
        Err(DriverError::Cancelled) => {
            eprintln!("cancelled");
            Ok(exit_codes::CANCELLED)
        }
        Err(err) => Err(err).context("continuous run"),
    }
}

fn cmd_single(
    mut config: OrchestratorConfig,
    paths: &ProjectPaths,
    store: &TaskStore,
    task_id: &str,
) -> Result<i32> {
    let collaborators = Collaborators::new(&mut config, paths)?;
    let cancel = spawn_signal_watcher()?;
    match run_single(
        store,
        collaborators.set(),
        &PipelineConfig::from(&config),
        task_id,
        &cancel,
    ) {
        Ok(report) => {
            println!("{task_id}\tcompleted\tattempts={}", report.attempts);
            Ok(exit_codes::OK)
        }
        Err(DriverError::Cancelled) => {
            eprintln!("cancelled");
            Ok(exit_codes::CANCELLED)
        }
        Err(err @ DriverError::TaskFailed { .. }) => {
            eprintln!("{err:#}");
            Ok(exit_codes::TASK_FAILED)
        }
        Err(err) => Err(err).context("single run"),
    }
}

fn cmd_select(store: &TaskStore) -> Result<i32> {
    match select_from_store(store)? {
        SelectOutcome::Eligible(task) => {
            println!("{}", task.id);
            Ok(exit_codes::OK)
        }
        SelectOutcome::Drained => {
            eprintln!("no pending tasks");
            Ok(exit_codes::NO_ELIGIBLE)
        }
        SelectOutcome::Blocked(blocked) => {
            for task in blocked {
                let cycle = if task.in_cycle { " (cycle)" } else { "" };
                eprintln!("{} waits on {}{}", task.id, task.waiting_on.join(", "), cycle);
            }
            Ok(exit_codes::NO_ELIGIBLE)
        }
    }
}

fn cmd_validate(store: &TaskStore) -> Result<i32> {
    let outcome = validate_store(store)?;
    for task in &outcome.cycles {
        eprintln!("warning: {} is part of a dependency cycle", task.id);
    }
    if !outcome.is_valid() {
        for violation in &outcome.violations {
            println!("{violation}");
        }
        return Ok(exit_codes::INVALID);
    }
    println!("ok: {} tasks", outcome.tasks);
    Ok(exit_codes::OK)
}

fn cmd_add(store: &TaskStore, task: Task) -> Result<i32> {
    let id = task.id.clone();
    store.append(task).with_context(|| format!("add task {id}"))?;
    println!("{id}");
    Ok(exit_codes::OK)
}

fn print_report(report: &TaskReport) {
    match &report.result {
        TaskResult::Completed(run) => {
            println!("{}\tcompleted\tattempts={}", report.id, run.attempts);
        }
        TaskResult::Failed(message) => println!("{}\tfailed\t{message}", report.id),
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
///
/// Signals are awaited on a dedicated thread with a single-threaded runtime;
/// the rest of the program stays synchronous.
fn spawn_signal_watcher() -> Result<CancellationToken> {
    let cancel = CancellationToken::new();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    let token = cancel.clone();
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                shutdown_signal().await;
                warn!("shutdown requested, finishing current step");
                token.cancel();
            });
        })
        .context("spawn signal thread")?;
    Ok(cancel)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(err = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(err = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_continuous_with_global_flags() {
        let cli = Cli::parse_from([
            "taskloop",
            "continuous",
            "--config",
            "taskloop.toml",
            "--project-root",
            "/srv/app",
        ]);
        assert!(matches!(cli.command, Command::Continuous));
        assert_eq!(cli.config, Some(PathBuf::from("taskloop.toml")));
        assert_eq!(cli.project_root, Some(PathBuf::from("/srv/app")));
    }

    #[test]
    fn parse_single_requires_task() {
        let cli = Cli::parse_from(["taskloop", "single", "--task", "t-7"]);
        assert!(matches!(cli.command, Command::Single { task } if task == "t-7"));
        assert!(Cli::try_parse_from(["taskloop", "single"]).is_err());
    }

    #[test]
    fn parse_add_with_dependencies() {
        let cli = Cli::parse_from([
            "taskloop",
            "add",
            "--id",
            "c",
            "--title",
            "Wire export endpoint",
            "--priority",
            "-2",
            "--depends-on",
            "a,b",
            "--depends-on",
            "d",
        ]);
        let Command::Add {
            id,
            title,
            description,
            priority,
            depends_on,
        } = cli.command
        else {
            panic!("expected add");
        };
        assert_eq!(id, "c");
        assert_eq!(title, "Wire export endpoint");
        assert_eq!(description, "");
        assert_eq!(priority, -2);
        assert_eq!(depends_on, vec!["a", "b", "d"]);
    }

    #[test]
    fn parse_select_and_validate() {
        assert!(matches!(
            Cli::parse_from(["taskloop", "select"]).command,
            Command::Select
        ));
        assert!(matches!(
            Cli::parse_from(["taskloop", "validate"]).command,
            Command::Validate
        ));
    }
}
