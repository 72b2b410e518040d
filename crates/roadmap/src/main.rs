//! Roadmap Flow CLI.
//!
//! Entry points for the Action API server, the worker loop, one-off action
//! runs, and schema bootstrap.
//!
//! Usage:
//!     roadmap api
//!     roadmap worker --max-runs 10
//!     roadmap run pm.backlog_sync
//!     roadmap init-db

use anyhow::Result;
use clap::{Parser, Subcommand};
use roadmap_actions::{ActionRegistry, ActionRunner, RuntimeDeps, WorkerLoop};
use roadmap_api::ApiState;
use roadmap_db::Db;
use roadmap_ids::ActionRunId;
use roadmap_logging::{init_logging, LogConfig};
use roadmap_optimizer::BranchAndBoundSolver;
use roadmap_protocol::{ActionRequest, Scope, Settings, SheetContext};
use std::sync::Arc;

mod sheet_stub;

#[derive(Parser, Debug)]
#[command(name = "roadmap", about = "Roadmap Flow: sheet-native roadmap intelligence")]
struct Cli {
    /// Mirror file-level logging to the console
    #[arg(long, global = true)]
    verbose: bool,

    /// Database connection string (overrides ROADMAP_DB_URL)
    #[arg(long, env = "ROADMAP_DB_URL")]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the Action API
    Api,
    /// Run the action worker loop
    Worker {
        /// Stop after this many executed runs
        #[arg(long)]
        max_runs: Option<u64>,
    },
    /// Enqueue one action and drain it inline
    Run {
        /// Registered action name, e.g. pm.backlog_sync
        action: String,
        /// Comma-separated initiative keys for the selection scope
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,
        /// Tab for tab-aware actions
        #[arg(long)]
        tab: Option<String>,
        /// Spreadsheet id override
        #[arg(long)]
        spreadsheet_id: Option<String>,
    },
    /// Create the schema and exit
    InitDb,
    /// Print ledger counters
    Stats,
    /// Mark running runs older than the horizon as failed
    Sweep {
        /// Staleness horizon in minutes
        #[arg(long, default_value_t = 60)]
        older_than_mins: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Dropping the guard stops the background log writer; hold it for the
    // whole process.
    let _log_guard = init_logging(LogConfig {
        app_name: "roadmap",
        verbose: cli.verbose,
    })?;

    let mut settings = Settings::from_env();
    // --database also captures ROADMAP_DB_URL; with neither set, the
    // database lives under the Roadmap Flow home directory.
    settings.database_url = cli
        .database
        .clone()
        .unwrap_or_else(roadmap_logging::default_db_url);
    let db = Db::open(&settings.database_url).await?;
    tracing::info!("Database: {}", settings.database_url);

    match cli.command {
        Command::Api => {
            let state = ApiState {
                db,
                registry: Arc::new(ActionRegistry::with_default_actions()),
                settings: Arc::new(settings),
            };
            roadmap_api::serve(state).await
        }
        Command::Worker { max_runs } => {
            let deps = runtime_deps(db, settings);
            let idle_sleep_ms = deps.settings.idle_sleep_ms;
            let runner = ActionRunner::new(Arc::new(ActionRegistry::with_default_actions()), deps);
            let worker = WorkerLoop::new(runner, idle_sleep_ms, max_runs);
            let executed = worker.run().await?;
            tracing::info!("Executed {executed} runs");
            Ok(())
        }
        Command::Run {
            action,
            keys,
            tab,
            spreadsheet_id,
        } => {
            let request = ActionRequest {
                action: action.clone(),
                scope: if keys.is_empty() {
                    Scope::None
                } else {
                    Scope::Selection {
                        initiative_keys: keys,
                    }
                },
                sheet_context: tab.map(|tab| SheetContext {
                    spreadsheet_id: spreadsheet_id.unwrap_or_default(),
                    tab,
                }),
                ..Default::default()
            };

            let run_id = ActionRunId::mint(chrono::Utc::now());
            db.ledger()
                .enqueue(&run_id, &action, &serde_json::to_string(&request)?, None)
                .await?;

            let deps = runtime_deps(db.clone(), settings);
            let runner = ActionRunner::new(Arc::new(ActionRegistry::with_default_actions()), deps);
            let worker = WorkerLoop::new(runner, 10, Some(1));
            worker.run().await?;

            let run = db.ledger().get(run_id.as_str()).await?;
            match run {
                Some(run) => {
                    println!("run_id: {}", run.run_id);
                    println!("status: {}", run.status.to_status());
                    if let Some(result) = run.result_json {
                        println!("{result}");
                    }
                    if let Some(error) = run.error_text {
                        eprintln!("error: {error}");
                    }
                }
                None => eprintln!("run {run_id} vanished"),
            }
            Ok(())
        }
        Command::InitDb => {
            // Db::open already bootstrapped the schema.
            tracing::info!("Schema ready");
            Ok(())
        }
        Command::Stats => {
            let stats = db.ledger().stats().await?;
            println!(
                "queued: {}  running: {}  succeeded: {}  failed: {}",
                stats.queued, stats.running, stats.succeeded, stats.failed
            );
            Ok(())
        }
        Command::Sweep { older_than_mins } => {
            let horizon = chrono::Utc::now() - chrono::Duration::minutes(older_than_mins);
            let swept = db.ledger().requeue_stuck(horizon).await?;
            let stuck_optimizations = db.optimization().fail_stuck_runs(horizon).await?;
            println!("swept {swept} action runs, {stuck_optimizations} optimization runs");
            Ok(())
        }
    }
}

fn runtime_deps(db: Db, settings: Settings) -> RuntimeDeps {
    RuntimeDeps {
        db,
        settings: Arc::new(settings),
        sheet: Arc::new(sheet_stub::UnconfiguredSheet),
        llm: None,
        solver: Arc::new(BranchAndBoundSolver),
    }
}
