//! The worker loop: claim one queued run, execute it, repeat.
//!
//! Single-threaded per process; concurrent worker processes coordinate
//! through the ledger's atomic claim.

use crate::runner::ActionRunner;
use anyhow::Result;
use std::time::Duration;
use tracing::{error, info};

pub struct WorkerLoop {
    runner: ActionRunner,
    idle_sleep: Duration,
    max_runs: Option<u64>,
}

impl WorkerLoop {
    pub fn new(runner: ActionRunner, idle_sleep_ms: u64, max_runs: Option<u64>) -> Self {
        Self {
            runner,
            idle_sleep: Duration::from_millis(idle_sleep_ms),
            max_runs,
        }
    }

    /// Run until `max_runs` executions (forever when unset). Execution
    /// errors are logged and the loop continues; only ledger connectivity
    /// failures propagate.
    pub async fn run(&self) -> Result<u64> {
        let ledger = self.runner.db().ledger();
        let mut executed: u64 = 0;
        info!("Worker loop started (idle sleep {:?})", self.idle_sleep);

        loop {
            if let Some(max) = self.max_runs {
                if executed >= max {
                    break;
                }
            }

            match ledger.claim_next().await? {
                Some(run) => {
                    if let Err(err) = self.runner.execute(&run).await {
                        // The runner already wrote the terminal state where
                        // it could; this is a ledger-level failure.
                        error!("Run {} could not be finalized: {err:#}", run.run_id);
                    }
                    executed += 1;
                }
                None => {
                    if self.max_runs.is_some() {
                        // Bounded loops are for tests and drain runs; an
                        // empty queue ends them.
                        break;
                    }
                    tokio::time::sleep(self.idle_sleep).await;
                }
            }
        }

        info!("Worker loop stopped after {executed} runs");
        Ok(executed)
    }
}
