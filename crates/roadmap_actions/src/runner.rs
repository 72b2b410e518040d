//! Executes one claimed ActionRun at a time.

use crate::context::{ActionContext, RuntimeDeps};
use crate::registry::ActionRegistry;
use anyhow::Result;
use roadmap_db::{ActionRun, Db};
use roadmap_protocol::ActionRequest;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info};

/// Keys lifted into the standardized run summary when a handler reports
/// them.
const SUMMARY_KEYS: &[&str] = &[
    "selected_count",
    "saved_count",
    "failed_count",
    "skipped_no_key",
    "unlocked_count",
    "substeps",
];

pub struct ActionRunner {
    registry: Arc<ActionRegistry>,
    deps: RuntimeDeps,
}

impl ActionRunner {
    pub fn new(registry: Arc<ActionRegistry>, deps: RuntimeDeps) -> Self {
        Self { registry, deps }
    }

    pub fn db(&self) -> &Db {
        &self.deps.db
    }

    /// Drive one claimed run to its terminal state. Never returns an error
    /// for handler failures; those land in the ledger.
    pub async fn execute(&self, run: &ActionRun) -> Result<()> {
        let ledger = self.deps.db.ledger();

        let request: ActionRequest = match serde_json::from_str(&run.payload_json) {
            Ok(request) => request,
            Err(err) => {
                ledger
                    .finish_failure(&run.run_id, &format!("invalid payload: {err}"), None)
                    .await?;
                return Ok(());
            }
        };

        let Some(handler) = self.registry.get(&run.action) else {
            ledger
                .finish_failure(&run.run_id, &format!("unknown action: {}", run.action), None)
                .await?;
            return Ok(());
        };

        let ctx = ActionContext {
            deps: self.deps.clone(),
            request,
        };

        info!("Run {} executing {}", run.run_id, run.action);
        match handler(ctx).await {
            Ok(result) => {
                let summarized = attach_summary(result);
                ledger
                    .finish_success(&run.run_id, &summarized.to_string())
                    .await?;
            }
            Err(err) => {
                error!("Run {} failed: {err:#}", run.run_id);
                ledger
                    .finish_failure(&run.run_id, &truncate(&format!("{err:#}"), 500), None)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Lift the standardized counters to the top of the result map so the
/// sheet UI can render a uniform summary.
fn attach_summary(result: Value) -> Value {
    let Value::Object(map) = result else {
        return json!({ "result": result });
    };
    let mut summary = Map::new();
    for key in SUMMARY_KEYS {
        if let Some(value) = map.get(*key) {
            summary.insert((*key).to_string(), value.clone());
        }
    }
    let mut out = map;
    if !summary.is_empty() {
        out.insert("summary".to_string(), Value::Object(summary));
    }
    Value::Object(out)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
