//! Sync services: reader → per-row validation → repository upsert.
//!
//! Per-row failures are collected, never thrown; one bad row cannot abort
//! its tab. DB state is committed first; the per-row `run_status` write-back
//! is best-effort.

mod backlog;
mod intake;
mod kpi_contributions;
mod math_models;
mod metrics_config;
mod params;
mod scoring_inputs;

pub use backlog::BacklogSyncService;
pub use intake::IntakeSyncService;
pub use kpi_contributions::KpiContributionSyncService;
pub use math_models::MathModelSyncService;
pub use metrics_config::MetricsConfigSyncService;
pub use params::ParamSyncService;
pub use scoring_inputs::ScoringInputsSyncService;

use crate::cells::CellValue;
use crate::client::{BatchPlan, Rect, SheetClient};
use crate::reader::{find_column, TabShape};
use roadmap_protocol::defaults::STATUS_MESSAGE_MAX_LEN;
use serde::Serialize;
use tracing::warn;

/// Counters returned by every sync service.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncOutcome {
    pub upserts: usize,
    pub skipped: usize,
    pub unlocked: usize,
    pub failures: Vec<RowFailure>,
}

impl SyncOutcome {
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

/// One row that did not make it into the database.
#[derive(Debug, Clone, Serialize)]
pub struct RowFailure {
    pub row_number: usize,
    pub key: Option<String>,
    pub reason: String,
}

/// Truncate an error for the `run_status` column.
pub fn status_message(ok: bool, reason: Option<&str>) -> String {
    match (ok, reason) {
        (true, _) => "OK".to_string(),
        (false, Some(reason)) => {
            let mut message = format!("FAILED: {reason}");
            if message.chars().count() > STATUS_MESSAGE_MAX_LEN {
                message = message.chars().take(STATUS_MESSAGE_MAX_LEN).collect();
            }
            message
        }
        (false, None) => "FAILED".to_string(),
    }
}

/// Best-effort per-row status write-back to the tab's `run_status` column.
/// Errors are logged and swallowed; the DB remains the source of truth.
pub async fn write_row_statuses(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
    shape: &TabShape,
    statuses: &[(usize, String)],
) {
    if statuses.is_empty() {
        return;
    }

    let column = match find_column(
        client,
        spreadsheet_id,
        tab,
        shape,
        "run_status",
        &["sync_status", "status_message"],
    )
    .await
    {
        Ok(Some(column)) => column,
        Ok(None) => return,
        Err(err) => {
            warn!("Status write-back skipped for {tab}: {err}");
            return;
        }
    };

    let mut ordered: Vec<(usize, &str)> = statuses
        .iter()
        .map(|(row, message)| (*row, message.as_str()))
        .collect();
    ordered.sort_by_key(|(row, _)| *row);

    let mut plan = BatchPlan::default();
    let mut run_start = 0;
    while run_start < ordered.len() {
        let mut run_end = run_start;
        while run_end + 1 < ordered.len() && ordered[run_end + 1].0 == ordered[run_end].0 + 1 {
            run_end += 1;
        }
        let rect = Rect::column(tab, column, ordered[run_start].0, ordered[run_end].0);
        let values = ordered[run_start..=run_end]
            .iter()
            .map(|(_, message)| vec![CellValue::text(*message)])
            .collect();
        plan.push(rect, values);
        run_start = run_end + 1;
    }

    if let Err(err) = crate::writers::execute_plan(client, spreadsheet_id, plan).await {
        warn!("Status write-back failed for {tab}: {err}");
    }
}

/// Split a metric chain like `signups -> activation -> revenue` into its
/// ordered KPI list.
pub fn parse_metric_chain(text: &str) -> Vec<String> {
    text.replace('→', "->")
        .split("->")
        .map(str::trim)
        .filter(|link| !link.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scope filter shared by services: `None` means every row.
pub(crate) fn in_scope(key: Option<&str>, scope_keys: Option<&[String]>) -> bool {
    match (key, scope_keys) {
        (_, None) => true,
        (Some(key), Some(scope)) => scope.iter().any(|s| s == key),
        (None, Some(_)) => false,
    }
}
