//! `pm.backlog_sync`: the full intake → DB → central backlog cycle.

use crate::context::ActionContext;
use anyhow::Result;
use roadmap_sheets::sync::{BacklogSyncService, IntakeSyncService};
use serde_json::{json, Value};
use tracing::warn;

/// Consolidate every configured intake tab, pull PM edits from the central
/// backlog, then regenerate the backlog projection. One intake tab's
/// failure does not abort its siblings.
pub async fn backlog_sync(ctx: ActionContext) -> Result<Value> {
    let settings = ctx.settings().clone();
    let db = ctx.db();
    let sheet = ctx.sheet();
    let mut substeps = Vec::new();
    let mut saved_count = 0usize;
    let mut failed_count = 0usize;

    // Flow 1a: intake tabs → DB, with per-tab isolation.
    for tab in &settings.intake_tabs {
        match IntakeSyncService::sync_sheet_to_db(
            db,
            sheet,
            &settings.intake_spreadsheet_id,
            tab,
            None,
        )
        .await
        {
            Ok(outcome) => {
                saved_count += outcome.upserts;
                failed_count += outcome.failed_count();
                substeps.push(json!({
                    "step": format!("intake:{tab}"),
                    "status": "ok",
                    "count": outcome.upserts,
                    "skipped": outcome.skipped,
                    "failures": outcome.failures,
                }));
            }
            Err(err) => {
                warn!("Intake tab {tab} failed: {err:#}");
                failed_count += 1;
                substeps.push(json!({
                    "step": format!("intake:{tab}"),
                    "status": "failed",
                    "error": err.to_string(),
                }));
            }
        }
    }

    // Flow 1b: central backlog PM edits → DB (owned fields only).
    match BacklogSyncService::sync_sheet_to_db(
        db,
        sheet,
        &settings.backlog_spreadsheet_id,
        &settings.backlog_tab,
        None,
    )
    .await
    {
        Ok(outcome) => {
            saved_count += outcome.upserts;
            substeps.push(json!({
                "step": "backlog_update",
                "status": "ok",
                "count": outcome.upserts,
                "skipped": outcome.skipped,
            }));
        }
        Err(err) => {
            warn!("Backlog update failed: {err:#}");
            substeps.push(json!({
                "step": "backlog_update",
                "status": "failed",
                "error": err.to_string(),
            }));
        }
    }

    // Flow 1c: DB → central backlog projection.
    let written = BacklogSyncService::write_backlog_sheet(
        db,
        sheet,
        &settings.backlog_spreadsheet_id,
        &settings.backlog_tab,
        None,
    )
    .await?;
    substeps.push(json!({
        "step": "backlog_sheet_write",
        "status": "ok",
        "count": written,
    }));

    Ok(json!({
        "saved_count": saved_count,
        "failed_count": failed_count,
        "backlog_rows_written": written,
        "substeps": substeps,
    }))
}
