//! ProductOps Params → DB sync.

use crate::client::SheetClient;
use crate::reader::TabShape;
use crate::readers::{read_params, ParamRow};
use crate::sync::{in_scope, status_message, write_row_statuses, RowFailure, SyncOutcome};
use anyhow::Result;
use roadmap_db::{Db, Framework, ParamFields};
use tracing::info;

const PROVENANCE: &str = "pm.save_selected";

pub struct ParamSyncService;

impl ParamSyncService {
    pub async fn preview_rows(
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
    ) -> Result<(Vec<ParamRow>, Vec<String>)> {
        let rows = read_params(client, spreadsheet_id, tab).await?;
        let warnings = rows
            .iter()
            .filter_map(|row| {
                let framework = row.framework.as_deref()?;
                if Framework::parse(framework).is_none() {
                    Some(format!(
                        "row {}: unknown framework {framework}",
                        row.row_number
                    ))
                } else {
                    None
                }
            })
            .collect();
        Ok((rows, warnings))
    }

    /// Upsert parameter rows. `approved` gates downstream evaluation, so it
    /// is carried verbatim from the sheet.
    pub async fn sync_sheet_to_db(
        db: &Db,
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
        scope_keys: Option<&[String]>,
    ) -> Result<SyncOutcome> {
        let rows = read_params(client, spreadsheet_id, tab).await?;
        let shape = TabShape::standard();
        let initiatives = db.initiatives();
        let params = db.params();

        let mut outcome = SyncOutcome::default();
        let mut statuses: Vec<(usize, String)> = Vec::new();

        for row in &rows {
            if !in_scope(row.initiative_key.as_deref(), scope_keys) {
                continue;
            }

            let failure = |reason: String| RowFailure {
                row_number: row.row_number,
                key: row.initiative_key.clone(),
                reason,
            };

            let (Some(key), Some(param_name)) = (&row.initiative_key, &row.param_name) else {
                outcome.skipped += 1;
                statuses.push((
                    row.row_number,
                    status_message(false, Some("missing initiative key or param name")),
                ));
                outcome
                    .failures
                    .push(failure("missing initiative key or param name".to_string()));
                continue;
            };
            let Some(framework) = row.framework.as_deref().and_then(Framework::parse) else {
                outcome.skipped += 1;
                statuses.push((
                    row.row_number,
                    status_message(false, Some("unknown framework")),
                ));
                outcome.failures.push(failure(format!(
                    "unknown framework {:?}",
                    row.framework.as_deref().unwrap_or("")
                )));
                continue;
            };
            if initiatives.find_by_key(key).await?.is_none() {
                outcome.skipped += 1;
                statuses.push((
                    row.row_number,
                    status_message(false, Some(&format!("unknown key {key}"))),
                ));
                outcome.failures.push(failure(format!("unknown key {key}")));
                continue;
            }

            let fields = ParamFields {
                value: row.value,
                param_display: row.param_display.clone(),
                description: row.description.clone(),
                unit: row.unit.clone(),
                min_value: row.min,
                max_value: row.max,
                source: row.source.clone(),
                approved: row.approved,
                notes: row.notes.clone(),
            };
            params
                .upsert(
                    key,
                    framework,
                    param_name,
                    row.model_name.as_deref().unwrap_or(""),
                    &fields,
                    PROVENANCE,
                )
                .await?;
            outcome.upserts += 1;
            statuses.push((row.row_number, status_message(true, None)));
        }

        write_row_statuses(client, spreadsheet_id, tab, &shape, &statuses).await;
        info!(
            "Param sync {tab}: {} upserts, {} skipped",
            outcome.upserts, outcome.skipped
        );
        Ok(outcome)
    }
}
