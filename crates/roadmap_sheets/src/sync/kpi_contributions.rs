//! ProductOps KPI_Contributions → DB sync: PM override and unlock.

use crate::cells::CellValue;
use crate::client::SheetClient;
use crate::reader::TabShape;
use crate::readers::{read_kpi_contributions, KpiContributionRow};
use crate::sync::{in_scope, status_message, write_row_statuses, RowFailure, SyncOutcome};
use anyhow::Result;
use roadmap_db::{ContributionSource, Db, KpiLevel};
use std::collections::HashMap;
use tracing::info;

pub struct KpiContributionSyncService;

impl KpiContributionSyncService {
    pub async fn preview_rows(
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
    ) -> Result<(Vec<KpiContributionRow>, Vec<String>)> {
        let rows = read_kpi_contributions(client, spreadsheet_id, tab).await?;
        let warnings = rows
            .iter()
            .filter(|row| {
                !row.kpi_contribution_cell.is_blank()
                    && parse_contribution_cell(&row.kpi_contribution_cell).is_none()
            })
            .map(|row| format!("row {}: cell is not a JSON map of kpi to number", row.row_number))
            .collect();
        Ok((rows, warnings))
    }

    /// A present, valid JSON map installs a PM override. A cleared cell on
    /// a row whose current source is `pm_override` unlocks it. Keys outside
    /// the active north-star/strategic registry are dropped with warnings.
    pub async fn sync_sheet_to_db(
        db: &Db,
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
        scope_keys: Option<&[String]>,
    ) -> Result<SyncOutcome> {
        let rows = read_kpi_contributions(client, spreadsheet_id, tab).await?;
        let shape = TabShape::standard();
        let initiatives = db.initiatives();

        // Valid override keys: active registry rows at contributing levels.
        let registry: Vec<String> = db
            .metrics()
            .list_active()
            .await?
            .into_iter()
            .filter(|m| m.kpi_level.contributes())
            .map(|m| m.kpi_key)
            .collect();

        let mut outcome = SyncOutcome::default();
        let mut statuses: Vec<(usize, String)> = Vec::new();

        for row in &rows {
            if !in_scope(row.initiative_key.as_deref(), scope_keys) {
                continue;
            }
            let Some(key) = &row.initiative_key else {
                outcome.skipped += 1;
                statuses.push((
                    row.row_number,
                    status_message(false, Some("missing initiative key")),
                ));
                outcome.failures.push(RowFailure {
                    row_number: row.row_number,
                    key: None,
                    reason: "missing initiative key".to_string(),
                });
                continue;
            };
            let Some(initiative) = initiatives.find_by_key(key).await? else {
                outcome.skipped += 1;
                statuses.push((
                    row.row_number,
                    status_message(false, Some(&format!("unknown key {key}"))),
                ));
                outcome.failures.push(RowFailure {
                    row_number: row.row_number,
                    key: Some(key.clone()),
                    reason: format!("unknown key {key}"),
                });
                continue;
            };

            if row.kpi_contribution_cell.is_blank() {
                // Cleared cell unlocks a PM override; otherwise nothing to do.
                if initiative.kpi_contribution_source == Some(ContributionSource::PmOverride) {
                    initiatives.update_kpi_active(key, None, None).await?;
                    outcome.unlocked += 1;
                    statuses.push((row.row_number, status_message(true, None)));
                } else {
                    outcome.skipped += 1;
                }
                continue;
            }

            let Some(map) = parse_contribution_cell(&row.kpi_contribution_cell) else {
                outcome.skipped += 1;
                statuses.push((
                    row.row_number,
                    status_message(false, Some("cell is not a JSON map of kpi to number")),
                ));
                outcome.failures.push(RowFailure {
                    row_number: row.row_number,
                    key: Some(key.clone()),
                    reason: "invalid contribution JSON".to_string(),
                });
                continue;
            };

            // Drop keys missing from the registry; warn but keep the rest.
            let mut kept: HashMap<String, f64> = HashMap::new();
            let mut dropped: Vec<String> = Vec::new();
            for (kpi, value) in map {
                if registry.contains(&kpi) {
                    kept.insert(kpi, value);
                } else {
                    dropped.push(kpi);
                }
            }
            if !dropped.is_empty() {
                dropped.sort();
                outcome.failures.push(RowFailure {
                    row_number: row.row_number,
                    key: Some(key.clone()),
                    reason: format!("dropped unknown kpi keys: {}", dropped.join(", ")),
                });
            }

            let json = serde_json::to_string(&kept)?;
            initiatives
                .update_kpi_active(key, Some(&json), Some(ContributionSource::PmOverride))
                .await?;
            outcome.upserts += 1;
            statuses.push((row.row_number, status_message(true, None)));
        }

        write_row_statuses(client, spreadsheet_id, tab, &shape, &statuses).await;
        info!(
            "KPI contribution sync {tab}: {} overrides, {} unlocked, {} skipped",
            outcome.upserts, outcome.unlocked, outcome.skipped
        );
        Ok(outcome)
    }
}

fn parse_contribution_cell(cell: &CellValue) -> Option<HashMap<String, f64>> {
    let text = cell.as_trimmed_text()?;
    serde_json::from_str::<HashMap<String, f64>>(&text).ok()
}
