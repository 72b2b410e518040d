//! ProductOps Metrics_Config → DB sync with the north-star invariant.

use crate::client::SheetClient;
use crate::reader::TabShape;
use crate::readers::{read_metrics_config, MetricsConfigRow};
use crate::sync::{status_message, write_row_statuses, RowFailure, SyncOutcome};
use anyhow::Result;
use roadmap_db::{Db, KpiLevel, MetricFields};
use roadmap_protocol::provenance::FLOW3_PRODUCTOPS_READ_INPUTS;
use tracing::info;

pub struct MetricsConfigSyncService;

impl MetricsConfigSyncService {
    pub async fn preview_rows(
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
    ) -> Result<(Vec<MetricsConfigRow>, Vec<String>)> {
        let rows = read_metrics_config(client, spreadsheet_id, tab).await?;
        let mut warnings = Vec::new();
        let active_stars = rows
            .iter()
            .filter(|row| {
                row.is_active.unwrap_or(true)
                    && row.kpi_level.as_deref().and_then(KpiLevel::parse)
                        == Some(KpiLevel::NorthStar)
            })
            .count();
        if active_stars > 1 {
            warnings.push(format!("{active_stars} active north_star rows; expected at most one"));
        }
        for row in &rows {
            if row.kpi_key.is_none() {
                warnings.push(format!("row {}: missing kpi key", row.row_number));
            }
        }
        Ok((rows, warnings))
    }

    /// Upsert the KPI registry. The sync refuses to commit a registry with
    /// more than one active north-star row: the offending rows are skipped
    /// and reported instead.
    pub async fn sync_sheet_to_db(
        db: &Db,
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
    ) -> Result<SyncOutcome> {
        let rows = read_metrics_config(client, spreadsheet_id, tab).await?;
        let shape = TabShape::standard();
        let repo = db.metrics();

        let mut outcome = SyncOutcome::default();
        let mut statuses: Vec<(usize, String)> = Vec::new();

        // Commit-time invariant: count the incoming active north-star rows
        // before writing anything.
        let mut seen_star: Option<String> = None;

        for row in &rows {
            let failure = |reason: String| RowFailure {
                row_number: row.row_number,
                key: row.kpi_key.clone(),
                reason,
            };

            let Some(kpi_key) = &row.kpi_key else {
                outcome.skipped += 1;
                statuses.push((row.row_number, status_message(false, Some("missing kpi key"))));
                outcome.failures.push(failure("missing kpi key".to_string()));
                continue;
            };
            let Some(level) = row.kpi_level.as_deref().and_then(KpiLevel::parse) else {
                outcome.skipped += 1;
                statuses.push((
                    row.row_number,
                    status_message(false, Some("unknown kpi level")),
                ));
                outcome.failures.push(failure(format!(
                    "unknown kpi level {:?}",
                    row.kpi_level.as_deref().unwrap_or("")
                )));
                continue;
            };

            let is_active = row.is_active.unwrap_or(true);
            if is_active && level == KpiLevel::NorthStar {
                if let Some(existing) = &seen_star {
                    outcome.skipped += 1;
                    let reason =
                        format!("second active north_star (already have {existing})");
                    statuses.push((row.row_number, status_message(false, Some(&reason))));
                    outcome.failures.push(failure(reason));
                    continue;
                }
                seen_star = Some(kpi_key.clone());
            }

            let fields = MetricFields {
                kpi_name: row.kpi_name.clone().unwrap_or_else(|| kpi_key.clone()),
                kpi_level: level,
                unit: row.unit.clone(),
                description: row.description.clone(),
                is_active,
            };
            repo.upsert(kpi_key, &fields, FLOW3_PRODUCTOPS_READ_INPUTS)
                .await?;
            outcome.upserts += 1;
            statuses.push((row.row_number, status_message(true, None)));
        }

        write_row_statuses(client, spreadsheet_id, tab, &shape, &statuses).await;
        info!(
            "Metrics config sync {tab}: {} upserts, {} skipped",
            outcome.upserts, outcome.skipped
        );
        Ok(outcome)
    }
}
