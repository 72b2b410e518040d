//! ProductOps Scoring_Inputs → DB strong sync.

use crate::client::SheetClient;
use crate::reader::TabShape;
use crate::readers::{read_scoring_inputs, ScoringInputsRow};
use crate::sync::{in_scope, status_message, write_row_statuses, RowFailure, SyncOutcome};
use anyhow::Result;
use roadmap_db::{Db, Framework, ScoringInputFields};
use roadmap_protocol::provenance::FLOW3_PRODUCTOPS_READ_INPUTS;
use tracing::info;

pub struct ScoringInputsSyncService;

impl ScoringInputsSyncService {
    pub async fn preview_rows(
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
    ) -> Result<(Vec<ScoringInputsRow>, Vec<String>)> {
        let rows = read_scoring_inputs(client, spreadsheet_id, tab).await?;
        let mut warnings = Vec::new();
        for row in &rows {
            if row.initiative_key.is_none() {
                warnings.push(format!("row {}: missing initiative key", row.row_number));
            }
            if let Some(framework) = &row.active_scoring_framework {
                if Framework::parse(framework).is_none() {
                    warnings.push(format!(
                        "row {}: unknown framework {framework}",
                        row.row_number
                    ));
                }
            }
        }
        Ok((rows, warnings))
    }

    /// Strong sync: every scoring-input column is written as-is, so a blank
    /// sheet cell clears the stale DB value.
    pub async fn sync_sheet_to_db(
        db: &Db,
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
        scope_keys: Option<&[String]>,
    ) -> Result<SyncOutcome> {
        let rows = read_scoring_inputs(client, spreadsheet_id, tab).await?;
        let shape = TabShape::standard();
        let repo = db.initiatives();

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
            if repo.find_by_key(key).await?.is_none() {
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
            }

            let fields = ScoringInputFields {
                rice_reach: row.rice_reach,
                rice_impact: row.rice_impact,
                rice_confidence: row.rice_confidence,
                rice_effort: row.rice_effort,
                wsjf_business_value: row.wsjf_business_value,
                wsjf_time_criticality: row.wsjf_time_criticality,
                wsjf_risk_reduction: row.wsjf_risk_reduction,
                wsjf_job_size: row.wsjf_job_size,
                active_scoring_framework: row
                    .active_scoring_framework
                    .as_deref()
                    .and_then(Framework::parse),
                use_math_model: row.use_math_model,
                strategic_priority_coefficient: row.strategic_priority_coefficient,
            };
            repo.update_scoring_inputs(key, &fields, FLOW3_PRODUCTOPS_READ_INPUTS)
                .await?;
            outcome.upserts += 1;
            statuses.push((row.row_number, status_message(true, None)));
        }

        write_row_statuses(client, spreadsheet_id, tab, &shape, &statuses).await;
        info!(
            "Scoring inputs sync {tab}: {} upserts, {} skipped",
            outcome.upserts, outcome.skipped
        );
        Ok(outcome)
    }
}
