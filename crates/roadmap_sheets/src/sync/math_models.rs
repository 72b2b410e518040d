//! ProductOps MathModels → DB sync.

use crate::client::SheetClient;
use crate::reader::TabShape;
use crate::readers::{read_math_models, MathModelRow};
use crate::sync::{
    in_scope, parse_metric_chain, status_message, write_row_statuses, RowFailure, SyncOutcome,
};
use anyhow::Result;
use roadmap_db::{Db, MathModelFields};
use tracing::info;

const PROVENANCE: &str = "pm.save_selected";

pub struct MathModelSyncService;

impl MathModelSyncService {
    pub async fn preview_rows(
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
    ) -> Result<(Vec<MathModelRow>, Vec<String>)> {
        let rows = read_math_models(client, spreadsheet_id, tab).await?;
        let mut warnings = Vec::new();
        for row in &rows {
            if row.initiative_key.is_none() || row.model_name.is_none() {
                warnings.push(format!(
                    "row {}: missing initiative key or model name",
                    row.row_number
                ));
            }
            if let Some(formula) = &row.formula_text {
                for warning in roadmap_formula::validate_formula(formula, 20) {
                    warnings.push(format!("row {}: {warning}", row.row_number));
                }
            }
        }
        Ok((rows, warnings))
    }

    /// Upsert model rows by `(initiative_key, model_name)`, parsing the
    /// metric chain text into its JSON form. User-entered columns are only
    /// written from the sheet, never from LLM suggestions.
    pub async fn sync_sheet_to_db(
        db: &Db,
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
        scope_keys: Option<&[String]>,
    ) -> Result<SyncOutcome> {
        let rows = read_math_models(client, spreadsheet_id, tab).await?;
        let shape = TabShape::standard();
        let initiatives = db.initiatives();
        let models = db.math_models();

        let mut outcome = SyncOutcome::default();
        let mut statuses: Vec<(usize, String)> = Vec::new();

        for row in &rows {
            if !in_scope(row.initiative_key.as_deref(), scope_keys) {
                continue;
            }
            let (Some(key), Some(model_name)) = (&row.initiative_key, &row.model_name) else {
                outcome.skipped += 1;
                statuses.push((
                    row.row_number,
                    status_message(false, Some("missing initiative key or model name")),
                ));
                outcome.failures.push(RowFailure {
                    row_number: row.row_number,
                    key: row.initiative_key.clone(),
                    reason: "missing initiative key or model name".to_string(),
                });
                continue;
            };
            if initiatives.find_by_key(key).await?.is_none() {
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

            let metric_chain_json = row.metric_chain_text.as_deref().map(|text| {
                serde_json::to_string(&parse_metric_chain(text))
                    .unwrap_or_else(|_| "[]".to_string())
            });

            let fields = MathModelFields {
                target_kpi_key: row.target_kpi_key.clone(),
                metric_chain_text: row.metric_chain_text.clone(),
                metric_chain_json: metric_chain_json.clone(),
                formula_text: row.formula_text.clone(),
                assumptions_text: row.assumptions_text.clone(),
                is_primary: row.is_primary,
                approved_by_user: row.approved_by_user,
                suggested_by_llm: None,
            };
            models.upsert(key, model_name, &fields, PROVENANCE).await?;

            // The primary model's chain is also the initiative's chain.
            if row.is_primary == Some(true) {
                if let Some(chain) = metric_chain_json.as_deref() {
                    initiatives.update_metric_chain(key, Some(chain)).await?;
                }
            }
            outcome.upserts += 1;
            statuses.push((row.row_number, status_message(true, None)));
        }

        write_row_statuses(client, spreadsheet_id, tab, &shape, &statuses).await;
        info!(
            "Math model sync {tab}: {} upserts, {} skipped",
            outcome.upserts, outcome.skipped
        );
        Ok(outcome)
    }
}
