//! Central backlog: sheet → DB owned-field updates, and the DB → sheet
//! projection write.

use crate::cells::{bool_cell, date_cell, opt_number_cell, opt_text_cell, CellValue};
use crate::client::SheetClient;
use crate::reader::TabShape;
use crate::readers::{read_backlog, BacklogRow};
use crate::sync::{in_scope, status_message, write_row_statuses, RowFailure, SyncOutcome};
use crate::writers::{plan_upsert, protect_columns, upsert_rows, UpsertConfig, WriteRecord};
use anyhow::Result;
use roadmap_db::{CentralFields, Db, Framework, Initiative, InitiativeStatus};
use roadmap_protocol::provenance::{FLOW1_BACKLOG_SHEET_WRITE, FLOW1_BACKLOG_UPDATE};
use tracing::info;

/// Columns the DB → sheet projection owns. Unknown columns on the tab are
/// never touched, so PM-added columns survive regeneration.
const PROJECTION_COLUMNS: &[&str] = &[
    "title",
    "requesting_team",
    "requester_name",
    "country",
    "product_area",
    "status",
    "deadline_date",
    "impact_expected",
    "effort_engineering_days",
    "risk_level",
    "is_mandatory",
    "active_scoring_framework",
    "use_math_model",
    "strategic_priority_coefficient",
    "rice_overall_score",
    "wsjf_overall_score",
    "math_overall_score",
    "value_score",
    "effort_score",
    "overall_score",
    "kpi_contribution_json",
    "kpi_contribution_source",
    "is_optimization_candidate",
    "candidate_period_key",
    "engineering_tokens",
];

/// System-owned columns that get warning-only protection.
const PROTECTED_COLUMNS: &[&str] = &[
    "rice_overall_score",
    "wsjf_overall_score",
    "math_overall_score",
    "value_score",
    "effort_score",
    "overall_score",
    "run_status",
    "updated_source",
    "updated_at",
];

pub struct BacklogSyncService;

impl BacklogSyncService {
    pub async fn preview_rows(
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
    ) -> Result<(Vec<BacklogRow>, Vec<String>)> {
        let rows = read_backlog(client, spreadsheet_id, tab).await?;
        let warnings = rows
            .iter()
            .filter(|row| row.initiative_key.is_none())
            .map(|row| format!("row {}: missing initiative key", row.row_number))
            .collect();
        Ok((rows, warnings))
    }

    /// Sheet → DB: write the product-owned column group only. Rows without
    /// a known key are skipped and reported.
    pub async fn sync_sheet_to_db(
        db: &Db,
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
        scope_keys: Option<&[String]>,
    ) -> Result<SyncOutcome> {
        let rows = read_backlog(client, spreadsheet_id, tab).await?;
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
                outcome.failures.push(RowFailure {
                    row_number: row.row_number,
                    key: None,
                    reason: "missing initiative key".to_string(),
                });
                statuses.push((
                    row.row_number,
                    status_message(false, Some("missing initiative key")),
                ));
                continue;
            };

            if repo.find_by_key(key).await?.is_none() {
                outcome.skipped += 1;
                outcome.failures.push(RowFailure {
                    row_number: row.row_number,
                    key: Some(key.clone()),
                    reason: format!("unknown key {key}"),
                });
                statuses.push((
                    row.row_number,
                    status_message(false, Some(&format!("unknown key {key}"))),
                ));
                continue;
            }

            let fields = CentralFields {
                status: row.status.as_deref().and_then(InitiativeStatus::parse),
                active_scoring_framework: row
                    .active_scoring_framework
                    .as_deref()
                    .and_then(Framework::parse),
                use_math_model: row.use_math_model,
                strategic_priority_coefficient: row.strategic_priority_coefficient,
                impact_expected: row.impact_expected,
                effort_engineering_days: row.effort_engineering_days,
                linked_objectives: row.linked_objectives.clone(),
                llm_notes: row.llm_notes.clone(),
                dependencies_keys_json: row.dependencies_keys.as_deref().map(keys_to_json),
                is_optimization_candidate: row.is_optimization_candidate,
                candidate_period_key: row.candidate_period_key.clone(),
                engineering_tokens: row.engineering_tokens,
                department: row.department.clone(),
                category: row.category.clone(),
                program: row.program.clone(),
                product: row.product.clone(),
                segment: row.segment.clone(),
            };
            repo.update_central_fields(key, &fields, FLOW1_BACKLOG_UPDATE)
                .await?;
            outcome.upserts += 1;
            statuses.push((row.row_number, status_message(true, None)));
        }

        write_row_statuses(client, spreadsheet_id, tab, &shape, &statuses).await;
        info!(
            "Backlog update {tab}: {} upserts, {} skipped",
            outcome.upserts, outcome.skipped
        );
        Ok(outcome)
    }

    /// DB → sheet: upsert the full initiative projection by key, preserving
    /// unknown columns and protecting system-owned ones.
    pub async fn write_backlog_sheet(
        db: &Db,
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
        scope_keys: Option<&[String]>,
    ) -> Result<usize> {
        let initiatives = match scope_keys {
            Some(keys) => db.initiatives().list_by_keys(keys).await?,
            None => db.initiatives().list_all().await?,
        };

        let records: Vec<WriteRecord> = initiatives.iter().map(project_initiative).collect();
        let config = UpsertConfig {
            tab: tab.to_string(),
            shape: TabShape::standard(),
            key_column: "initiative_key".to_string(),
            owned_columns: PROJECTION_COLUMNS.iter().map(|c| c.to_string()).collect(),
            provenance: FLOW1_BACKLOG_SHEET_WRITE.to_string(),
        };

        let report = upsert_rows(client, spreadsheet_id, &config, &records).await?;
        protect_columns(
            client,
            spreadsheet_id,
            tab,
            &config.shape,
            PROTECTED_COLUMNS,
            "System-owned column; edits are overwritten by the backlog sync",
        )
        .await?;

        info!(
            "Backlog write {tab}: {} updated, {} appended",
            report.updated_rows, report.appended_rows
        );
        Ok(records.len())
    }

    /// The projection plan without execution, for inspection in tests.
    pub async fn plan_backlog_sheet(
        db: &Db,
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
    ) -> Result<crate::client::BatchPlan> {
        let initiatives = db.initiatives().list_all().await?;
        let records: Vec<WriteRecord> = initiatives.iter().map(project_initiative).collect();
        let config = UpsertConfig {
            tab: tab.to_string(),
            shape: TabShape::standard(),
            key_column: "initiative_key".to_string(),
            owned_columns: PROJECTION_COLUMNS.iter().map(|c| c.to_string()).collect(),
            provenance: FLOW1_BACKLOG_SHEET_WRITE.to_string(),
        };
        let (plan, _) = plan_upsert(client, spreadsheet_id, &config, &records).await?;
        Ok(plan)
    }
}

fn keys_to_json(raw: &str) -> String {
    let keys: Vec<&str> = raw
        .split(|c| c == ',' || c == ';')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect();
    serde_json::to_string(&keys).unwrap_or_else(|_| "[]".to_string())
}

/// Static projection from the initiative row to sheet-safe scalars. Unknown
/// fields are simply not projected.
fn project_initiative(initiative: &Initiative) -> WriteRecord {
    let mut record = WriteRecord::new(&initiative.initiative_key)
        .set("title", CellValue::text(&initiative.title))
        .set("requesting_team", opt_text_cell(initiative.requesting_team.as_deref()))
        .set("requester_name", opt_text_cell(initiative.requester_name.as_deref()))
        .set("country", opt_text_cell(initiative.country.as_deref()))
        .set("product_area", opt_text_cell(initiative.product_area.as_deref()))
        .set("status", CellValue::text(initiative.status.as_str()))
        .set("impact_expected", opt_number_cell(initiative.impact_expected))
        .set(
            "effort_engineering_days",
            opt_number_cell(initiative.effort_engineering_days),
        )
        .set("risk_level", opt_text_cell(initiative.risk_level.as_deref()))
        .set("is_mandatory", bool_cell(initiative.is_mandatory))
        .set(
            "active_scoring_framework",
            opt_text_cell(initiative.active_scoring_framework.map(Framework::as_str)),
        )
        .set("use_math_model", bool_cell(initiative.use_math_model))
        .set(
            "strategic_priority_coefficient",
            opt_number_cell(initiative.strategic_priority_coefficient),
        )
        .set("rice_overall_score", opt_number_cell(initiative.rice_overall_score))
        .set("wsjf_overall_score", opt_number_cell(initiative.wsjf_overall_score))
        .set("math_overall_score", opt_number_cell(initiative.math_overall_score))
        .set("value_score", opt_number_cell(initiative.value_score))
        .set("effort_score", opt_number_cell(initiative.effort_score))
        .set("overall_score", opt_number_cell(initiative.overall_score))
        .set(
            "kpi_contribution_json",
            opt_text_cell(initiative.kpi_contribution_json.as_deref()),
        )
        .set(
            "kpi_contribution_source",
            opt_text_cell(
                initiative
                    .kpi_contribution_source
                    .map(|s| match s {
                        roadmap_db::ContributionSource::Computed => "computed",
                        roadmap_db::ContributionSource::PmOverride => "pm_override",
                    }),
            ),
        )
        .set(
            "is_optimization_candidate",
            bool_cell(initiative.is_optimization_candidate),
        )
        .set(
            "candidate_period_key",
            opt_text_cell(initiative.candidate_period_key.as_deref()),
        )
        .set(
            "engineering_tokens",
            initiative
                .engineering_tokens
                .map(|t| CellValue::Number(t as f64))
                .unwrap_or(CellValue::Blank),
        );

    if let Some(date) = initiative.deadline_date {
        record = record.set("deadline_date", date_cell(date));
    } else {
        record = record.set("deadline_date", CellValue::Blank);
    }
    record
}
