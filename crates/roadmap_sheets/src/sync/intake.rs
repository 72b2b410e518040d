//! Intake tab → DB sync with key assignment and back-write.

use crate::cells::CellValue;
use crate::client::{BatchPlan, Rect, SheetClient};
use crate::reader::{find_column, TabShape};
use crate::readers::{read_intake, IntakeRow};
use crate::sync::{in_scope, status_message, write_row_statuses, RowFailure, SyncOutcome};
use anyhow::Result;
use roadmap_db::{Db, InitiativeStatus, IntakeFields};
use roadmap_ids::InitiativeKey;
use roadmap_protocol::provenance::FLOW1_INTAKE_SYNC;
use tracing::{info, warn};

pub struct IntakeSyncService;

impl IntakeSyncService {
    /// Read-only preview: rows plus validation warnings, no DB access.
    pub async fn preview_rows(
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
    ) -> Result<(Vec<IntakeRow>, Vec<String>)> {
        let rows = read_intake(client, spreadsheet_id, tab).await?;
        let warnings = rows
            .iter()
            .filter(|row| row.title.is_none())
            .map(|row| format!("row {}: missing title", row.row_number))
            .collect();
        Ok((rows, warnings))
    }

    /// Upsert intake rows. New rows get the next `initiative_key`, which is
    /// queued for back-write into the source row's key column in the same
    /// request batch as the status write-back.
    pub async fn sync_sheet_to_db(
        db: &Db,
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
        scope_keys: Option<&[String]>,
    ) -> Result<SyncOutcome> {
        let rows = read_intake(client, spreadsheet_id, tab).await?;
        let shape = TabShape::standard();
        let repo = db.initiatives();

        let mut outcome = SyncOutcome::default();
        let mut statuses: Vec<(usize, String)> = Vec::new();
        let mut key_backfills: Vec<(usize, String)> = Vec::new();

        for row in &rows {
            if !in_scope(row.initiative_key.as_deref(), scope_keys) {
                continue;
            }

            match Self::sync_row(&repo, spreadsheet_id, tab, row).await {
                Ok(RowResult::Updated) => {
                    outcome.upserts += 1;
                    statuses.push((row.row_number, status_message(true, None)));
                }
                Ok(RowResult::Created(key)) => {
                    outcome.upserts += 1;
                    statuses.push((row.row_number, status_message(true, None)));
                    key_backfills.push((row.row_number, key));
                }
                Ok(RowResult::Skipped(reason)) => {
                    outcome.skipped += 1;
                    statuses.push((row.row_number, status_message(false, Some(&reason))));
                    outcome.failures.push(RowFailure {
                        row_number: row.row_number,
                        key: row.initiative_key.clone(),
                        reason,
                    });
                }
                Err(err) => {
                    let reason = err.to_string();
                    statuses.push((row.row_number, status_message(false, Some(&reason))));
                    outcome.failures.push(RowFailure {
                        row_number: row.row_number,
                        key: row.initiative_key.clone(),
                        reason,
                    });
                }
            }
        }

        Self::flush_key_backfills(client, spreadsheet_id, tab, &shape, &key_backfills).await;
        write_row_statuses(client, spreadsheet_id, tab, &shape, &statuses).await;

        info!(
            "Intake sync {tab}: {} upserts, {} skipped, {} failures",
            outcome.upserts,
            outcome.skipped,
            outcome.failures.len()
        );
        Ok(outcome)
    }

    async fn sync_row(
        repo: &roadmap_db::repo::InitiativeRepo<'_>,
        spreadsheet_id: &str,
        tab: &str,
        row: &IntakeRow,
    ) -> Result<RowResult> {
        let Some(title) = row.title.clone() else {
            return Ok(RowResult::Skipped("missing title".to_string()));
        };

        let fields = IntakeFields {
            title,
            requesting_team: row.requesting_team.clone(),
            requester_name: row.requester_name.clone(),
            requester_email: row.requester_email.clone(),
            country: row.country.clone(),
            product_area: row.product_area.clone(),
            problem_statement: row.problem_statement.clone(),
            desired_outcome: row.desired_outcome.clone(),
            hypothesis: row.hypothesis.clone(),
            customer_segment: row.customer_segment.clone(),
            initiative_type: row.initiative_type.clone(),
            strategic_theme: row.strategic_theme.clone(),
            deadline_date: row.deadline_date,
            impact_low: row.impact_low,
            impact_expected: row.impact_expected,
            impact_high: row.impact_high,
            effort_tshirt: row.effort_tshirt.clone(),
            effort_engineering_days: row.effort_engineering_days,
            risk_level: row.risk_level.clone(),
            is_mandatory: row.is_mandatory.unwrap_or(false),
            dependencies_text: row.dependencies_text.clone(),
            status: row.status.as_deref().and_then(InitiativeStatus::parse),
        };

        // Find by key when the row carries one, else by source position.
        if let Some(raw_key) = &row.initiative_key {
            let key = InitiativeKey::parse(raw_key)
                .map_err(|e| anyhow::anyhow!("bad initiative key: {e}"))?;
            if repo.find_by_key(key.as_str()).await?.is_none() {
                return Ok(RowResult::Skipped(format!("unknown key {key}")));
            }
            repo.update_intake_fields(key.as_str(), &fields, FLOW1_INTAKE_SYNC)
                .await?;
            return Ok(RowResult::Updated);
        }

        if let Some(existing) = repo
            .find_by_source(spreadsheet_id, tab, row.row_number as i64)
            .await?
        {
            repo.update_intake_fields(&existing.initiative_key, &fields, FLOW1_INTAKE_SYNC)
                .await?;
            return Ok(RowResult::Created(existing.initiative_key));
        }

        let key = repo.next_key().await?;
        repo.create_from_intake(
            &key,
            spreadsheet_id,
            tab,
            row.row_number as i64,
            &fields,
            FLOW1_INTAKE_SYNC,
        )
        .await?;
        Ok(RowResult::Created(key.as_str().to_string()))
    }

    /// Write assigned keys back into the source rows' key column.
    async fn flush_key_backfills(
        client: &dyn SheetClient,
        spreadsheet_id: &str,
        tab: &str,
        shape: &TabShape,
        backfills: &[(usize, String)],
    ) {
        if backfills.is_empty() {
            return;
        }
        let column = match find_column(
            client,
            spreadsheet_id,
            tab,
            shape,
            "initiative_key",
            &["key", "init_key", "id"],
        )
        .await
        {
            Ok(Some(column)) => column,
            Ok(None) => {
                warn!("Intake tab {tab} has no key column; backfill dropped");
                return;
            }
            Err(err) => {
                warn!("Key backfill skipped for {tab}: {err}");
                return;
            }
        };

        let mut plan = BatchPlan::default();
        for (row, key) in backfills {
            plan.push(Rect::cell(tab, *row, column), vec![vec![CellValue::text(key)]]);
        }
        if let Err(err) = crate::writers::execute_plan(client, spreadsheet_id, plan).await {
            warn!("Key backfill failed for {tab}: {err}");
        }
    }
}

enum RowResult {
    Updated,
    Created(String),
    Skipped(String),
}
