//! Optimization jobs: compile constraints from the Optimization Center,
//! build and solve the problem, persist and publish results.

use crate::context::ActionContext;
use crate::jobs::{
    TAB_CANDIDATES, TAB_CONSTRAINTS, TAB_GAPS, TAB_RESULTS, TAB_RUNS, TAB_SCENARIO_CONFIG,
    TAB_TARGETS,
};
use anyhow::{Context as _, Result};
use chrono::{NaiveDate, Utc};
use roadmap_db::{ObjectiveMode, RunState, ScenarioFields};
use roadmap_ids::ActionRunId;
use roadmap_optimizer::{
    check_feasibility, compile_constraints, ProblemScope, RawConstraintRow, RawTargetRow,
    SolutionStatus,
};
use roadmap_sheets::cells::{opt_number_cell, CellValue};
use roadmap_sheets::reader::TabShape;
use roadmap_sheets::readers::{
    read_candidates, read_constraints, read_scenario_config, read_targets,
};
use roadmap_sheets::writers::{append_rows, upsert_rows, AppendConfig, UpsertConfig, WriteRecord};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

/// `pm.optimize_run_selected_candidates`: scenario from options, candidates
/// from the selection scope.
pub async fn run_selected_candidates(ctx: ActionContext) -> Result<Value> {
    let keys = ctx.selection_key_strings();
    if keys.is_empty() {
        return Ok(json!({ "selected_count": 0 }));
    }
    let (scenario_name, set_name) = scenario_from_options(&ctx)?;
    run_optimization(
        &ctx,
        &scenario_name,
        &set_name,
        ProblemScope::SelectedKeys { keys },
    )
    .await
}

/// `pm.optimize_run_all_candidates`: scenario scope, all matching
/// candidates.
pub async fn run_all_candidates(ctx: ActionContext) -> Result<Value> {
    let (scenario_name, set_name) = scenario_from_scope(&ctx)?;
    run_optimization(&ctx, &scenario_name, &set_name, ProblemScope::AllCandidates).await
}

/// `pm.populate_candidates`: refresh the Candidates tab from the DB
/// (read-only projection columns).
pub async fn populate_candidates(ctx: ActionContext) -> Result<Value> {
    let (scenario_name, _) = scenario_from_scope(&ctx)?;
    let scenario = ctx
        .db()
        .optimization()
        .get_scenario(&scenario_name)
        .await?;
    let period = scenario.as_ref().and_then(|s| s.period_key.clone());

    let initiatives = ctx
        .db()
        .initiatives()
        .list_candidates(period.as_deref())
        .await?;
    let records: Vec<WriteRecord> = initiatives
        .iter()
        .map(|i| {
            let mut record = WriteRecord::new(&i.initiative_key)
                .set("title", CellValue::text(&i.title))
                .set(
                    "engineering_tokens",
                    i.engineering_tokens
                        .map(|t| CellValue::Number(t as f64))
                        .unwrap_or(CellValue::Blank),
                )
                .set("active_overall_score", opt_number_cell(i.overall_score));
            for dimension in ["country", "department", "category", "program", "product", "segment"]
            {
                let value = i.dimension_value(dimension);
                record = record.set(
                    dimension,
                    value.map(CellValue::text).unwrap_or(CellValue::Blank),
                );
            }
            record
        })
        .collect();

    let spreadsheet_id = ctx.spreadsheet_or(&ctx.settings().optimization_spreadsheet_id);
    let config = UpsertConfig {
        tab: TAB_CANDIDATES.to_string(),
        shape: TabShape::optimization_center(),
        key_column: "initiative_key".to_string(),
        owned_columns: [
            "title",
            "engineering_tokens",
            "active_overall_score",
            "country",
            "department",
            "category",
            "program",
            "product",
            "segment",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect(),
        provenance: "pm.populate_candidates".to_string(),
    };
    let report = upsert_rows(ctx.sheet(), &spreadsheet_id, &config, &records).await?;

    Ok(json!({
        "saved_count": records.len(),
        "updated_rows": report.updated_rows,
        "appended_rows": report.appended_rows,
        "scenario_name": scenario_name,
    }))
}

/// The full sequence: compile → build → feasibility → solve → persist →
/// publish.
async fn run_optimization(
    ctx: &ActionContext,
    scenario_name: &str,
    set_name: &str,
    scope: ProblemScope,
) -> Result<Value> {
    let db = ctx.db();
    let sheet = ctx.sheet();
    let spreadsheet_id = ctx.spreadsheet_or(&ctx.settings().optimization_spreadsheet_id);
    let provenance = format!("pm.{}", ctx.request.action.trim_start_matches("pm."));
    let mut substeps = Vec::new();

    // Scenario_Config rows → DB, remembering the period end for filtering.
    let scenario_rows = read_scenario_config(sheet, &spreadsheet_id, TAB_SCENARIO_CONFIG).await?;
    let mut period_end: Option<NaiveDate> = None;
    for row in &scenario_rows {
        let Some(name) = &row.scenario_name else {
            continue;
        };
        let mode = row
            .objective_mode
            .as_deref()
            .and_then(ObjectiveMode::parse)
            .unwrap_or(ObjectiveMode::NorthStar);
        db.optimization()
            .upsert_scenario(
                name,
                &ScenarioFields {
                    period_key: row.period_key.clone(),
                    capacity_total_tokens: row.capacity_total_tokens.unwrap_or(0),
                    objective_mode: mode,
                    objective_weights_json: row.objective_weights_json.clone(),
                    notes: row.notes.clone(),
                },
                &provenance,
            )
            .await?;
        if name == scenario_name {
            period_end = row.period_end;
        }
    }
    substeps.push(json!({ "step": "scenario_config", "status": "ok", "count": scenario_rows.len() }));

    // Constraints + Targets → compiler → persisted compiled set.
    let constraint_rows = read_constraints(sheet, &spreadsheet_id, TAB_CONSTRAINTS).await?;
    let target_rows = read_targets(sheet, &spreadsheet_id, TAB_TARGETS).await?;
    let valid_kpis: HashSet<String> = db
        .metrics()
        .list_active()
        .await?
        .into_iter()
        .map(|m| m.kpi_key)
        .collect();

    let raw_constraints: Vec<RawConstraintRow> = constraint_rows
        .iter()
        .map(|row| RawConstraintRow {
            row_number: row.row_number,
            scenario_name: row.scenario_name.clone().unwrap_or_default(),
            constraint_set_name: row
                .constraint_set_name
                .clone()
                .unwrap_or_else(|| set_name.to_string()),
            kind: row.constraint_type.clone().unwrap_or_default(),
            dimension: row.dimension.clone(),
            dimension_key: row.dimension_key.clone(),
            members: row.initiative_keys.clone(),
            value: row.value,
            bonus: row.bonus,
            notes: row.notes.clone(),
        })
        .collect();
    let raw_targets: Vec<RawTargetRow> = target_rows
        .iter()
        .filter_map(|row| {
            row.kpi_key.as_ref().map(|kpi| RawTargetRow {
                row_number: row.row_number,
                scenario_name: row.scenario_name.clone().unwrap_or_default(),
                constraint_set_name: row
                    .constraint_set_name
                    .clone()
                    .unwrap_or_else(|| set_name.to_string()),
                dimension: row.dimension.clone(),
                dimension_key: row.dimension_key.clone(),
                kpi_key: kpi.clone(),
                target_type: row.target_type.clone().unwrap_or_default(),
                value: row.value,
                notes: row.notes.clone(),
            })
        })
        .collect();

    let (compiled_sets, messages) =
        compile_constraints(&raw_constraints, &raw_targets, Some(&valid_kpis));
    let group = (scenario_name.to_string(), set_name.to_string());
    let constraint_set_id = match compiled_sets.get(&group) {
        Some(compiled) => Some(
            db.optimization()
                .save_constraint_set(
                    scenario_name,
                    set_name,
                    &serde_json::to_string(compiled)?,
                    Some(&serde_json::to_string(&messages)?),
                    &provenance,
                )
                .await?,
        ),
        None => None,
    };
    substeps.push(json!({
        "step": "compile_constraints",
        "status": "ok",
        "count": compiled_sets.len(),
        "messages": messages,
    }));

    // Candidates-tab projection, for token mismatch diagnostics only.
    let projected: BTreeMap<String, i64> = read_candidates(sheet, &spreadsheet_id, TAB_CANDIDATES)
        .await
        .map(|rows| {
            rows.into_iter()
                .filter_map(|row| row.initiative_key.zip(row.engineering_tokens))
                .collect()
        })
        .unwrap_or_default();

    let problem = roadmap_optimizer::build_problem(
        db,
        scenario_name,
        set_name,
        scope,
        period_end,
        if projected.is_empty() {
            None
        } else {
            Some(&projected)
        },
    )
    .await?;
    substeps.push(json!({
        "step": "build_problem",
        "status": "ok",
        "count": problem.candidates.len(),
    }));

    // Ledger the optimization run.
    let run_id = ActionRunId::mint(Utc::now());
    let scenario_row = db
        .optimization()
        .get_scenario(scenario_name)
        .await?
        .context("scenario vanished after upsert")?;
    db.optimization()
        .create_run(
            run_id.as_str(),
            Some(scenario_row.id),
            constraint_set_id,
            ctx.deps.solver.name(),
            ctx.deps.solver.version(),
        )
        .await?;
    db.optimization()
        .snapshot_inputs(run_id.as_str(), &serde_json::to_string(&problem)?)
        .await?;

    // Feasibility gate: error-level reports skip the solver entirely.
    let report = check_feasibility(&problem);
    substeps.push(json!({
        "step": "feasibility",
        "status": report.status.clone(),
        "issues": report.issues.len(),
    }));
    if report.is_error() {
        let result = json!({ "feasibility": &report });
        db.optimization()
            .finish_run(run_id.as_str(), RunState::Failed, &result.to_string())
            .await?;
        publish_runs_row(ctx, &spreadsheet_id, run_id.as_str(), scenario_name, "failed", None)
            .await;
        publish_gap_rows(ctx, &spreadsheet_id, run_id.as_str(), &report).await;
        return Ok(json!({
            "run_id": run_id.as_str(),
            "status": "failed",
            "feasibility": &report,
            "substeps": substeps,
        }));
    }

    // Solve.
    let solution = ctx
        .deps
        .solver
        .solve(&problem)
        .map_err(|e| anyhow::anyhow!("solver error: {e}"))?;
    let solved = matches!(
        solution.status,
        SolutionStatus::Optimal | SolutionStatus::Feasible
    );
    let run_state = if solved {
        RunState::Succeeded
    } else {
        RunState::Failed
    };
    let result = json!({
        "solution": &solution,
        "feasibility": &report,
        "diagnostics": &problem.diagnostics,
    });
    db.optimization()
        .finish_run(run_id.as_str(), run_state, &result.to_string())
        .await?;
    substeps.push(json!({
        "step": "solve",
        "status": format!("{:?}", solution.status).to_lowercase(),
        "count": solution.selected_items.iter().filter(|i| i.selected).count(),
    }));

    // Portfolio + items.
    if solved {
        let run_row = db
            .optimization()
            .get_run(run_id.as_str())
            .await?
            .context("run vanished")?;
        let items: Vec<(String, bool, i64)> = solution
            .selected_items
            .iter()
            .map(|item| {
                (
                    item.initiative_key.clone(),
                    item.selected,
                    item.allocated_tokens,
                )
            })
            .collect();
        db.optimization()
            .insert_portfolio(
                run_row.id,
                scenario_name,
                Some(solution.total_objective),
                &items,
            )
            .await?;
    }

    // Publish Runs / Results / Gaps rows (append-only, best-effort).
    let status_text = match solution.status {
        SolutionStatus::Optimal => "optimal",
        SolutionStatus::Feasible => "feasible",
        SolutionStatus::Infeasible => "infeasible",
        SolutionStatus::Error => "error",
    };
    publish_runs_row(
        ctx,
        &spreadsheet_id,
        run_id.as_str(),
        scenario_name,
        status_text,
        Some(solution.total_objective),
    )
    .await;
    publish_result_rows(ctx, &spreadsheet_id, run_id.as_str(), &solution).await;
    publish_gap_rows(ctx, &spreadsheet_id, run_id.as_str(), &report).await;

    info!(
        "Optimization run {} on {scenario_name}/{set_name}: {status_text}",
        run_id.as_str()
    );
    Ok(json!({
        "run_id": run_id.as_str(),
        "status": if solved { "succeeded" } else { "failed" },
        "solver_status": status_text,
        "total_objective": solution.total_objective,
        "selected_count": solution.selected_items.iter().filter(|i| i.selected).count(),
        "substeps": substeps,
    }))
}

fn scenario_from_options(ctx: &ActionContext) -> Result<(String, String)> {
    let scenario = ctx
        .request
        .options
        .extra
        .get("scenario_name")
        .and_then(Value::as_str)
        .context("options.scenario_name is required")?
        .to_string();
    let set = ctx
        .request
        .options
        .extra
        .get("constraint_set_name")
        .and_then(Value::as_str)
        .unwrap_or("base")
        .to_string();
    Ok((scenario, set))
}

fn scenario_from_scope(ctx: &ActionContext) -> Result<(String, String)> {
    match &ctx.request.scope {
        roadmap_protocol::Scope::Scenario {
            scenario_name,
            constraint_set_name,
        } => Ok((
            scenario_name.clone(),
            constraint_set_name.clone().unwrap_or_else(|| "base".to_string()),
        )),
        _ => scenario_from_options(ctx),
    }
}

async fn publish_runs_row(
    ctx: &ActionContext,
    spreadsheet_id: &str,
    run_id: &str,
    scenario_name: &str,
    status: &str,
    total_objective: Option<f64>,
) {
    let mut row: HashMap<String, CellValue> = HashMap::new();
    row.insert("run_id".to_string(), CellValue::text(run_id));
    row.insert("scenario_name".to_string(), CellValue::text(scenario_name));
    row.insert("status".to_string(), CellValue::text(status));
    row.insert(
        "total_objective".to_string(),
        opt_number_cell(total_objective),
    );
    let config = AppendConfig {
        tab: TAB_RUNS.to_string(),
        shape: TabShape::optimization_center(),
        key_column: "run_id".to_string(),
        provenance: pm_provenance(ctx),
    };
    if let Err(err) = append_rows(ctx.sheet(), spreadsheet_id, &config, &[row]).await {
        warn!("Runs publication failed: {err}");
    }
}

async fn publish_result_rows(
    ctx: &ActionContext,
    spreadsheet_id: &str,
    run_id: &str,
    solution: &roadmap_optimizer::OptimizationSolution,
) {
    let rows: Vec<HashMap<String, CellValue>> = solution
        .selected_items
        .iter()
        .map(|item| {
            let mut row = HashMap::new();
            row.insert("run_id".to_string(), CellValue::text(run_id));
            row.insert(
                "initiative_key".to_string(),
                CellValue::text(&item.initiative_key),
            );
            row.insert("selected".to_string(), CellValue::Bool(item.selected));
            row.insert(
                "allocated_tokens".to_string(),
                CellValue::Number(item.allocated_tokens as f64),
            );
            row
        })
        .collect();
    let config = AppendConfig {
        tab: TAB_RESULTS.to_string(),
        shape: TabShape::optimization_center(),
        key_column: "run_id".to_string(),
        provenance: pm_provenance(ctx),
    };
    if let Err(err) = append_rows(ctx.sheet(), spreadsheet_id, &config, &rows).await {
        warn!("Results publication failed: {err}");
    }
}

async fn publish_gap_rows(
    ctx: &ActionContext,
    spreadsheet_id: &str,
    run_id: &str,
    report: &roadmap_optimizer::FeasibilityReport,
) {
    if report.issues.is_empty() {
        return;
    }
    let rows: Vec<HashMap<String, CellValue>> = report
        .issues
        .iter()
        .map(|issue| {
            let mut row = HashMap::new();
            row.insert("run_id".to_string(), CellValue::text(run_id));
            row.insert("code".to_string(), CellValue::text(&issue.code));
            row.insert(
                "severity".to_string(),
                CellValue::text(format!("{:?}", issue.severity).to_lowercase()),
            );
            row.insert("message".to_string(), CellValue::text(&issue.message));
            row.insert("keys".to_string(), CellValue::text(issue.keys.join(", ")));
            row
        })
        .collect();
    let config = AppendConfig {
        tab: TAB_GAPS.to_string(),
        shape: TabShape::optimization_center(),
        key_column: "run_id".to_string(),
        provenance: pm_provenance(ctx),
    };
    if let Err(err) = append_rows(ctx.sheet(), spreadsheet_id, &config, &rows).await {
        warn!("Gaps publication failed: {err}");
    }
}

fn pm_provenance(ctx: &ActionContext) -> String {
    roadmap_protocol::provenance::pm_token(&ctx.request.action)
}
