//! PM job handlers: score, switch framework, save, seed params, LLM
//! suggestions.
//!
//! All follow the uniform shape: extract selection scope (bail early when
//! empty), dispatch per tab where relevant, run the pipeline with one
//! substep entry per stage, and let the sync services handle per-row
//! status writes.

use crate::context::ActionContext;
use crate::jobs::{TAB_KPI_CONTRIBUTIONS, TAB_SCORING_INPUTS};
use crate::llm::ModelSuggestionRequest;
use anyhow::{Context as _, Result};
use roadmap_db::{Framework, MathModelFields};
use roadmap_formula::extract_identifiers;
use roadmap_protocol::provenance::{
    FLOW3_PRODUCTOPS_WRITE_KPI_CONTRIBUTIONS, FLOW3_PRODUCTOPS_WRITE_SCORES,
};
use roadmap_scoring::ScoringService;
use roadmap_sheets::cells::{opt_number_cell, opt_text_cell};
use roadmap_sheets::header::normalize;
use roadmap_sheets::reader::TabShape;
use roadmap_sheets::sync::{
    BacklogSyncService, KpiContributionSyncService, MathModelSyncService, MetricsConfigSyncService,
    ParamSyncService, ScoringInputsSyncService,
};
use roadmap_sheets::writers::{upsert_rows, UpsertConfig, WriteRecord};
use serde_json::{json, Value};
use tracing::warn;

/// Score columns the system owns on the Scoring_Inputs tab.
const SCORE_COLUMNS: &[&str] = &[
    "rice_value_score",
    "rice_effort_score",
    "rice_overall_score",
    "wsjf_value_score",
    "wsjf_effort_score",
    "wsjf_overall_score",
    "math_value_score",
    "math_effort_score",
    "math_overall_score",
    "value_score",
    "effort_score",
    "overall_score",
];

const KPI_COLUMNS: &[&str] = &[
    "kpi_contribution_json",
    "kpi_contribution_computed_json",
    "kpi_contribution_source",
];

fn empty_selection() -> Value {
    json!({ "selected_count": 0 })
}

/// `pm.score_selected`: sync inputs, compute all frameworks, write back
/// scores and KPI contributions.
pub async fn score_selected(ctx: ActionContext) -> Result<Value> {
    let keys = ctx.selection_key_strings();
    if keys.is_empty() {
        return Ok(empty_selection());
    }
    let skipped_malformed = ctx.malformed_selection_count();
    let spreadsheet_id = ctx.spreadsheet_or(&ctx.settings().productops_spreadsheet_id);
    let tab = {
        let from_request = ctx.sheet_context().tab;
        if from_request.is_empty() {
            TAB_SCORING_INPUTS.to_string()
        } else {
            from_request
        }
    };
    let mut substeps = Vec::new();

    // 1. Pull the latest PM inputs for the selection.
    let sync = ScoringInputsSyncService::sync_sheet_to_db(
        ctx.db(),
        ctx.sheet(),
        &spreadsheet_id,
        &tab,
        Some(keys.as_slice()),
    )
    .await?;
    substeps.push(json!({
        "step": "sync_inputs",
        "status": "ok",
        "count": sync.upserts,
    }));

    // 2. Compute every framework.
    let service = ScoringService::new(ctx.db().clone(), ctx.settings().enable_score_history);
    let computed = service.compute_for_initiatives(&keys).await?;
    substeps.push(json!({
        "step": "compute_all_frameworks",
        "status": if computed.failed == 0 { "ok" } else { "partial" },
        "count": computed.scored,
        "warnings": computed.warnings,
    }));

    // 3. Write scores back to the ProductOps sheet (best-effort).
    match write_score_columns(&ctx, &spreadsheet_id, &tab, &keys).await {
        Ok(count) => substeps.push(json!({
            "step": "writeback_scores",
            "status": "ok",
            "count": count,
        })),
        Err(err) => {
            warn!("Score write-back failed: {err:#}");
            substeps.push(json!({
                "step": "writeback_scores",
                "status": "failed",
                "error": err.to_string(),
            }));
        }
    }

    // 4. Write KPI contributions back (best-effort).
    match write_kpi_columns(&ctx, &spreadsheet_id, &keys).await {
        Ok(count) => substeps.push(json!({
            "step": "writeback_kpi_contributions",
            "status": "ok",
            "count": count,
        })),
        Err(err) => {
            warn!("KPI write-back failed: {err:#}");
            substeps.push(json!({
                "step": "writeback_kpi_contributions",
                "status": "failed",
                "error": err.to_string(),
            }));
        }
    }

    Ok(json!({
        "selected_count": keys.len() + skipped_malformed,
        "saved_count": computed.scored,
        "failed_count": computed.failed + sync.failed_count(),
        "skipped_no_key": computed.skipped_no_key + skipped_malformed,
        "substeps": substeps,
    }))
}

/// `pm.switch_framework`: copy per-framework scores into the active fields
/// without recomputing. The framework comes from an explicit option or the
/// initiative's stored `active_scoring_framework`.
pub async fn switch_framework(ctx: ActionContext) -> Result<Value> {
    let keys = ctx.selection_key_strings();
    if keys.is_empty() {
        return Ok(empty_selection());
    }

    let framework_override = ctx
        .request
        .options
        .extra
        .get("framework")
        .and_then(Value::as_str)
        .and_then(Framework::parse);

    let service = ScoringService::new(ctx.db().clone(), false);
    let mut activated = 0usize;
    let mut skipped_no_key = ctx.malformed_selection_count();
    let mut skipped_no_framework = 0usize;

    for key in &keys {
        let Some(initiative) = ctx.db().initiatives().find_by_key(key).await? else {
            skipped_no_key += 1;
            continue;
        };
        let Some(framework) = framework_override.or(initiative.active_scoring_framework) else {
            skipped_no_framework += 1;
            continue;
        };
        service.activate_initiative_framework(key, framework).await?;
        activated += 1;
    }

    // Publish the refreshed active triples.
    let spreadsheet_id = ctx.spreadsheet_or(&ctx.settings().productops_spreadsheet_id);
    if let Err(err) = write_score_columns(&ctx, &spreadsheet_id, TAB_SCORING_INPUTS, &keys).await {
        warn!("Score write-back after activation failed: {err:#}");
    }

    Ok(json!({
        "selected_count": keys.len() + ctx.malformed_selection_count(),
        "saved_count": activated,
        "skipped_no_key": skipped_no_key,
        "skipped_no_framework": skipped_no_framework,
    }))
}

/// `pm.save_selected`: tab-aware dispatch to the matching sync service.
pub async fn save_selected(ctx: ActionContext) -> Result<Value> {
    let keys = ctx.selection_key_strings();
    let scope = if keys.is_empty() {
        None
    } else {
        Some(keys.as_slice())
    };
    let sheet_context = ctx.sheet_context();
    let tab = &sheet_context.tab;
    if tab.is_empty() {
        anyhow::bail!("pm.save_selected requires sheet_context.tab");
    }

    let db = ctx.db();
    let sheet = ctx.sheet();
    let settings = ctx.settings();
    let spreadsheet_id = ctx.spreadsheet_or(&settings.productops_spreadsheet_id);

    let outcome = match normalize(tab).as_str() {
        "scoring_inputs" => {
            ScoringInputsSyncService::sync_sheet_to_db(db, sheet, &spreadsheet_id, tab, scope)
                .await?
        }
        "mathmodels" | "math_models" => {
            MathModelSyncService::sync_sheet_to_db(db, sheet, &spreadsheet_id, tab, scope).await?
        }
        "params" => {
            ParamSyncService::sync_sheet_to_db(db, sheet, &spreadsheet_id, tab, scope).await?
        }
        "metrics_config" => {
            MetricsConfigSyncService::sync_sheet_to_db(db, sheet, &spreadsheet_id, tab).await?
        }
        "kpi_contributions" => {
            KpiContributionSyncService::sync_sheet_to_db(db, sheet, &spreadsheet_id, tab, scope)
                .await?
        }
        "central_backlog" | "backlog" => {
            let sid = ctx.spreadsheet_or(&settings.backlog_spreadsheet_id);
            BacklogSyncService::sync_sheet_to_db(db, sheet, &sid, tab, scope).await?
        }
        other => anyhow::bail!("pm.save_selected does not handle tab {other}"),
    };

    Ok(json!({
        "selected_count": ctx.request.scope.raw_selection().len(),
        "saved_count": outcome.upserts,
        "unlocked_count": outcome.unlocked,
        "failed_count": outcome.failed_count(),
        "skipped_no_key": outcome.skipped,
        "failures": outcome.failures,
    }))
}

/// `pm.seed_math_params`: parse approved formulas and append missing
/// parameter rows for their free identifiers.
pub async fn seed_math_params(ctx: ActionContext) -> Result<Value> {
    let keys = ctx.selection_key_strings();
    if keys.is_empty() {
        return Ok(empty_selection());
    }

    let db = ctx.db();
    let mut seeded = 0usize;
    let mut skipped_no_key = ctx.malformed_selection_count();
    let mut warnings = Vec::new();

    for key in &keys {
        if db.initiatives().find_by_key(key).await?.is_none() {
            skipped_no_key += 1;
            continue;
        }
        for model in db.math_models().list_for_initiative(key).await? {
            let Some(formula) = model.formula_text.as_deref() else {
                continue;
            };
            if !model.approved_by_user {
                continue;
            }
            match extract_identifiers(formula) {
                Ok(identifiers) => {
                    for identifier in identifiers {
                        let inserted = db
                            .params()
                            .seed_if_missing(
                                key,
                                Framework::MathModel,
                                &identifier,
                                &model.model_name,
                                &identifier,
                                "formula",
                                "pm.seed_math_params",
                            )
                            .await?;
                        if inserted {
                            seeded += 1;
                        }
                    }
                }
                Err(err) => {
                    warnings.push(format!("{key}/{}: {err}", model.model_name));
                }
            }
        }
    }

    Ok(json!({
        "selected_count": keys.len() + ctx.malformed_selection_count(),
        "saved_count": seeded,
        "skipped_no_key": skipped_no_key,
        "warnings": warnings,
    }))
}

/// `pm.suggest_math_model_llm`: ask the LLM for formulas on rows that lack
/// one, writing only LLM-owned columns. Calls are capped and rows with an
/// existing formula or too little context are skipped.
pub async fn suggest_math_model_llm(ctx: ActionContext) -> Result<Value> {
    let keys = ctx.selection_key_strings();
    if keys.is_empty() {
        return Ok(empty_selection());
    }
    let llm = ctx
        .deps
        .llm
        .clone()
        .context("no LLM suggestion client configured")?;
    let call_cap = ctx.max_llm_calls();

    let db = ctx.db();
    let north_star = db
        .metrics()
        .active_north_star()
        .await?
        .map(|m| m.kpi_key);

    let mut suggested = 0usize;
    let mut skipped_existing = 0usize;
    let mut skipped_no_context = 0usize;
    let mut skipped_no_key = ctx.malformed_selection_count();
    let mut calls = 0usize;
    let mut warnings = Vec::new();

    'outer: for key in &keys {
        let Some(initiative) = db.initiatives().find_by_key(key).await? else {
            skipped_no_key += 1;
            continue;
        };
        if initiative.problem_statement.is_none() && initiative.desired_outcome.is_none() {
            skipped_no_context += 1;
            continue;
        }

        let models = db.math_models().list_for_initiative(key).await?;
        let existing_names: Vec<String> = models.iter().map(|m| m.model_name.clone()).collect();

        // Targets: models missing a formula, or one new model when none exist.
        let targets: Vec<Option<String>> = if models.is_empty() {
            vec![None]
        } else {
            let open: Vec<Option<String>> = models
                .iter()
                .filter(|m| m.formula_text.is_none())
                .map(|m| Some(m.model_name.clone()))
                .collect();
            skipped_existing += models.len() - open.len();
            open
        };

        for target in targets {
            if calls >= call_cap {
                warnings.push(format!("LLM call cap {call_cap} reached"));
                break 'outer;
            }
            calls += 1;

            let request = ModelSuggestionRequest {
                initiative_key: key.clone(),
                title: initiative.title.clone(),
                problem_statement: initiative.problem_statement.clone(),
                desired_outcome: initiative.desired_outcome.clone(),
                strategic_theme: initiative.strategic_theme.clone(),
                north_star_kpi: north_star.clone(),
                existing_model_names: existing_names.clone(),
            };
            let response = match llm.suggest_math_model(&request).await {
                Ok(response) => response,
                Err(err) => {
                    warnings.push(format!("{key}: LLM request failed: {err}"));
                    continue;
                }
            };

            let model_name = target.unwrap_or_else(|| response.model_name.clone());
            let fields = MathModelFields {
                target_kpi_key: response.target_kpi_key.clone(),
                metric_chain_text: response.metric_chain_text.clone(),
                metric_chain_json: None,
                formula_text: Some(response.formula_text.clone()),
                assumptions_text: response.assumptions_text.clone(),
                is_primary: None,
                approved_by_user: None,
                suggested_by_llm: Some(true),
            };
            db.math_models()
                .upsert(key, &model_name, &fields, "pm.suggest_math_model_llm")
                .await?;
            suggested += 1;
        }
    }

    Ok(json!({
        "selected_count": keys.len() + ctx.malformed_selection_count(),
        "saved_count": suggested,
        "skipped_no_key": skipped_no_key,
        "skipped_existing_formula": skipped_existing,
        "skipped_no_context": skipped_no_context,
        "llm_calls": calls,
        "warnings": warnings,
    }))
}

/// Upsert the per-framework and active score columns for a selection.
async fn write_score_columns(
    ctx: &ActionContext,
    spreadsheet_id: &str,
    tab: &str,
    keys: &[String],
) -> Result<usize> {
    let initiatives = ctx.db().initiatives().list_by_keys(keys).await?;
    let records: Vec<WriteRecord> = initiatives
        .iter()
        .map(|i| {
            WriteRecord::new(&i.initiative_key)
                .set("rice_value_score", opt_number_cell(i.rice_value_score))
                .set("rice_effort_score", opt_number_cell(i.rice_effort_score))
                .set("rice_overall_score", opt_number_cell(i.rice_overall_score))
                .set("wsjf_value_score", opt_number_cell(i.wsjf_value_score))
                .set("wsjf_effort_score", opt_number_cell(i.wsjf_effort_score))
                .set("wsjf_overall_score", opt_number_cell(i.wsjf_overall_score))
                .set("math_value_score", opt_number_cell(i.math_value_score))
                .set("math_effort_score", opt_number_cell(i.math_effort_score))
                .set("math_overall_score", opt_number_cell(i.math_overall_score))
                .set("value_score", opt_number_cell(i.value_score))
                .set("effort_score", opt_number_cell(i.effort_score))
                .set("overall_score", opt_number_cell(i.overall_score))
        })
        .collect();

    let config = UpsertConfig {
        tab: tab.to_string(),
        shape: TabShape::standard(),
        key_column: "initiative_key".to_string(),
        owned_columns: SCORE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        provenance: FLOW3_PRODUCTOPS_WRITE_SCORES.to_string(),
    };
    upsert_rows(ctx.sheet(), spreadsheet_id, &config, &records).await?;
    Ok(records.len())
}

/// Upsert the KPI contribution columns for a selection.
async fn write_kpi_columns(
    ctx: &ActionContext,
    spreadsheet_id: &str,
    keys: &[String],
) -> Result<usize> {
    let initiatives = ctx.db().initiatives().list_by_keys(keys).await?;
    let records: Vec<WriteRecord> = initiatives
        .iter()
        .map(|i| {
            let source = i.kpi_contribution_source.map(|s| match s {
                roadmap_db::ContributionSource::Computed => "computed",
                roadmap_db::ContributionSource::PmOverride => "pm_override",
            });
            WriteRecord::new(&i.initiative_key)
                .set(
                    "kpi_contribution_json",
                    opt_text_cell(i.kpi_contribution_json.as_deref()),
                )
                .set(
                    "kpi_contribution_computed_json",
                    opt_text_cell(i.kpi_contribution_computed_json.as_deref()),
                )
                .set("kpi_contribution_source", opt_text_cell(source))
        })
        .collect();

    let config = UpsertConfig {
        tab: TAB_KPI_CONTRIBUTIONS.to_string(),
        shape: TabShape::standard(),
        key_column: "initiative_key".to_string(),
        owned_columns: KPI_COLUMNS.iter().map(|c| c.to_string()).collect(),
        provenance: FLOW3_PRODUCTOPS_WRITE_KPI_CONTRIBUTIONS.to_string(),
    };
    upsert_rows(ctx.sheet(), spreadsheet_id, &config, &records).await?;
    Ok(records.len())
}
