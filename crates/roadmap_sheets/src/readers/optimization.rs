//! Optimization Center readers: Candidates, Constraints, Targets,
//! Scenario_Config. These tabs keep human metadata in rows 2-3; data starts
//! at row 4.

use crate::cells::{parse_date, parse_f64, parse_i64, CellValue};
use crate::client::{SheetClient, SheetError};
use crate::header::Alias;
use crate::reader::{read_tab, RawRow, TabShape};
use chrono::NaiveDate;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

const CANDIDATE_ALIASES: &[Alias] = &[
    Alias { canonical: "initiative_key", variants: &["key", "init_key"] },
    Alias { canonical: "title", variants: &[] },
    Alias { canonical: "engineering_tokens", variants: &["tokens", "token_cost"] },
    Alias { canonical: "country", variants: &[] },
    Alias { canonical: "department", variants: &[] },
    Alias { canonical: "category", variants: &[] },
    Alias { canonical: "program", variants: &[] },
    Alias { canonical: "product", variants: &[] },
    Alias { canonical: "segment", variants: &[] },
    Alias { canonical: "active_overall_score", variants: &["overall_score", "score"] },
    Alias { canonical: "run_status", variants: &["sync_status"] },
];

/// Candidates-tab projection of an initiative; the DB stays authoritative,
/// this row only surfaces mismatches.
#[derive(Debug, Clone, Default)]
pub struct CandidateRow {
    pub row_number: usize,
    pub initiative_key: Option<String>,
    pub engineering_tokens: Option<i64>,
    pub active_overall_score: Option<f64>,
    pub extras: HashMap<String, CellValue>,
}

impl CandidateRow {
    fn from_raw(raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            initiative_key: raw.get("initiative_key").as_trimmed_text(),
            engineering_tokens: parse_i64(raw.get("engineering_tokens")),
            active_overall_score: parse_f64(raw.get("active_overall_score")),
            extras: raw.extras,
        }
    }
}

pub async fn read_candidates(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<CandidateRow>, SheetError> {
    let shape = TabShape::optimization_center();
    let rows = read_tab(client, spreadsheet_id, tab, &shape, CANDIDATE_ALIASES).await?;
    Ok(rows.into_iter().map(CandidateRow::from_raw).collect())
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

const CONSTRAINT_ALIASES: &[Alias] = &[
    Alias { canonical: "scenario_name", variants: &["scenario"] },
    Alias { canonical: "constraint_set_name", variants: &["set_name", "constraint_set"] },
    Alias { canonical: "constraint_type", variants: &["type", "kind"] },
    Alias { canonical: "dimension", variants: &[] },
    Alias { canonical: "dimension_key", variants: &["dimension_value", "slice"] },
    Alias { canonical: "initiative_keys", variants: &["keys", "members", "initiative_key"] },
    Alias { canonical: "value", variants: &["tokens", "amount"] },
    Alias { canonical: "bonus", variants: &["synergy_bonus"] },
    Alias { canonical: "notes", variants: &[] },
    Alias { canonical: "run_status", variants: &["sync_status"] },
];

/// One raw constraint row; the compiler groups and validates these.
#[derive(Debug, Clone, Default)]
pub struct ConstraintRow {
    pub row_number: usize,
    pub scenario_name: Option<String>,
    pub constraint_set_name: Option<String>,
    pub constraint_type: Option<String>,
    pub dimension: Option<String>,
    pub dimension_key: Option<String>,
    /// Comma- or semicolon-separated member keys.
    pub initiative_keys: Vec<String>,
    pub value: Option<f64>,
    pub bonus: Option<f64>,
    pub notes: Option<String>,
    pub extras: HashMap<String, CellValue>,
}

fn split_keys(cell: &CellValue) -> Vec<String> {
    cell.as_trimmed_text()
        .map(|text| {
            text.split(|c| c == ',' || c == ';')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl ConstraintRow {
    fn from_raw(raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            scenario_name: raw.get("scenario_name").as_trimmed_text(),
            constraint_set_name: raw.get("constraint_set_name").as_trimmed_text(),
            constraint_type: raw.get("constraint_type").as_trimmed_text(),
            dimension: raw.get("dimension").as_trimmed_text(),
            dimension_key: raw.get("dimension_key").as_trimmed_text(),
            initiative_keys: split_keys(raw.get("initiative_keys")),
            value: parse_f64(raw.get("value")),
            bonus: parse_f64(raw.get("bonus")),
            notes: raw.get("notes").as_trimmed_text(),
            extras: raw.extras,
        }
    }
}

pub async fn read_constraints(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<ConstraintRow>, SheetError> {
    let shape = TabShape::optimization_center();
    let rows = read_tab(client, spreadsheet_id, tab, &shape, CONSTRAINT_ALIASES).await?;
    Ok(rows.into_iter().map(ConstraintRow::from_raw).collect())
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

const TARGET_ALIASES: &[Alias] = &[
    Alias { canonical: "scenario_name", variants: &["scenario"] },
    Alias { canonical: "constraint_set_name", variants: &["set_name", "constraint_set"] },
    Alias { canonical: "dimension", variants: &[] },
    Alias { canonical: "dimension_key", variants: &["dimension_value", "slice"] },
    Alias { canonical: "kpi_key", variants: &["kpi", "metric_key"] },
    Alias { canonical: "target_type", variants: &["type"] },
    Alias { canonical: "value", variants: &["target", "target_value"] },
    Alias { canonical: "notes", variants: &[] },
    Alias { canonical: "run_status", variants: &["sync_status"] },
];

#[derive(Debug, Clone, Default)]
pub struct TargetRow {
    pub row_number: usize,
    pub scenario_name: Option<String>,
    pub constraint_set_name: Option<String>,
    pub dimension: Option<String>,
    pub dimension_key: Option<String>,
    pub kpi_key: Option<String>,
    pub target_type: Option<String>,
    pub value: Option<f64>,
    pub notes: Option<String>,
    pub extras: HashMap<String, CellValue>,
}

impl TargetRow {
    fn from_raw(raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            scenario_name: raw.get("scenario_name").as_trimmed_text(),
            constraint_set_name: raw.get("constraint_set_name").as_trimmed_text(),
            dimension: raw.get("dimension").as_trimmed_text(),
            dimension_key: raw.get("dimension_key").as_trimmed_text(),
            kpi_key: raw.get("kpi_key").as_trimmed_text(),
            target_type: raw.get("target_type").as_trimmed_text(),
            value: parse_f64(raw.get("value")),
            notes: raw.get("notes").as_trimmed_text(),
            extras: raw.extras,
        }
    }
}

pub async fn read_targets(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<TargetRow>, SheetError> {
    let shape = TabShape::optimization_center();
    let rows = read_tab(client, spreadsheet_id, tab, &shape, TARGET_ALIASES).await?;
    Ok(rows.into_iter().map(TargetRow::from_raw).collect())
}

// ---------------------------------------------------------------------------
// Scenario_Config
// ---------------------------------------------------------------------------

const SCENARIO_ALIASES: &[Alias] = &[
    Alias { canonical: "scenario_name", variants: &["scenario", "name"] },
    Alias { canonical: "period_key", variants: &["period"] },
    Alias { canonical: "period_end", variants: &["period_end_date", "end_date"] },
    Alias { canonical: "capacity_total_tokens", variants: &["capacity", "total_tokens"] },
    Alias { canonical: "objective_mode", variants: &["objective"] },
    Alias { canonical: "objective_weights_json", variants: &["objective_weights", "weights"] },
    Alias { canonical: "notes", variants: &[] },
    Alias { canonical: "run_status", variants: &["sync_status"] },
];

#[derive(Debug, Clone, Default)]
pub struct ScenarioConfigRow {
    pub row_number: usize,
    pub scenario_name: Option<String>,
    pub period_key: Option<String>,
    pub period_end: Option<NaiveDate>,
    pub capacity_total_tokens: Option<i64>,
    pub objective_mode: Option<String>,
    pub objective_weights_json: Option<String>,
    pub notes: Option<String>,
    pub extras: HashMap<String, CellValue>,
}

impl ScenarioConfigRow {
    fn from_raw(raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            scenario_name: raw.get("scenario_name").as_trimmed_text(),
            period_key: raw.get("period_key").as_trimmed_text(),
            period_end: parse_date(raw.get("period_end")),
            capacity_total_tokens: parse_i64(raw.get("capacity_total_tokens")),
            objective_mode: raw.get("objective_mode").as_trimmed_text(),
            objective_weights_json: raw.get("objective_weights_json").as_trimmed_text(),
            notes: raw.get("notes").as_trimmed_text(),
            extras: raw.extras,
        }
    }
}

pub async fn read_scenario_config(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<ScenarioConfigRow>, SheetError> {
    let shape = TabShape::optimization_center();
    let rows = read_tab(client, spreadsheet_id, tab, &shape, SCENARIO_ALIASES).await?;
    Ok(rows.into_iter().map(ScenarioConfigRow::from_raw).collect())
}
