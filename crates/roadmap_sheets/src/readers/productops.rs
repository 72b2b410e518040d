//! ProductOps workbook readers: Scoring_Inputs, MathModels, Params,
//! Metrics_Config, KPI_Contributions.

use crate::cells::{parse_bool, parse_f64, CellValue};
use crate::client::{SheetClient, SheetError};
use crate::header::Alias;
use crate::reader::{read_tab, RawRow, TabShape};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Scoring_Inputs
// ---------------------------------------------------------------------------

const SCORING_INPUT_ALIASES: &[Alias] = &[
    Alias { canonical: "initiative_key", variants: &["key", "init_key"] },
    Alias { canonical: "rice_reach", variants: &["reach"] },
    Alias { canonical: "rice_impact", variants: &["impact"] },
    Alias { canonical: "rice_confidence", variants: &["confidence"] },
    Alias { canonical: "rice_effort", variants: &["effort"] },
    Alias { canonical: "wsjf_business_value", variants: &["business_value"] },
    Alias { canonical: "wsjf_time_criticality", variants: &["time_criticality"] },
    Alias { canonical: "wsjf_risk_reduction", variants: &["risk_reduction", "risk_reduction_opportunity"] },
    Alias { canonical: "wsjf_job_size", variants: &["job_size"] },
    Alias { canonical: "active_scoring_framework", variants: &["framework", "scoring_framework"] },
    Alias { canonical: "use_math_model", variants: &["math_model"] },
    Alias { canonical: "strategic_priority_coefficient", variants: &["priority_coefficient"] },
    Alias { canonical: "run_status", variants: &["sync_status"] },
];

/// Raw scoring inputs for one initiative; blank cells stay `None` so the
/// strong sync can clear stale DB values.
#[derive(Debug, Clone, Default)]
pub struct ScoringInputsRow {
    pub row_number: usize,
    pub initiative_key: Option<String>,
    pub rice_reach: Option<f64>,
    pub rice_impact: Option<f64>,
    pub rice_confidence: Option<f64>,
    pub rice_effort: Option<f64>,
    pub wsjf_business_value: Option<f64>,
    pub wsjf_time_criticality: Option<f64>,
    pub wsjf_risk_reduction: Option<f64>,
    pub wsjf_job_size: Option<f64>,
    pub active_scoring_framework: Option<String>,
    pub use_math_model: Option<bool>,
    pub strategic_priority_coefficient: Option<f64>,
    pub extras: HashMap<String, CellValue>,
}

impl ScoringInputsRow {
    fn from_raw(raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            initiative_key: raw.get("initiative_key").as_trimmed_text(),
            rice_reach: parse_f64(raw.get("rice_reach")),
            rice_impact: parse_f64(raw.get("rice_impact")),
            rice_confidence: parse_f64(raw.get("rice_confidence")),
            rice_effort: parse_f64(raw.get("rice_effort")),
            wsjf_business_value: parse_f64(raw.get("wsjf_business_value")),
            wsjf_time_criticality: parse_f64(raw.get("wsjf_time_criticality")),
            wsjf_risk_reduction: parse_f64(raw.get("wsjf_risk_reduction")),
            wsjf_job_size: parse_f64(raw.get("wsjf_job_size")),
            active_scoring_framework: raw.get("active_scoring_framework").as_trimmed_text(),
            use_math_model: parse_bool(raw.get("use_math_model")),
            strategic_priority_coefficient: parse_f64(raw.get("strategic_priority_coefficient")),
            extras: raw.extras,
        }
    }
}

pub async fn read_scoring_inputs(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<ScoringInputsRow>, SheetError> {
    let shape = TabShape::standard();
    let rows = read_tab(client, spreadsheet_id, tab, &shape, SCORING_INPUT_ALIASES).await?;
    Ok(rows.into_iter().map(ScoringInputsRow::from_raw).collect())
}

// ---------------------------------------------------------------------------
// MathModels
// ---------------------------------------------------------------------------

const MATH_MODEL_ALIASES: &[Alias] = &[
    Alias { canonical: "initiative_key", variants: &["key", "init_key"] },
    Alias { canonical: "model_name", variants: &["model", "name"] },
    Alias { canonical: "target_kpi_key", variants: &["target_kpi", "kpi", "kpi_key"] },
    Alias { canonical: "metric_chain_text", variants: &["metric_chain", "chain"] },
    Alias { canonical: "formula_text", variants: &["formula", "script"] },
    Alias { canonical: "assumptions_text", variants: &["assumptions", "notes"] },
    Alias { canonical: "is_primary", variants: &["primary"] },
    Alias { canonical: "approved_by_user", variants: &["approved", "user_approved"] },
    Alias { canonical: "run_status", variants: &["sync_status"] },
];

#[derive(Debug, Clone, Default)]
pub struct MathModelRow {
    pub row_number: usize,
    pub initiative_key: Option<String>,
    pub model_name: Option<String>,
    pub target_kpi_key: Option<String>,
    pub metric_chain_text: Option<String>,
    pub formula_text: Option<String>,
    pub assumptions_text: Option<String>,
    pub is_primary: Option<bool>,
    pub approved_by_user: Option<bool>,
    pub extras: HashMap<String, CellValue>,
}

impl MathModelRow {
    fn from_raw(raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            initiative_key: raw.get("initiative_key").as_trimmed_text(),
            model_name: raw.get("model_name").as_trimmed_text(),
            target_kpi_key: raw.get("target_kpi_key").as_trimmed_text(),
            metric_chain_text: raw.get("metric_chain_text").as_trimmed_text(),
            formula_text: raw.get("formula_text").as_trimmed_text(),
            assumptions_text: raw.get("assumptions_text").as_trimmed_text(),
            is_primary: parse_bool(raw.get("is_primary")),
            approved_by_user: parse_bool(raw.get("approved_by_user")),
            extras: raw.extras,
        }
    }
}

pub async fn read_math_models(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<MathModelRow>, SheetError> {
    let shape = TabShape::standard();
    let rows = read_tab(client, spreadsheet_id, tab, &shape, MATH_MODEL_ALIASES).await?;
    Ok(rows.into_iter().map(MathModelRow::from_raw).collect())
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

const PARAM_ALIASES: &[Alias] = &[
    Alias { canonical: "initiative_key", variants: &["key", "init_key"] },
    Alias { canonical: "framework", variants: &[] },
    Alias { canonical: "param_name", variants: &["param", "parameter"] },
    Alias { canonical: "model_name", variants: &["model"] },
    Alias { canonical: "value", variants: &["param_value"] },
    Alias { canonical: "param_display", variants: &["display", "display_name"] },
    Alias { canonical: "description", variants: &[] },
    Alias { canonical: "unit", variants: &["units"] },
    Alias { canonical: "min", variants: &["min_value", "minimum"] },
    Alias { canonical: "max", variants: &["max_value", "maximum"] },
    Alias { canonical: "source", variants: &[] },
    Alias { canonical: "approved", variants: &["user_approved"] },
    Alias { canonical: "notes", variants: &[] },
    Alias { canonical: "run_status", variants: &["sync_status"] },
];

#[derive(Debug, Clone, Default)]
pub struct ParamRow {
    pub row_number: usize,
    pub initiative_key: Option<String>,
    pub framework: Option<String>,
    pub param_name: Option<String>,
    pub model_name: Option<String>,
    pub value: Option<f64>,
    pub param_display: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub source: Option<String>,
    pub approved: Option<bool>,
    pub notes: Option<String>,
    pub extras: HashMap<String, CellValue>,
}

impl ParamRow {
    fn from_raw(raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            initiative_key: raw.get("initiative_key").as_trimmed_text(),
            framework: raw.get("framework").as_trimmed_text(),
            param_name: raw.get("param_name").as_trimmed_text(),
            model_name: raw.get("model_name").as_trimmed_text(),
            value: parse_f64(raw.get("value")),
            param_display: raw.get("param_display").as_trimmed_text(),
            description: raw.get("description").as_trimmed_text(),
            unit: raw.get("unit").as_trimmed_text(),
            min: parse_f64(raw.get("min")),
            max: parse_f64(raw.get("max")),
            source: raw.get("source").as_trimmed_text(),
            approved: parse_bool(raw.get("approved")),
            notes: raw.get("notes").as_trimmed_text(),
            extras: raw.extras,
        }
    }
}

pub async fn read_params(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<ParamRow>, SheetError> {
    let shape = TabShape::standard();
    let rows = read_tab(client, spreadsheet_id, tab, &shape, PARAM_ALIASES).await?;
    Ok(rows.into_iter().map(ParamRow::from_raw).collect())
}

// ---------------------------------------------------------------------------
// Metrics_Config
// ---------------------------------------------------------------------------

const METRICS_CONFIG_ALIASES: &[Alias] = &[
    Alias { canonical: "kpi_key", variants: &["key", "metric_key"] },
    Alias { canonical: "kpi_name", variants: &["name", "metric_name"] },
    Alias { canonical: "kpi_level", variants: &["level"] },
    Alias { canonical: "unit", variants: &["units"] },
    Alias { canonical: "description", variants: &[] },
    Alias { canonical: "is_active", variants: &["active"] },
    Alias { canonical: "run_status", variants: &["sync_status"] },
];

#[derive(Debug, Clone, Default)]
pub struct MetricsConfigRow {
    pub row_number: usize,
    pub kpi_key: Option<String>,
    pub kpi_name: Option<String>,
    pub kpi_level: Option<String>,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub extras: HashMap<String, CellValue>,
}

impl MetricsConfigRow {
    fn from_raw(raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            kpi_key: raw.get("kpi_key").as_trimmed_text(),
            kpi_name: raw.get("kpi_name").as_trimmed_text(),
            kpi_level: raw.get("kpi_level").as_trimmed_text(),
            unit: raw.get("unit").as_trimmed_text(),
            description: raw.get("description").as_trimmed_text(),
            is_active: parse_bool(raw.get("is_active")),
            extras: raw.extras,
        }
    }
}

pub async fn read_metrics_config(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<MetricsConfigRow>, SheetError> {
    let shape = TabShape::standard();
    let rows = read_tab(client, spreadsheet_id, tab, &shape, METRICS_CONFIG_ALIASES).await?;
    Ok(rows.into_iter().map(MetricsConfigRow::from_raw).collect())
}

// ---------------------------------------------------------------------------
// KPI_Contributions
// ---------------------------------------------------------------------------

const KPI_CONTRIBUTION_ALIASES: &[Alias] = &[
    Alias { canonical: "initiative_key", variants: &["key", "init_key"] },
    Alias { canonical: "kpi_contribution_json", variants: &["contributions", "kpi_contributions", "contribution_json"] },
    Alias { canonical: "run_status", variants: &["sync_status"] },
];

/// The JSON cell is kept raw: presence, blankness, and validity each drive a
/// different override outcome.
#[derive(Debug, Clone, Default)]
pub struct KpiContributionRow {
    pub row_number: usize,
    pub initiative_key: Option<String>,
    pub kpi_contribution_cell: CellValue,
    pub extras: HashMap<String, CellValue>,
}

impl KpiContributionRow {
    fn from_raw(raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            initiative_key: raw.get("initiative_key").as_trimmed_text(),
            kpi_contribution_cell: raw.get("kpi_contribution_json").clone(),
            extras: raw.extras,
        }
    }
}

pub async fn read_kpi_contributions(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<KpiContributionRow>, SheetError> {
    let shape = TabShape::standard();
    let rows = read_tab(client, spreadsheet_id, tab, &shape, KPI_CONTRIBUTION_ALIASES).await?;
    Ok(rows.into_iter().map(KpiContributionRow::from_raw).collect())
}
