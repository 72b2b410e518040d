//! Database row models.
//!
//! Derive macros map rows to structs; status-like columns are TEXT-backed
//! `sqlx::Type` enums so spelling lives in exactly one place.

use chrono::{DateTime, NaiveDate, Utc};
use roadmap_protocol::RunStatus;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

// ============================================================================
// Enums
// ============================================================================

/// Initiative lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InitiativeStatus {
    New,
    NeedsInfo,
    UnderReview,
    ApprovedInPrinciple,
    Scheduled,
    Rejected,
    Withdrawn,
}

impl InitiativeStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "needs_info" => Some(Self::NeedsInfo),
            "under_review" => Some(Self::UnderReview),
            "approved_in_principle" => Some(Self::ApprovedInPrinciple),
            "scheduled" => Some(Self::Scheduled),
            "rejected" => Some(Self::Rejected),
            "withdrawn" => Some(Self::Withdrawn),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::NeedsInfo => "needs_info",
            Self::UnderReview => "under_review",
            Self::ApprovedInPrinciple => "approved_in_principle",
            Self::Scheduled => "scheduled",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// The subset the intake pipeline is allowed to write.
    pub fn intake_writable(self) -> bool {
        matches!(self, Self::New | Self::Withdrawn)
    }
}

/// Scoring framework identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Framework {
    Rice,
    Wsjf,
    MathModel,
}

impl Framework {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RICE" => Some(Self::Rice),
            "WSJF" => Some(Self::Wsjf),
            "MATH_MODEL" | "MATH" => Some(Self::MathModel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rice => "RICE",
            Self::Wsjf => "WSJF",
            Self::MathModel => "MATH_MODEL",
        }
    }

    /// Column prefix of the per-framework score triple.
    pub fn column_prefix(self) -> &'static str {
        match self {
            Self::Rice => "rice",
            Self::Wsjf => "wsjf",
            Self::MathModel => "math",
        }
    }
}

/// Who owns the active KPI contribution map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContributionSource {
    Computed,
    PmOverride,
}

/// KPI registry level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum KpiLevel {
    NorthStar,
    Strategic,
    Operational,
}

impl KpiLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "north_star" => Some(Self::NorthStar),
            "strategic" => Some(Self::Strategic),
            "operational" => Some(Self::Operational),
            _ => None,
        }
    }

    /// Levels eligible for KPI contributions and objectives.
    pub fn contributes(self) -> bool {
        matches!(self, Self::NorthStar | Self::Strategic)
    }
}

/// Scenario objective mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveMode {
    NorthStar,
    WeightedKpis,
    Lexicographic,
}

impl ObjectiveMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "north_star" => Some(Self::NorthStar),
            "weighted_kpis" => Some(Self::WeightedKpis),
            "lexicographic" => Some(Self::Lexicographic),
            _ => None,
        }
    }
}

/// Ledger / optimization run state, stored as TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn to_status(self) -> RunStatus {
        match self {
            Self::Queued => RunStatus::Queued,
            Self::Running => RunStatus::Running,
            Self::Succeeded => RunStatus::Succeeded,
            Self::Failed => RunStatus::Failed,
        }
    }
}

// ============================================================================
// Core models
// ============================================================================

/// Canonical unit of proposed work. Column ownership: intake-owned columns
/// are mutated only by the intake pipeline, central-editable only by the
/// backlog pipeline, per-framework scores only by the matching compute path,
/// active scores only by activation, KPI fields by the adapter or a PM
/// override.
#[derive(Debug, Clone, FromRow)]
pub struct Initiative {
    pub id: i64,
    pub initiative_key: String,
    pub source_sheet_id: Option<String>,
    pub source_tab_name: Option<String>,
    pub source_row_number: Option<i64>,
    pub title: String,
    pub requesting_team: Option<String>,
    pub requester_name: Option<String>,
    pub requester_email: Option<String>,
    pub country: Option<String>,
    pub product_area: Option<String>,
    pub problem_statement: Option<String>,
    pub desired_outcome: Option<String>,
    pub hypothesis: Option<String>,
    pub customer_segment: Option<String>,
    pub initiative_type: Option<String>,
    pub strategic_theme: Option<String>,
    pub deadline_date: Option<NaiveDate>,
    pub impact_low: Option<f64>,
    pub impact_expected: Option<f64>,
    pub impact_high: Option<f64>,
    pub effort_tshirt: Option<String>,
    pub effort_engineering_days: Option<f64>,
    pub risk_level: Option<String>,
    pub is_mandatory: bool,
    pub dependencies_text: Option<String>,
    pub status: InitiativeStatus,
    pub active_scoring_framework: Option<Framework>,
    pub use_math_model: bool,
    pub strategic_priority_coefficient: Option<f64>,
    pub linked_objectives: Option<String>,
    pub llm_notes: Option<String>,
    pub dependencies_keys_json: Option<String>,
    pub rice_reach: Option<f64>,
    pub rice_impact: Option<f64>,
    pub rice_confidence: Option<f64>,
    pub rice_effort: Option<f64>,
    pub wsjf_business_value: Option<f64>,
    pub wsjf_time_criticality: Option<f64>,
    pub wsjf_risk_reduction: Option<f64>,
    pub wsjf_job_size: Option<f64>,
    pub rice_value_score: Option<f64>,
    pub rice_effort_score: Option<f64>,
    pub rice_overall_score: Option<f64>,
    pub wsjf_value_score: Option<f64>,
    pub wsjf_effort_score: Option<f64>,
    pub wsjf_overall_score: Option<f64>,
    pub math_value_score: Option<f64>,
    pub math_effort_score: Option<f64>,
    pub math_overall_score: Option<f64>,
    pub value_score: Option<f64>,
    pub effort_score: Option<f64>,
    pub overall_score: Option<f64>,
    pub kpi_contribution_json: Option<String>,
    pub kpi_contribution_computed_json: Option<String>,
    pub kpi_contribution_source: Option<ContributionSource>,
    pub metric_chain_json: Option<String>,
    pub is_optimization_candidate: bool,
    pub candidate_period_key: Option<String>,
    pub engineering_tokens: Option<i64>,
    pub department: Option<String>,
    pub category: Option<String>,
    pub program: Option<String>,
    pub product: Option<String>,
    pub segment: Option<String>,
    pub updated_source: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub scoring_updated_source: Option<String>,
    pub scoring_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Initiative {
    /// Per-framework score triple for a framework, if computed.
    pub fn framework_scores(&self, framework: Framework) -> ScoreTriple {
        match framework {
            Framework::Rice => ScoreTriple {
                value_score: self.rice_value_score,
                effort_score: self.rice_effort_score,
                overall_score: self.rice_overall_score,
            },
            Framework::Wsjf => ScoreTriple {
                value_score: self.wsjf_value_score,
                effort_score: self.wsjf_effort_score,
                overall_score: self.wsjf_overall_score,
            },
            Framework::MathModel => ScoreTriple {
                value_score: self.math_value_score,
                effort_score: self.math_effort_score,
                overall_score: self.math_overall_score,
            },
        }
    }

    /// Active KPI contribution map, empty when unset or malformed.
    pub fn kpi_contributions(&self) -> HashMap<String, f64> {
        parse_kpi_map(self.kpi_contribution_json.as_deref())
    }

    /// Dimension value for a named optimization slice dimension.
    pub fn dimension_value(&self, dimension: &str) -> Option<&str> {
        let value = match dimension {
            "country" => self.country.as_deref(),
            "department" => self.department.as_deref(),
            "category" => self.category.as_deref(),
            "program" => self.program.as_deref(),
            "product" => self.product.as_deref(),
            "segment" => self.segment.as_deref(),
            _ => None,
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Parse a `kpi -> float` JSON map, tolerating null/garbage as empty.
pub fn parse_kpi_map(raw: Option<&str>) -> HashMap<String, f64> {
    raw.and_then(|text| serde_json::from_str::<HashMap<String, f64>>(text).ok())
        .unwrap_or_default()
}

/// One of N math models owned by an initiative.
#[derive(Debug, Clone, FromRow)]
pub struct InitiativeMathModel {
    pub id: i64,
    pub initiative_key: String,
    pub model_name: String,
    pub target_kpi_key: Option<String>,
    pub metric_chain_text: Option<String>,
    pub metric_chain_json: Option<String>,
    pub formula_text: Option<String>,
    pub assumptions_text: Option<String>,
    pub is_primary: bool,
    pub approved_by_user: bool,
    pub suggested_by_llm: bool,
    pub computed_score: Option<f64>,
    pub last_computed_at: Option<DateTime<Utc>>,
    pub updated_source: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Normalized scoring parameter row. `model_name` is the empty string for
/// framework-level params so the uniqueness constraint covers both shapes.
#[derive(Debug, Clone, FromRow)]
pub struct InitiativeParam {
    pub id: i64,
    pub initiative_key: String,
    pub framework: Framework,
    pub param_name: String,
    pub model_name: String,
    pub value: Option<f64>,
    pub param_display: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub source: Option<String>,
    pub approved: bool,
    pub is_auto_seeded: bool,
    pub notes: Option<String>,
    pub updated_source: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Append-only score history row.
#[derive(Debug, Clone, FromRow)]
pub struct InitiativeScore {
    pub id: i64,
    pub initiative_id: i64,
    pub framework_name: Framework,
    pub value_score: Option<f64>,
    pub effort_score: Option<f64>,
    pub overall_score: Option<f64>,
    pub inputs_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// KPI registry row.
#[derive(Debug, Clone, FromRow)]
pub struct OrgMetricConfig {
    pub id: i64,
    pub kpi_key: String,
    pub kpi_name: String,
    pub kpi_level: KpiLevel,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub updated_source: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Named optimization scenario.
#[derive(Debug, Clone, FromRow)]
pub struct OptimizationScenario {
    pub id: i64,
    pub name: String,
    pub period_key: Option<String>,
    pub capacity_total_tokens: i64,
    pub objective_mode: ObjectiveMode,
    pub objective_weights_json: Option<String>,
    pub notes: Option<String>,
    pub updated_source: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OptimizationScenario {
    pub fn objective_weights(&self) -> HashMap<String, f64> {
        parse_kpi_map(self.objective_weights_json.as_deref())
    }
}

/// Persisted compiled constraint set (JSON snapshot of the compiler output).
#[derive(Debug, Clone, FromRow)]
pub struct ConstraintSetRow {
    pub id: i64,
    pub scenario_name: String,
    pub set_name: String,
    pub compiled_json: String,
    pub messages_json: Option<String>,
    pub updated_source: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One optimization execution.
#[derive(Debug, Clone, FromRow)]
pub struct OptimizationRun {
    pub id: i64,
    pub run_id: String,
    pub scenario_id: Option<i64>,
    pub constraint_set_id: Option<i64>,
    pub status: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub inputs_snapshot_json: Option<String>,
    pub result_json: Option<String>,
    pub solver_name: Option<String>,
    pub solver_version: Option<String>,
}

/// Selected initiatives for a run.
#[derive(Debug, Clone, FromRow)]
pub struct Portfolio {
    pub id: i64,
    pub optimization_run_id: i64,
    pub scenario_name: String,
    pub total_objective: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PortfolioItem {
    pub id: i64,
    pub portfolio_id: i64,
    pub initiative_key: String,
    pub selected: bool,
    pub allocated_tokens: i64,
}

/// Durable execution ledger entry.
#[derive(Debug, Clone, FromRow)]
pub struct ActionRun {
    pub id: i64,
    pub run_id: String,
    pub action: String,
    pub status: RunState,
    pub payload_json: String,
    pub result_json: Option<String>,
    pub error_text: Option<String>,
    pub requested_by_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Ownership-scoped field groups
// ============================================================================

/// A `{value, effort, overall}` score triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreTriple {
    pub value_score: Option<f64>,
    pub effort_score: Option<f64>,
    pub overall_score: Option<f64>,
}

impl ScoreTriple {
    pub fn is_empty(&self) -> bool {
        self.value_score.is_none() && self.effort_score.is_none() && self.overall_score.is_none()
    }
}

/// Columns the intake pipeline may write.
#[derive(Debug, Clone, Default)]
pub struct IntakeFields {
    pub title: String,
    pub requesting_team: Option<String>,
    pub requester_name: Option<String>,
    pub requester_email: Option<String>,
    pub country: Option<String>,
    pub product_area: Option<String>,
    pub problem_statement: Option<String>,
    pub desired_outcome: Option<String>,
    pub hypothesis: Option<String>,
    pub customer_segment: Option<String>,
    pub initiative_type: Option<String>,
    pub strategic_theme: Option<String>,
    pub deadline_date: Option<NaiveDate>,
    pub impact_low: Option<f64>,
    pub impact_expected: Option<f64>,
    pub impact_high: Option<f64>,
    pub effort_tshirt: Option<String>,
    pub effort_engineering_days: Option<f64>,
    pub risk_level: Option<String>,
    pub is_mandatory: bool,
    pub dependencies_text: Option<String>,
    /// Only honored when in the intake-writable subset {new, withdrawn}.
    pub status: Option<InitiativeStatus>,
}

/// Columns the central backlog pipeline may write.
#[derive(Debug, Clone, Default)]
pub struct CentralFields {
    pub status: Option<InitiativeStatus>,
    pub active_scoring_framework: Option<Framework>,
    pub use_math_model: Option<bool>,
    pub strategic_priority_coefficient: Option<f64>,
    pub impact_expected: Option<f64>,
    pub effort_engineering_days: Option<f64>,
    pub linked_objectives: Option<String>,
    pub llm_notes: Option<String>,
    pub dependencies_keys_json: Option<String>,
    pub is_optimization_candidate: Option<bool>,
    pub candidate_period_key: Option<String>,
    pub engineering_tokens: Option<i64>,
    pub department: Option<String>,
    pub category: Option<String>,
    pub program: Option<String>,
    pub product: Option<String>,
    pub segment: Option<String>,
}

/// Scoring_Inputs strong-sync group: every field is written as-is, so a
/// blank sheet cell clears the stored value.
#[derive(Debug, Clone, Default)]
pub struct ScoringInputFields {
    pub rice_reach: Option<f64>,
    pub rice_impact: Option<f64>,
    pub rice_confidence: Option<f64>,
    pub rice_effort: Option<f64>,
    pub wsjf_business_value: Option<f64>,
    pub wsjf_time_criticality: Option<f64>,
    pub wsjf_risk_reduction: Option<f64>,
    pub wsjf_job_size: Option<f64>,
    pub active_scoring_framework: Option<Framework>,
    pub use_math_model: Option<bool>,
    pub strategic_priority_coefficient: Option<f64>,
}
