//! Central backlog reader (sheet → DB direction).

use crate::cells::{parse_bool, parse_f64, parse_i64, CellValue};
use crate::client::{SheetClient, SheetError};
use crate::header::Alias;
use crate::reader::{read_tab, RawRow, TabShape};
use std::collections::HashMap;

const ALIASES: &[Alias] = &[
    Alias { canonical: "initiative_key", variants: &["key", "init_key"] },
    Alias { canonical: "status", variants: &[] },
    Alias { canonical: "active_scoring_framework", variants: &["framework", "scoring_framework"] },
    Alias { canonical: "use_math_model", variants: &["math_model", "use_model"] },
    Alias { canonical: "strategic_priority_coefficient", variants: &["priority_coefficient", "strategic_priority"] },
    Alias { canonical: "impact_expected", variants: &["impact_override", "expected_impact"] },
    Alias { canonical: "effort_engineering_days", variants: &["engineering_days", "effort_override"] },
    Alias { canonical: "linked_objectives", variants: &["objectives", "okrs"] },
    Alias { canonical: "llm_notes", variants: &["ai_notes"] },
    Alias { canonical: "dependencies_keys", variants: &["dependency_keys", "depends_on_keys"] },
    Alias { canonical: "is_optimization_candidate", variants: &["optimization_candidate", "candidate"] },
    Alias { canonical: "candidate_period_key", variants: &["period", "period_key"] },
    Alias { canonical: "engineering_tokens", variants: &["tokens", "token_cost"] },
    Alias { canonical: "department", variants: &[] },
    Alias { canonical: "category", variants: &[] },
    Alias { canonical: "program", variants: &[] },
    Alias { canonical: "product", variants: &[] },
    Alias { canonical: "segment", variants: &[] },
    Alias { canonical: "run_status", variants: &["sync_status"] },
];

/// Product-owned columns of one central backlog row.
#[derive(Debug, Clone, Default)]
pub struct BacklogRow {
    pub row_number: usize,
    pub initiative_key: Option<String>,
    pub status: Option<String>,
    pub active_scoring_framework: Option<String>,
    pub use_math_model: Option<bool>,
    pub strategic_priority_coefficient: Option<f64>,
    pub impact_expected: Option<f64>,
    pub effort_engineering_days: Option<f64>,
    pub linked_objectives: Option<String>,
    pub llm_notes: Option<String>,
    pub dependencies_keys: Option<String>,
    pub is_optimization_candidate: Option<bool>,
    pub candidate_period_key: Option<String>,
    pub engineering_tokens: Option<i64>,
    pub department: Option<String>,
    pub category: Option<String>,
    pub program: Option<String>,
    pub product: Option<String>,
    pub segment: Option<String>,
    pub extras: HashMap<String, CellValue>,
}

impl BacklogRow {
    fn from_raw(raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            initiative_key: raw.get("initiative_key").as_trimmed_text(),
            status: raw.get("status").as_trimmed_text(),
            active_scoring_framework: raw.get("active_scoring_framework").as_trimmed_text(),
            use_math_model: parse_bool(raw.get("use_math_model")),
            strategic_priority_coefficient: parse_f64(raw.get("strategic_priority_coefficient")),
            impact_expected: parse_f64(raw.get("impact_expected")),
            effort_engineering_days: parse_f64(raw.get("effort_engineering_days")),
            linked_objectives: raw.get("linked_objectives").as_trimmed_text(),
            llm_notes: raw.get("llm_notes").as_trimmed_text(),
            dependencies_keys: raw.get("dependencies_keys").as_trimmed_text(),
            is_optimization_candidate: parse_bool(raw.get("is_optimization_candidate")),
            candidate_period_key: raw.get("candidate_period_key").as_trimmed_text(),
            engineering_tokens: parse_i64(raw.get("engineering_tokens")),
            department: raw.get("department").as_trimmed_text(),
            category: raw.get("category").as_trimmed_text(),
            program: raw.get("program").as_trimmed_text(),
            product: raw.get("product").as_trimmed_text(),
            segment: raw.get("segment").as_trimmed_text(),
            extras: raw.extras,
        }
    }
}

/// Read the central backlog tab. Data starts at row 2.
pub async fn read_backlog(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<BacklogRow>, SheetError> {
    let shape = TabShape::standard();
    let rows = read_tab(client, spreadsheet_id, tab, &shape, ALIASES).await?;
    Ok(rows.into_iter().map(BacklogRow::from_raw).collect())
}
