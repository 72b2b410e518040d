//! Intake tab reader.

use crate::cells::{parse_bool, parse_date, parse_f64, CellValue};
use crate::client::{SheetClient, SheetError};
use crate::header::Alias;
use crate::reader::{read_tab, RawRow, TabShape};
use chrono::NaiveDate;
use std::collections::HashMap;

const ALIASES: &[Alias] = &[
    Alias { canonical: "initiative_key", variants: &["key", "init_key", "id"] },
    Alias { canonical: "title", variants: &["idea_title", "initiative_title", "name"] },
    Alias { canonical: "requesting_team", variants: &["team", "department"] },
    Alias { canonical: "requester_name", variants: &["requester", "submitted_by"] },
    Alias { canonical: "requester_email", variants: &["email", "submitter_email"] },
    Alias { canonical: "country", variants: &["market", "region"] },
    Alias { canonical: "product_area", variants: &["area", "product"] },
    Alias { canonical: "problem_statement", variants: &["problem", "pain_point"] },
    Alias { canonical: "desired_outcome", variants: &["outcome", "expected_outcome"] },
    Alias { canonical: "hypothesis", variants: &[] },
    Alias { canonical: "customer_segment", variants: &["segment", "audience"] },
    Alias { canonical: "initiative_type", variants: &["type", "idea_type"] },
    Alias { canonical: "strategic_theme", variants: &["theme"] },
    Alias { canonical: "deadline_date", variants: &["deadline", "needed_by"] },
    Alias { canonical: "impact_low", variants: &["impact_min", "low_impact"] },
    Alias { canonical: "impact_expected", variants: &["impact", "expected_impact"] },
    Alias { canonical: "impact_high", variants: &["impact_max", "high_impact"] },
    Alias { canonical: "effort_tshirt", variants: &["t_shirt", "t_shirt_size", "effort_size"] },
    Alias { canonical: "effort_engineering_days", variants: &["engineering_days", "eng_days", "effort_days"] },
    Alias { canonical: "risk_level", variants: &["risk"] },
    Alias { canonical: "is_mandatory", variants: &["mandatory", "must_do"] },
    Alias { canonical: "dependencies_text", variants: &["dependencies", "depends_on"] },
    Alias { canonical: "status", variants: &[] },
    Alias { canonical: "run_status", variants: &["sync_status"] },
];

/// One intake submission row.
#[derive(Debug, Clone, Default)]
pub struct IntakeRow {
    pub row_number: usize,
    pub initiative_key: Option<String>,
    pub title: Option<String>,
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
    pub is_mandatory: Option<bool>,
    pub dependencies_text: Option<String>,
    pub status: Option<String>,
    pub extras: HashMap<String, CellValue>,
}

impl IntakeRow {
    fn from_raw(raw: RawRow) -> Self {
        Self {
            row_number: raw.row_number,
            initiative_key: raw.get("initiative_key").as_trimmed_text(),
            title: raw.get("title").as_trimmed_text(),
            requesting_team: raw.get("requesting_team").as_trimmed_text(),
            requester_name: raw.get("requester_name").as_trimmed_text(),
            requester_email: raw.get("requester_email").as_trimmed_text(),
            country: raw.get("country").as_trimmed_text(),
            product_area: raw.get("product_area").as_trimmed_text(),
            problem_statement: raw.get("problem_statement").as_trimmed_text(),
            desired_outcome: raw.get("desired_outcome").as_trimmed_text(),
            hypothesis: raw.get("hypothesis").as_trimmed_text(),
            customer_segment: raw.get("customer_segment").as_trimmed_text(),
            initiative_type: raw.get("initiative_type").as_trimmed_text(),
            strategic_theme: raw.get("strategic_theme").as_trimmed_text(),
            deadline_date: parse_date(raw.get("deadline_date")),
            impact_low: parse_f64(raw.get("impact_low")),
            impact_expected: parse_f64(raw.get("impact_expected")),
            impact_high: parse_f64(raw.get("impact_high")),
            effort_tshirt: raw.get("effort_tshirt").as_trimmed_text(),
            effort_engineering_days: parse_f64(raw.get("effort_engineering_days")),
            risk_level: raw.get("risk_level").as_trimmed_text(),
            is_mandatory: parse_bool(raw.get("is_mandatory")),
            dependencies_text: raw.get("dependencies_text").as_trimmed_text(),
            status: raw.get("status").as_trimmed_text(),
            extras: raw.extras,
        }
    }
}

/// Read an intake tab. Data starts at row 2.
pub async fn read_intake(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<IntakeRow>, SheetError> {
    let shape = TabShape::standard();
    let rows = read_tab(client, spreadsheet_id, tab, &shape, ALIASES).await?;
    Ok(rows.into_iter().map(IntakeRow::from_raw).collect())
}
