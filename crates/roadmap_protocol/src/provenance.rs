//! Provenance tokens stamped into `updated_source` by every writer.
//!
//! Tokens identify the data path that last touched a row. They are stable
//! strings: changing one silently breaks audit queries against old rows.

pub const FLOW1_INTAKE_SYNC: &str = "flow1.intake_sync";
pub const FLOW1_BACKLOG_SHEET_WRITE: &str = "flow1.backlog_sheet_write";
pub const FLOW1_BACKLOG_UPDATE: &str = "flow1.backlog_update";

pub const FLOW2_ACTIVATE: &str = "flow2.activate";

pub const FLOW3_COMPUTE_ALL_FRAMEWORKS: &str = "flow3.compute_all_frameworks";
pub const FLOW3_PRODUCTOPS_READ_INPUTS: &str = "flow3.productopssheet_read_inputs";
pub const FLOW3_PRODUCTOPS_WRITE_SCORES: &str = "flow3.productopssheet_write_scores";
pub const FLOW3_PRODUCTOPS_WRITE_KPI_CONTRIBUTIONS: &str =
    "flow3.productopssheet_write_kpi_contributions";

/// Provenance token for a PM job, e.g. `pm.score_selected`.
pub fn pm_token(job: &str) -> String {
    if job.starts_with("pm.") {
        job.to_string()
    } else {
        format!("pm.{job}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pm_token_is_idempotent() {
        assert_eq!(pm_token("score_selected"), "pm.score_selected");
        assert_eq!(pm_token("pm.score_selected"), "pm.score_selected");
    }
}
