//! Job handlers behind the action registry.

mod backlog;
mod optimize;
mod pm;

use crate::registry::ActionRegistry;

/// Default tab names; the sheet context may override where it makes sense.
pub const TAB_SCORING_INPUTS: &str = "Scoring_Inputs";
pub const TAB_MATH_MODELS: &str = "MathModels";
pub const TAB_PARAMS: &str = "Params";
pub const TAB_METRICS_CONFIG: &str = "Metrics_Config";
pub const TAB_KPI_CONTRIBUTIONS: &str = "KPI_Contributions";
pub const TAB_CANDIDATES: &str = "Candidates";
pub const TAB_CONSTRAINTS: &str = "Constraints";
pub const TAB_TARGETS: &str = "Targets";
pub const TAB_SCENARIO_CONFIG: &str = "Scenario_Config";
pub const TAB_RUNS: &str = "Runs";
pub const TAB_RESULTS: &str = "Results";
pub const TAB_GAPS: &str = "Gaps";

/// Register the full §6.3 action table.
pub fn register_all(registry: &mut ActionRegistry) {
    registry.register("pm.backlog_sync", backlog::backlog_sync);
    registry.register("pm.score_selected", pm::score_selected);
    registry.register("pm.switch_framework", pm::switch_framework);
    registry.register("pm.save_selected", pm::save_selected);
    registry.register("pm.suggest_math_model_llm", pm::suggest_math_model_llm);
    registry.register("pm.seed_math_params", pm::seed_math_params);
    registry.register(
        "pm.optimize_run_selected_candidates",
        optimize::run_selected_candidates,
    );
    registry.register("pm.optimize_run_all_candidates", optimize::run_all_candidates);
    registry.register("pm.populate_candidates", optimize::populate_candidates);
}
