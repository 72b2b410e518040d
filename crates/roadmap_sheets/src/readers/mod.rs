//! Typed per-tab readers.
//!
//! Each reader owns its tab's alias table and turns raw rows into a closed
//! record of optional primitives plus the shared `extras` map. Row numbers
//! are 1-based sheet rows, preserved for targeted write-backs.

pub mod backlog;
pub mod intake;
pub mod optimization;
pub mod productops;

pub use backlog::{read_backlog, BacklogRow};
pub use intake::{read_intake, IntakeRow};
pub use optimization::{
    read_candidates, read_constraints, read_scenario_config, read_targets, CandidateRow,
    ConstraintRow, ScenarioConfigRow, TargetRow,
};
pub use productops::{
    read_kpi_contributions, read_math_models, read_metrics_config, read_params,
    read_scoring_inputs, KpiContributionRow, MathModelRow, MetricsConfigRow, ParamRow,
    ScoringInputsRow,
};
