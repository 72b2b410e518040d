//! Scoring pipeline: per-framework engines, activation, and KPI
//! contribution aggregation.
//!
//! Per-framework score columns are only written by the matching compute
//! path; the active `{value,effort,overall}` triple is only written by
//! activation. Engines share one contract so the service can treat
//! frameworks uniformly.

pub mod engines;
pub mod kpi;
pub mod math_model;
pub mod service;

pub use engines::{engine_for, ScoreInputs, ScoreResult, ScoringEngine};
pub use kpi::{compute_kpi_contributions, update_initiative_contributions, ContributionOutcome};
pub use service::{BatchOutcome, ScoringService};
