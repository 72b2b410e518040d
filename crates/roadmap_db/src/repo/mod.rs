//! Explicit repositories, one per aggregate.
//!
//! Update methods are scoped to column-ownership groups; there is no generic
//! attribute write. Every mutating method takes the caller's provenance
//! token and stamps `updated_source` / `updated_at` itself.

mod initiatives;
mod math_models;
mod metrics;
mod optimization;
mod scores;

pub use initiatives::InitiativeRepo;
pub use math_models::{MathModelFields, MathModelRepo, ParamFields, ParamRepo};
pub use metrics::{MetricConfigRepo, MetricFields};
pub use optimization::{OptimizationRepo, ScenarioFields};
pub use scores::ScoreHistoryRepo;
