//! Problem assembly: candidates + compiled constraints + objective.

use crate::constraints::ConstraintSetCompiled;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use roadmap_db::{Db, Initiative, KpiLevel, ObjectiveMode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Float KPI contributions are scaled to integers for the solver.
pub const KPI_SCALE: f64 = 1_000_000.0;

/// Deterministic round-half-to-even at integer resolution.
pub fn scale_to_int(value: f64) -> i64 {
    let scaled = value * KPI_SCALE;
    let floor = scaled.floor();
    let fraction = scaled - floor;
    let rounded = if (fraction - 0.5).abs() < f64::EPSILON {
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded as i64
}

/// One selectable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub initiative_key: String,
    pub engineering_tokens: i64,
    /// dimension name → value (country, department, category, program,
    /// product, segment).
    pub dimensions: BTreeMap<String, String>,
    pub kpi_contributions: BTreeMap<String, f64>,
    pub active_overall_score: Option<f64>,
}

impl Candidate {
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions.get(name).map(String::as_str)
    }

    pub fn from_initiative(initiative: &Initiative) -> Self {
        const DIMENSIONS: &[&str] = &[
            "country",
            "department",
            "category",
            "program",
            "product",
            "segment",
        ];
        let dimensions = DIMENSIONS
            .iter()
            .filter_map(|name| {
                initiative
                    .dimension_value(name)
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();
        let kpi_contributions = initiative
            .kpi_contributions()
            .into_iter()
            .collect::<BTreeMap<String, f64>>();

        Self {
            initiative_key: initiative.initiative_key.clone(),
            engineering_tokens: initiative.engineering_tokens.unwrap_or(0),
            dimensions,
            kpi_contributions,
            active_overall_score: initiative.overall_score,
        }
    }
}

/// Candidate resolution scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProblemScope {
    AllCandidates,
    SelectedKeys { keys: Vec<String> },
}

/// Resolved objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ObjectiveSpec {
    NorthStar {
        kpi_key: String,
    },
    WeightedKpis {
        weights: BTreeMap<String, f64>,
        scales: BTreeMap<String, f64>,
    },
    Lexicographic {
        priorities: Vec<String>,
    },
}

/// A frozen optimization problem: inputs snapshot plus objective
/// diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationProblem {
    pub scenario_name: String,
    pub set_name: String,
    pub scope: ProblemScope,
    pub capacity_total_tokens: i64,
    pub candidates: Vec<Candidate>,
    pub constraints: ConstraintSetCompiled,
    pub objective: ObjectiveSpec,
    /// initiative_key → scaled integer objective coefficient.
    pub objective_coefficients: BTreeMap<String, i64>,
    pub diagnostics: Map<String, Value>,
}

impl OptimizationProblem {
    pub fn coefficient(&self, initiative_key: &str) -> i64 {
        self.objective_coefficients
            .get(initiative_key)
            .copied()
            .unwrap_or(0)
    }
}

/// Assemble a problem from the database.
///
/// Candidate `engineering_tokens` comes from the Initiative column, which
/// is authoritative; a diverging Candidates-tab projection surfaces as a
/// `tokens_mismatch` diagnostic, not as data.
pub async fn build_problem(
    db: &Db,
    scenario_name: &str,
    set_name: &str,
    scope: ProblemScope,
    period_end: Option<NaiveDate>,
    projected_tokens: Option<&BTreeMap<String, i64>>,
) -> Result<OptimizationProblem> {
    let scenario = db
        .optimization()
        .get_scenario(scenario_name)
        .await?
        .with_context(|| format!("unknown scenario: {scenario_name}"))?;

    // Resolve candidates by scope.
    let initiatives = match &scope {
        ProblemScope::AllCandidates => {
            db.initiatives()
                .list_candidates(scenario.period_key.as_deref())
                .await?
        }
        ProblemScope::SelectedKeys { keys } => db.initiatives().list_by_keys(keys).await?,
    };

    let mut diagnostics = Map::new();
    let mut candidates = Vec::new();
    let mut mismatches = Vec::new();
    let mut dropped_deadline = Vec::new();

    for initiative in &initiatives {
        // Time-infeasible candidates are filtered before the solver.
        if let (Some(deadline), Some(end)) = (initiative.deadline_date, period_end) {
            if deadline < end {
                dropped_deadline.push(initiative.initiative_key.clone());
                continue;
            }
        }

        let candidate = Candidate::from_initiative(initiative);
        if let Some(projection) = projected_tokens {
            if let Some(&projected) = projection.get(&candidate.initiative_key) {
                if projected != candidate.engineering_tokens {
                    mismatches.push(json!({
                        "initiative_key": candidate.initiative_key,
                        "initiative_tokens": candidate.engineering_tokens,
                        "projected_tokens": projected,
                    }));
                }
            }
        }
        candidates.push(candidate);
    }
    candidates.sort_by(|a, b| a.initiative_key.cmp(&b.initiative_key));

    if !mismatches.is_empty() {
        diagnostics.insert("tokens_mismatch".to_string(), Value::Array(mismatches));
    }
    if !dropped_deadline.is_empty() {
        diagnostics.insert(
            "dropped_past_deadline".to_string(),
            json!(dropped_deadline),
        );
    }

    // Load the compiled constraint set; a missing set compiles to empty.
    let constraints = match db
        .optimization()
        .get_constraint_set(scenario_name, set_name)
        .await?
    {
        Some(row) => serde_json::from_str(&row.compiled_json)
            .with_context(|| format!("corrupt compiled constraint set {scenario_name}/{set_name}"))?,
        None => ConstraintSetCompiled {
            scenario_name: scenario_name.to_string(),
            set_name: set_name.to_string(),
            ..Default::default()
        },
    };

    let objective = resolve_objective(db, &scenario.objective_mode, &scenario.objective_weights(), &constraints, &mut diagnostics).await?;
    let objective_coefficients =
        compute_coefficients(&candidates, &objective);

    debug!(
        "Problem {scenario_name}/{set_name}: {} candidates, capacity {}",
        candidates.len(),
        scenario.capacity_total_tokens
    );

    Ok(OptimizationProblem {
        scenario_name: scenario_name.to_string(),
        set_name: set_name.to_string(),
        scope,
        capacity_total_tokens: scenario.capacity_total_tokens,
        candidates,
        constraints,
        objective,
        objective_coefficients,
        diagnostics,
    })
}

async fn resolve_objective(
    db: &Db,
    mode: &ObjectiveMode,
    weights: &std::collections::HashMap<String, f64>,
    constraints: &ConstraintSetCompiled,
    diagnostics: &mut Map<String, Value>,
) -> Result<ObjectiveSpec> {
    match mode {
        ObjectiveMode::NorthStar => {
            let star = db
                .metrics()
                .active_north_star()
                .await?
                .context("north_star objective requires exactly one active north-star KPI")?;
            if db.metrics().count_active_north_star().await? > 1 {
                anyhow::bail!("more than one active north-star KPI in the registry");
            }
            diagnostics.insert("north_star_key".to_string(), json!(star.kpi_key));
            Ok(ObjectiveSpec::NorthStar { kpi_key: star.kpi_key })
        }
        ObjectiveMode::WeightedKpis => {
            if weights.is_empty() {
                anyhow::bail!("weighted_kpis objective requires objective_weights_json");
            }
            let mut resolved_weights = BTreeMap::new();
            let mut scales = BTreeMap::new();
            let mut scale_sources = Map::new();

            for (kpi_key, weight) in weights {
                let metric = db
                    .metrics()
                    .get(kpi_key)
                    .await?
                    .with_context(|| format!("objective weight references unknown kpi {kpi_key}"))?;
                if !metric.is_active || !metric.kpi_level.contributes() {
                    anyhow::bail!(
                        "objective weight kpi {kpi_key} must be active and north_star or strategic"
                    );
                }

                // Normalization scale: unscoped target, else max target over
                // any dimension, else 1.0.
                let (scale, source) = match constraints.unscoped_target(kpi_key) {
                    Some(spec) if spec.value > 0.0 => (spec.value, "target_all"),
                    _ => match constraints.max_target_value(kpi_key) {
                        Some(max) if max > 0.0 => (max, "max_target"),
                        _ => (1.0, "fallback"),
                    },
                };
                resolved_weights.insert(kpi_key.clone(), *weight);
                scales.insert(kpi_key.clone(), scale);
                scale_sources.insert(kpi_key.clone(), json!(source));
            }

            diagnostics.insert(
                "weights_sum".to_string(),
                json!(resolved_weights.values().sum::<f64>()),
            );
            diagnostics.insert(
                "kpi_scale_map".to_string(),
                json!(scales),
            );
            diagnostics.insert("scale_source_map".to_string(), Value::Object(scale_sources));
            Ok(ObjectiveSpec::WeightedKpis {
                weights: resolved_weights,
                scales,
            })
        }
        ObjectiveMode::Lexicographic => {
            // Priorities: explicit weights ordered by descending weight,
            // else the active north star followed by strategic KPIs.
            let mut priorities: Vec<(String, f64)> =
                weights.iter().map(|(k, w)| (k.clone(), *w)).collect();
            priorities.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            let mut order: Vec<String> = priorities.into_iter().map(|(k, _)| k).collect();
            if order.is_empty() {
                let metrics = db.metrics().list_active().await?;
                for metric in metrics
                    .iter()
                    .filter(|m| m.kpi_level == KpiLevel::NorthStar)
                    .chain(metrics.iter().filter(|m| m.kpi_level == KpiLevel::Strategic))
                {
                    order.push(metric.kpi_key.clone());
                }
            }
            if order.is_empty() {
                anyhow::bail!("lexicographic objective has no KPI priorities");
            }
            diagnostics.insert("lexicographic_order".to_string(), json!(order));
            Ok(ObjectiveSpec::Lexicographic { priorities: order })
        }
    }
}

/// Per-candidate scaled integer objective coefficients.
pub fn compute_coefficients(
    candidates: &[Candidate],
    objective: &ObjectiveSpec,
) -> BTreeMap<String, i64> {
    candidates
        .iter()
        .map(|candidate| {
            let raw = match objective {
                ObjectiveSpec::NorthStar { kpi_key } => candidate
                    .kpi_contributions
                    .get(kpi_key)
                    .copied()
                    .unwrap_or(0.0),
                ObjectiveSpec::WeightedKpis { weights, scales } => weights
                    .iter()
                    .map(|(kpi, weight)| {
                        let contribution =
                            candidate.kpi_contributions.get(kpi).copied().unwrap_or(0.0);
                        let scale = scales.get(kpi).copied().unwrap_or(1.0);
                        weight * contribution / scale
                    })
                    .sum(),
                // Lexicographic coefficients are per-stage; the first
                // priority seeds the base problem.
                ObjectiveSpec::Lexicographic { priorities } => priorities
                    .first()
                    .and_then(|kpi| candidate.kpi_contributions.get(kpi))
                    .copied()
                    .unwrap_or(0.0),
            };
            (candidate.initiative_key.clone(), scale_to_int(raw))
        })
        .collect()
}
