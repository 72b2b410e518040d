//! Database fixture builders.

use anyhow::Result;
use roadmap_db::{
    CentralFields, Db, Framework, IntakeFields, KpiLevel, MetricFields, ObjectiveMode,
    ScenarioFields, ScoringInputFields,
};
use roadmap_ids::InitiativeKey;

/// Everything a test usually needs to vary on an initiative.
#[derive(Debug, Clone, Default)]
pub struct InitiativeSeed {
    pub title: String,
    pub country: Option<String>,
    pub rice: Option<(f64, f64, f64, f64)>,
    pub wsjf: Option<(f64, f64, f64, f64)>,
    pub active_framework: Option<Framework>,
    pub use_math_model: bool,
    pub effort_engineering_days: Option<f64>,
    pub risk_level: Option<String>,
    pub is_candidate: bool,
    pub period_key: Option<String>,
    pub engineering_tokens: Option<i64>,
}

impl InitiativeSeed {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Default::default()
        }
    }

    pub fn candidate(title: &str, period: &str, tokens: i64) -> Self {
        Self {
            title: title.to_string(),
            is_candidate: true,
            period_key: Some(period.to_string()),
            engineering_tokens: Some(tokens),
            ..Default::default()
        }
    }
}

/// Insert an initiative through the same repository paths production uses
/// and return its assigned key.
pub async fn seed_initiative(db: &Db, seed: &InitiativeSeed) -> Result<InitiativeKey> {
    let repo = db.initiatives();
    let key = repo.next_key().await?;

    let intake = IntakeFields {
        title: seed.title.clone(),
        country: seed.country.clone(),
        effort_engineering_days: seed.effort_engineering_days,
        risk_level: seed.risk_level.clone(),
        ..Default::default()
    };
    repo.create_from_intake(&key, "seed-sheet", "Seed_Tab", 2, &intake, "flow1.intake_sync")
        .await?;

    if seed.rice.is_some() || seed.wsjf.is_some() || seed.active_framework.is_some() {
        let (reach, impact, confidence, effort) =
            seed.rice.map_or((None, None, None, None), |(r, i, c, e)| {
                (Some(r), Some(i), Some(c), Some(e))
            });
        let (bv, tc, rr, js) = seed.wsjf.map_or((None, None, None, None), |(b, t, r, j)| {
            (Some(b), Some(t), Some(r), Some(j))
        });
        let inputs = ScoringInputFields {
            rice_reach: reach,
            rice_impact: impact,
            rice_confidence: confidence,
            rice_effort: effort,
            wsjf_business_value: bv,
            wsjf_time_criticality: tc,
            wsjf_risk_reduction: rr,
            wsjf_job_size: js,
            active_scoring_framework: seed.active_framework,
            use_math_model: Some(seed.use_math_model),
            strategic_priority_coefficient: None,
        };
        repo.update_scoring_inputs(key.as_str(), &inputs, "flow3.productopssheet_read_inputs")
            .await?;
    } else if seed.use_math_model {
        let inputs = ScoringInputFields {
            use_math_model: Some(true),
            ..Default::default()
        };
        repo.update_scoring_inputs(key.as_str(), &inputs, "flow3.productopssheet_read_inputs")
            .await?;
    }

    if seed.is_candidate {
        let central = CentralFields {
            is_optimization_candidate: Some(true),
            candidate_period_key: seed.period_key.clone(),
            engineering_tokens: seed.engineering_tokens,
            ..Default::default()
        };
        repo.update_central_fields(key.as_str(), &central, "flow1.backlog_update")
            .await?;
    }

    Ok(key)
}

/// Register an active KPI.
pub async fn seed_metric(db: &Db, kpi_key: &str, level: KpiLevel) -> Result<()> {
    db.metrics()
        .upsert(
            kpi_key,
            &MetricFields {
                kpi_name: kpi_key.to_string(),
                kpi_level: level,
                unit: None,
                description: None,
                is_active: true,
            },
            "test",
        )
        .await
}

/// Register a scenario.
pub async fn seed_scenario(
    db: &Db,
    name: &str,
    period: &str,
    capacity: i64,
    mode: ObjectiveMode,
    weights_json: Option<&str>,
) -> Result<()> {
    db.optimization()
        .upsert_scenario(
            name,
            &ScenarioFields {
                period_key: Some(period.to_string()),
                capacity_total_tokens: capacity,
                objective_mode: mode,
                objective_weights_json: weights_json.map(str::to_string),
                notes: None,
            },
            "test",
        )
        .await
}
