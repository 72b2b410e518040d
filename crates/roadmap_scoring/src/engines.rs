//! The scoring engine contract and the RICE / WSJF implementations.

use roadmap_db::{Framework, Initiative};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Effort floor so overall scores never divide by zero.
pub const EFFORT_EPSILON: f64 = 1e-6;

/// Inputs an engine may consume, extracted once from the initiative row.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoreInputs {
    pub rice_reach: Option<f64>,
    pub rice_impact: Option<f64>,
    pub rice_confidence: Option<f64>,
    pub rice_effort: Option<f64>,
    pub wsjf_business_value: Option<f64>,
    pub wsjf_time_criticality: Option<f64>,
    pub wsjf_risk_reduction: Option<f64>,
    pub wsjf_job_size: Option<f64>,
    pub effort_engineering_days: Option<f64>,
    pub risk_level: Option<String>,
    /// Representative math model value, filled by the math compute path.
    pub math_model_value: Option<f64>,
}

impl ScoreInputs {
    pub fn from_initiative(initiative: &Initiative) -> Self {
        Self {
            rice_reach: initiative.rice_reach,
            rice_impact: initiative.rice_impact,
            rice_confidence: initiative.rice_confidence,
            rice_effort: initiative.rice_effort,
            wsjf_business_value: initiative.wsjf_business_value,
            wsjf_time_criticality: initiative.wsjf_time_criticality,
            wsjf_risk_reduction: initiative.wsjf_risk_reduction,
            wsjf_job_size: initiative.wsjf_job_size,
            effort_engineering_days: initiative.effort_engineering_days,
            risk_level: initiative.risk_level.clone(),
            math_model_value: None,
        }
    }
}

/// Engine output: the triple plus the raw inputs it consumed and any
/// warnings. A `None` triple means the framework had insufficient inputs.
#[derive(Debug, Clone, Default)]
pub struct ScoreResult {
    pub value_score: Option<f64>,
    pub effort_score: Option<f64>,
    pub overall_score: Option<f64>,
    pub raw_inputs: Map<String, Value>,
    pub warnings: Vec<String>,
}

impl ScoreResult {
    pub fn is_scored(&self) -> bool {
        self.overall_score.is_some()
    }

    pub fn triple(&self) -> roadmap_db::ScoreTriple {
        roadmap_db::ScoreTriple {
            value_score: self.value_score,
            effort_score: self.effort_score,
            overall_score: self.overall_score,
        }
    }
}

/// One scoring framework.
pub trait ScoringEngine: Send + Sync {
    fn framework(&self) -> Framework;
    fn compute(&self, inputs: &ScoreInputs) -> ScoreResult;
}

/// Confidence derived from risk when the cell is blank.
fn confidence_from_risk(risk_level: Option<&str>) -> f64 {
    match risk_level.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
        Some("low") => 0.9,
        Some("medium") => 0.7,
        Some("high") => 0.5,
        _ => 0.7,
    }
}

pub struct RiceEngine;

impl ScoringEngine for RiceEngine {
    fn framework(&self) -> Framework {
        Framework::Rice
    }

    fn compute(&self, inputs: &ScoreInputs) -> ScoreResult {
        let mut result = ScoreResult::default();

        let (Some(reach), Some(impact)) = (inputs.rice_reach, inputs.rice_impact) else {
            result
                .warnings
                .push("RICE requires reach and impact".to_string());
            return result;
        };
        let confidence = inputs
            .rice_confidence
            .unwrap_or_else(|| confidence_from_risk(inputs.risk_level.as_deref()));
        let effort_days = inputs
            .rice_effort
            .or(inputs.effort_engineering_days)
            .unwrap_or(0.0);
        let effort = effort_days.max(EFFORT_EPSILON);

        let value = reach * impact * confidence;
        result.value_score = Some(value);
        result.effort_score = Some(effort);
        result.overall_score = Some(value / effort);
        result.raw_inputs = json!({
            "reach": reach,
            "impact": impact,
            "confidence": confidence,
            "effort": effort,
        })
        .as_object()
        .cloned()
        .unwrap_or_default();
        if inputs.rice_confidence.is_none() {
            result.warnings.push(format!(
                "confidence derived from risk level ({confidence})"
            ));
        }
        result
    }
}

pub struct WsjfEngine;

impl ScoringEngine for WsjfEngine {
    fn framework(&self) -> Framework {
        Framework::Wsjf
    }

    fn compute(&self, inputs: &ScoreInputs) -> ScoreResult {
        let mut result = ScoreResult::default();

        let components = [
            inputs.wsjf_business_value,
            inputs.wsjf_time_criticality,
            inputs.wsjf_risk_reduction,
        ];
        if components.iter().all(Option::is_none) {
            result.warnings.push(
                "WSJF requires at least one of business value, time criticality, risk reduction"
                    .to_string(),
            );
            return result;
        }
        let Some(job_size) = inputs.wsjf_job_size else {
            result.warnings.push("WSJF requires job size".to_string());
            return result;
        };

        let value: f64 = components.iter().flatten().sum();
        let effort = job_size.max(EFFORT_EPSILON);
        result.value_score = Some(value);
        result.effort_score = Some(effort);
        result.overall_score = Some(value / effort);
        result.raw_inputs = json!({
            "business_value": inputs.wsjf_business_value.unwrap_or(0.0),
            "time_criticality": inputs.wsjf_time_criticality.unwrap_or(0.0),
            "risk_reduction": inputs.wsjf_risk_reduction.unwrap_or(0.0),
            "job_size": job_size,
        })
        .as_object()
        .cloned()
        .unwrap_or_default();
        result
    }
}

/// Math model scores are computed per-model by the service; the engine only
/// turns the representative value into the triple shape.
pub struct MathModelEngine;

impl ScoringEngine for MathModelEngine {
    fn framework(&self) -> Framework {
        Framework::MathModel
    }

    fn compute(&self, inputs: &ScoreInputs) -> ScoreResult {
        let mut result = ScoreResult::default();

        let Some(value) = inputs.math_model_value else {
            result
                .warnings
                .push("no evaluated math model available".to_string());
            return result;
        };
        let effort = inputs
            .effort_engineering_days
            .unwrap_or(0.0)
            .max(EFFORT_EPSILON);
        result.value_score = Some(value);
        result.effort_score = Some(effort);
        result.overall_score = Some(value / effort);
        result.raw_inputs = json!({
            "model_value": value,
            "effort_engineering_days": effort,
        })
        .as_object()
        .cloned()
        .unwrap_or_default();
        result
    }
}

static RICE: RiceEngine = RiceEngine;
static WSJF: WsjfEngine = WsjfEngine;
static MATH: MathModelEngine = MathModelEngine;

/// Resolve a framework identifier to its engine.
pub fn engine_for(framework: Framework) -> &'static dyn ScoringEngine {
    match framework {
        Framework::Rice => &RICE,
        Framework::Wsjf => &WSJF,
        Framework::MathModel => &MATH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rice_matches_reference_numbers() {
        let inputs = ScoreInputs {
            rice_reach: Some(10_000.0),
            rice_impact: Some(3.0),
            rice_confidence: Some(0.7),
            rice_effort: Some(20.0),
            ..Default::default()
        };
        let result = engine_for(Framework::Rice).compute(&inputs);
        assert_eq!(result.value_score, Some(21_000.0));
        assert_eq!(result.effort_score, Some(20.0));
        assert_eq!(result.overall_score, Some(1_050.0));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn rice_confidence_falls_back_to_risk() {
        let inputs = ScoreInputs {
            rice_reach: Some(100.0),
            rice_impact: Some(1.0),
            rice_effort: Some(1.0),
            risk_level: Some("low".to_string()),
            ..Default::default()
        };
        let result = engine_for(Framework::Rice).compute(&inputs);
        assert_eq!(result.value_score, Some(90.0));
        assert!(!result.warnings.is_empty());

        let no_risk = ScoreInputs {
            rice_reach: Some(100.0),
            rice_impact: Some(1.0),
            rice_effort: Some(1.0),
            ..Default::default()
        };
        let result = engine_for(Framework::Rice).compute(&no_risk);
        assert_eq!(result.value_score, Some(70.0));
    }

    #[test]
    fn rice_without_reach_is_unscored() {
        let result = engine_for(Framework::Rice).compute(&ScoreInputs::default());
        assert!(!result.is_scored());
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn rice_zero_effort_uses_epsilon() {
        let inputs = ScoreInputs {
            rice_reach: Some(10.0),
            rice_impact: Some(1.0),
            rice_confidence: Some(1.0),
            rice_effort: Some(0.0),
            ..Default::default()
        };
        let result = engine_for(Framework::Rice).compute(&inputs);
        assert_eq!(result.effort_score, Some(EFFORT_EPSILON));
        assert!(result.overall_score.unwrap().is_finite());
    }

    #[test]
    fn wsjf_sums_value_components() {
        let inputs = ScoreInputs {
            wsjf_business_value: Some(8.0),
            wsjf_time_criticality: Some(5.0),
            wsjf_risk_reduction: Some(2.0),
            wsjf_job_size: Some(5.0),
            ..Default::default()
        };
        let result = engine_for(Framework::Wsjf).compute(&inputs);
        assert_eq!(result.value_score, Some(15.0));
        assert_eq!(result.overall_score, Some(3.0));
    }

    #[test]
    fn wsjf_needs_job_size() {
        let inputs = ScoreInputs {
            wsjf_business_value: Some(8.0),
            ..Default::default()
        };
        let result = engine_for(Framework::Wsjf).compute(&inputs);
        assert!(!result.is_scored());
    }

    #[test]
    fn math_engine_divides_by_engineering_days() {
        let inputs = ScoreInputs {
            math_model_value: Some(85.5),
            effort_engineering_days: Some(10.0),
            ..Default::default()
        };
        let result = engine_for(Framework::MathModel).compute(&inputs);
        assert_eq!(result.value_score, Some(85.5));
        assert_eq!(result.overall_score, Some(8.55));
    }
}
