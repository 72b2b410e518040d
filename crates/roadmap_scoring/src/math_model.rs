//! Per-model formula evaluation and representative selection.

use anyhow::Result;
use chrono::Utc;
use roadmap_db::{Db, Framework, InitiativeMathModel};
use roadmap_formula::{evaluate_script, FormulaError};
use std::collections::HashMap;
use tracing::debug;

/// Outcome of evaluating every model an initiative owns.
#[derive(Debug, Default)]
pub struct ModelEvaluation {
    pub evaluated: usize,
    pub failed: usize,
    pub warnings: Vec<String>,
}

/// Evaluate each approved-formula model against its approved parameters and
/// store `computed_score` + `last_computed_at`. A formula failure nulls that
/// model's score and moves on; sibling models still evaluate.
pub async fn evaluate_models(
    db: &Db,
    initiative_key: &str,
    timeout_secs: u64,
) -> Result<ModelEvaluation> {
    let models = db.math_models().list_for_initiative(initiative_key).await?;
    let params = db.params();
    let mut outcome = ModelEvaluation::default();

    for model in &models {
        let Some(formula) = model.formula_text.as_deref() else {
            continue;
        };
        if !model.approved_by_user {
            outcome.warnings.push(format!(
                "model {} skipped: not approved by user",
                model.model_name
            ));
            continue;
        }

        let approved = params
            .list_approved(initiative_key, Framework::MathModel, &model.model_name)
            .await?;
        let env: HashMap<String, f64> = approved
            .iter()
            .filter_map(|p| p.value.map(|v| (p.param_name.clone(), v)))
            .collect();

        match evaluate_script(formula, &env, timeout_secs) {
            Ok(final_env) => {
                let value = final_env.get("value").copied();
                db.math_models()
                    .set_computed(model.id, value, Utc::now())
                    .await?;
                outcome.evaluated += 1;
                debug!(
                    "Model {}/{} evaluated: {:?}",
                    initiative_key, model.model_name, value
                );
            }
            Err(err) => {
                db.math_models()
                    .set_computed(model.id, None, Utc::now())
                    .await?;
                outcome.failed += 1;
                outcome.warnings.push(format!(
                    "model {} failed: {}",
                    model.model_name,
                    short_formula_error(&err)
                ));
            }
        }
    }

    Ok(outcome)
}

fn short_formula_error(err: &FormulaError) -> String {
    err.to_string()
}

/// Representative model for the initiative's overall math score: the
/// primary model, else the model targeting the active north star, else the
/// highest computed score. Ties break on model name for determinism.
pub fn representative_model<'a>(
    models: &'a [InitiativeMathModel],
    north_star_key: Option<&str>,
) -> Option<&'a InitiativeMathModel> {
    let scored: Vec<&InitiativeMathModel> = models
        .iter()
        .filter(|m| m.computed_score.is_some())
        .collect();
    if scored.is_empty() {
        return None;
    }

    if let Some(primary) = scored.iter().find(|m| m.is_primary) {
        return Some(primary);
    }
    if let Some(star) = north_star_key {
        if let Some(model) = scored
            .iter()
            .find(|m| m.target_kpi_key.as_deref() == Some(star))
        {
            return Some(model);
        }
    }
    scored.into_iter().max_by(|a, b| {
        let by_score = a
            .computed_score
            .partial_cmp(&b.computed_score)
            .unwrap_or(std::cmp::Ordering::Equal);
        by_score.then_with(|| b.model_name.cmp(&a.model_name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str, score: Option<f64>, primary: bool, kpi: Option<&str>) -> InitiativeMathModel {
        InitiativeMathModel {
            id: 0,
            initiative_key: "INIT-000001".to_string(),
            model_name: name.to_string(),
            target_kpi_key: kpi.map(str::to_string),
            metric_chain_text: None,
            metric_chain_json: None,
            formula_text: None,
            assumptions_text: None,
            is_primary: primary,
            approved_by_user: true,
            suggested_by_llm: false,
            computed_score: score,
            last_computed_at: None,
            updated_source: None,
            updated_at: None,
        }
    }

    #[test]
    fn primary_wins() {
        let models = vec![
            model("M1", Some(10.0), false, Some("revenue")),
            model("M2", Some(5.0), true, None),
        ];
        assert_eq!(representative_model(&models, Some("revenue")).unwrap().model_name, "M2");
    }

    #[test]
    fn north_star_target_beats_higher_score() {
        let models = vec![
            model("M1", Some(100.0), false, Some("retention")),
            model("M2", Some(5.0), false, Some("revenue")),
        ];
        assert_eq!(representative_model(&models, Some("revenue")).unwrap().model_name, "M2");
    }

    #[test]
    fn falls_back_to_highest_score() {
        let models = vec![
            model("M1", Some(10.0), false, None),
            model("M2", Some(20.0), false, None),
            model("M3", None, true, None),
        ];
        // The primary has no score, so it cannot represent.
        assert_eq!(representative_model(&models, None).unwrap().model_name, "M2");
    }

    #[test]
    fn empty_when_nothing_scored() {
        let models = vec![model("M1", None, false, None)];
        assert!(representative_model(&models, None).is_none());
    }

    #[test]
    fn score_ties_break_on_model_name() {
        let models = vec![
            model("M2", Some(10.0), false, None),
            model("M1", Some(10.0), false, None),
        ];
        assert_eq!(representative_model(&models, None).unwrap().model_name, "M1");
    }
}
