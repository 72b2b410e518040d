//! The scoring service: per-framework compute, activation, batch drivers.

use crate::engines::{engine_for, ScoreInputs, ScoreResult};
use crate::kpi::update_initiative_contributions;
use crate::math_model::{evaluate_models, representative_model};
use anyhow::Result;
use roadmap_db::{Db, Framework, Initiative, ScoreTriple};
use roadmap_protocol::defaults::DEFAULT_FORMULA_TIMEOUT_SECS;
use roadmap_protocol::provenance::{FLOW2_ACTIVATE, FLOW3_COMPUTE_ALL_FRAMEWORKS};
use serde_json::Value;
use tracing::{info, warn};

/// Batch driver counters.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct BatchOutcome {
    pub scored: usize,
    pub skipped_no_key: usize,
    pub failed: usize,
    pub warnings: Vec<String>,
}

pub struct ScoringService {
    db: Db,
    enable_history: bool,
    formula_timeout_secs: u64,
}

impl ScoringService {
    pub fn new(db: Db, enable_history: bool) -> Self {
        Self {
            db,
            enable_history,
            formula_timeout_secs: DEFAULT_FORMULA_TIMEOUT_SECS,
        }
    }

    /// Compute one framework for one initiative. Writes the per-framework
    /// triple; with `activate` also copies it into the active fields.
    pub async fn score_initiative(
        &self,
        initiative_key: &str,
        framework: Framework,
        activate: bool,
    ) -> Result<ScoreResult> {
        let Some(initiative) = self.db.initiatives().find_by_key(initiative_key).await? else {
            anyhow::bail!("unknown initiative: {initiative_key}");
        };

        let result = self.compute_framework(&initiative, framework).await?;
        self.db
            .initiatives()
            .update_framework_scores(initiative_key, framework, &result.triple())
            .await?;

        if self.enable_history && result.is_scored() {
            let inputs_json = Value::Object(result.raw_inputs.clone()).to_string();
            self.db
                .scores()
                .append(initiative.id, framework, &result.triple(), Some(&inputs_json))
                .await?;
        }

        if activate {
            self.db
                .initiatives()
                .update_active_scores(initiative_key, &result.triple(), FLOW2_ACTIVATE)
                .await?;
        }
        Ok(result)
    }

    /// Compute RICE, WSJF, and (when enabled) MATH_MODEL for one
    /// initiative. Active fields are not touched.
    pub async fn score_initiative_all_frameworks(
        &self,
        initiative_key: &str,
    ) -> Result<Vec<(Framework, ScoreResult)>> {
        let Some(initiative) = self.db.initiatives().find_by_key(initiative_key).await? else {
            anyhow::bail!("unknown initiative: {initiative_key}");
        };

        let mut frameworks = vec![Framework::Rice, Framework::Wsjf];
        if initiative.use_math_model {
            frameworks.push(Framework::MathModel);
        }

        let mut results = Vec::new();
        for framework in frameworks {
            let result = self.compute_framework(&initiative, framework).await?;
            self.db
                .initiatives()
                .update_framework_scores(initiative_key, framework, &result.triple())
                .await?;
            if self.enable_history && result.is_scored() {
                let inputs_json = Value::Object(result.raw_inputs.clone()).to_string();
                self.db
                    .scores()
                    .append(initiative.id, framework, &result.triple(), Some(&inputs_json))
                    .await?;
            }
            results.push((framework, result));
        }
        Ok(results)
    }

    /// Copy the chosen framework's stored triple into the active fields.
    /// A framework with no stored scores clears the active fields.
    pub async fn activate_initiative_framework(
        &self,
        initiative_key: &str,
        framework: Framework,
    ) -> Result<ScoreTriple> {
        let Some(initiative) = self.db.initiatives().find_by_key(initiative_key).await? else {
            anyhow::bail!("unknown initiative: {initiative_key}");
        };

        let triple = initiative.framework_scores(framework);
        if triple.is_empty() {
            warn!("{initiative_key}: {framework:?} has no scores; clearing active fields");
        }
        self.db
            .initiatives()
            .update_active_scores(initiative_key, &triple, FLOW2_ACTIVATE)
            .await?;
        self.db
            .initiatives()
            .set_active_framework(initiative_key, Some(framework))
            .await?;
        Ok(triple)
    }

    /// Batch driver over every initiative.
    pub async fn compute_all_frameworks(&self) -> Result<BatchOutcome> {
        let keys: Vec<String> = self
            .db
            .initiatives()
            .list_all()
            .await?
            .into_iter()
            .map(|i| i.initiative_key)
            .collect();
        self.compute_for_keys(&keys).await
    }

    /// Batch driver over an explicit selection.
    pub async fn compute_for_initiatives(&self, keys: &[String]) -> Result<BatchOutcome> {
        self.compute_for_keys(keys).await
    }

    async fn compute_for_keys(&self, keys: &[String]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for key in keys {
            if self.db.initiatives().find_by_key(key).await?.is_none() {
                outcome.skipped_no_key += 1;
                continue;
            }
            match self.score_initiative_all_frameworks(key).await {
                Ok(results) => {
                    outcome.scored += 1;
                    for (framework, result) in results {
                        for warning in result.warnings {
                            outcome
                                .warnings
                                .push(format!("{key} {}: {warning}", framework.as_str()));
                        }
                    }
                }
                Err(err) => {
                    outcome.failed += 1;
                    outcome.warnings.push(format!("{key}: {err}"));
                }
            }
        }
        info!(
            "Scored {} initiatives ({} skipped, {} failed) [{}]",
            outcome.scored, outcome.skipped_no_key, outcome.failed, FLOW3_COMPUTE_ALL_FRAMEWORKS
        );
        Ok(outcome)
    }

    async fn compute_framework(
        &self,
        initiative: &Initiative,
        framework: Framework,
    ) -> Result<ScoreResult> {
        let mut inputs = ScoreInputs::from_initiative(initiative);

        if framework == Framework::MathModel {
            // Evaluate every owned model first, then pick the representative
            // and refresh the KPI contribution columns.
            let evaluation = evaluate_models(
                &self.db,
                &initiative.initiative_key,
                self.formula_timeout_secs,
            )
            .await?;

            let models = self
                .db
                .math_models()
                .list_for_initiative(&initiative.initiative_key)
                .await?;
            let star = self.db.metrics().active_north_star().await?;
            inputs.math_model_value =
                representative_model(&models, star.as_ref().map(|s| s.kpi_key.as_str()))
                    .and_then(|m| m.computed_score);

            let contribution = update_initiative_contributions(&self.db, &initiative.initiative_key)
                .await?;

            let mut result = engine_for(framework).compute(&inputs);
            result.warnings.extend(evaluation.warnings);
            if !contribution.invalid_kpis.is_empty() {
                result.warnings.push(format!(
                    "dropped kpi keys: {}",
                    contribution.invalid_kpis.join(", ")
                ));
            }
            return Ok(result);
        }

        Ok(engine_for(framework).compute(&inputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadmap_db::{MathModelFields, ParamFields};
    use roadmap_test_utils::{seed_initiative, seed_metric, InitiativeSeed};

    fn rice_seed() -> InitiativeSeed {
        InitiativeSeed {
            title: "Checkout".into(),
            rice: Some((10_000.0, 3.0, 0.7, 20.0)),
            wsjf: Some((8.0, 5.0, 2.0, 5.0)),
            active_framework: Some(Framework::Rice),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn scoring_leaves_active_fields_alone() {
        let db = Db::open_in_memory().await.unwrap();
        let key = seed_initiative(&db, &rice_seed()).await.unwrap();
        let service = ScoringService::new(db.clone(), false);

        service
            .score_initiative_all_frameworks(key.as_str())
            .await
            .unwrap();

        let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
        assert_eq!(row.rice_value_score, Some(21_000.0));
        assert_eq!(row.rice_effort_score, Some(20.0));
        assert_eq!(row.rice_overall_score, Some(1_050.0));
        assert_eq!(row.wsjf_value_score, Some(15.0));
        assert_eq!(row.wsjf_overall_score, Some(3.0));
        // MATH_MODEL not enabled, so its triple stays empty.
        assert_eq!(row.math_overall_score, None);
        // Active fields wait for activation.
        assert_eq!(row.value_score, None);
        assert_eq!(row.overall_score, None);
    }

    #[tokio::test]
    async fn activation_copies_the_stored_triple() {
        let db = Db::open_in_memory().await.unwrap();
        let key = seed_initiative(&db, &rice_seed()).await.unwrap();
        let service = ScoringService::new(db.clone(), false);

        service
            .score_initiative_all_frameworks(key.as_str())
            .await
            .unwrap();
        service
            .activate_initiative_framework(key.as_str(), Framework::Rice)
            .await
            .unwrap();

        let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
        assert_eq!(row.value_score, Some(21_000.0));
        assert_eq!(row.effort_score, Some(20.0));
        assert_eq!(row.overall_score, Some(1_050.0));
        assert_eq!(row.scoring_updated_source.as_deref(), Some("flow2.activate"));

        // Switching to a framework with no scores clears the active triple.
        db.initiatives()
            .update_framework_scores(key.as_str(), Framework::MathModel, &ScoreTriple::default())
            .await
            .unwrap();
        service
            .activate_initiative_framework(key.as_str(), Framework::MathModel)
            .await
            .unwrap();
        let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
        assert_eq!(row.value_score, None);
        assert_eq!(row.overall_score, None);
        assert_eq!(row.active_scoring_framework, Some(Framework::MathModel));
    }

    #[tokio::test]
    async fn rescoring_is_idempotent() {
        let db = Db::open_in_memory().await.unwrap();
        let key = seed_initiative(&db, &rice_seed()).await.unwrap();
        let service = ScoringService::new(db.clone(), false);

        service.score_initiative_all_frameworks(key.as_str()).await.unwrap();
        let first = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
        service.score_initiative_all_frameworks(key.as_str()).await.unwrap();
        let second = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();

        assert_eq!(first.rice_overall_score, second.rice_overall_score);
        assert_eq!(first.wsjf_overall_score, second.wsjf_overall_score);
    }

    #[tokio::test]
    async fn math_model_path_evaluates_and_aggregates() {
        let db = Db::open_in_memory().await.unwrap();
        seed_metric(&db, "revenue", roadmap_db::KpiLevel::NorthStar)
            .await
            .unwrap();
        let key = seed_initiative(
            &db,
            &InitiativeSeed {
                title: "Math".into(),
                use_math_model: true,
                effort_engineering_days: Some(10.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        db.math_models()
            .upsert(
                key.as_str(),
                "M1",
                &MathModelFields {
                    target_kpi_key: Some("revenue".to_string()),
                    formula_text: Some("uplift = reach * conversion\nvalue = uplift * 12".to_string()),
                    approved_by_user: Some(true),
                    is_primary: Some(true),
                    ..Default::default()
                },
                "test",
            )
            .await
            .unwrap();
        for (name, value) in [("reach", 1000.0), ("conversion", 0.02)] {
            db.params()
                .upsert(
                    key.as_str(),
                    Framework::MathModel,
                    name,
                    "M1",
                    &ParamFields {
                        value: Some(value),
                        approved: Some(true),
                        ..Default::default()
                    },
                    "test",
                )
                .await
                .unwrap();
        }

        let service = ScoringService::new(db.clone(), false);
        service.score_initiative_all_frameworks(key.as_str()).await.unwrap();

        let model = db.math_models().find(key.as_str(), "M1").await.unwrap().unwrap();
        assert_eq!(model.computed_score, Some(240.0));
        assert!(model.last_computed_at.is_some());

        let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
        assert_eq!(row.math_value_score, Some(240.0));
        assert_eq!(row.math_effort_score, Some(10.0));
        assert_eq!(row.math_overall_score, Some(24.0));
        let computed = roadmap_db::parse_kpi_map(row.kpi_contribution_computed_json.as_deref());
        assert_eq!(computed["revenue"], 240.0);
    }

    #[tokio::test]
    async fn division_by_zero_nulls_one_model_not_the_initiative() {
        let db = Db::open_in_memory().await.unwrap();
        let key = seed_initiative(
            &db,
            &InitiativeSeed {
                title: "Math".into(),
                use_math_model: true,
                effort_engineering_days: Some(10.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        for (name, formula) in [
            ("bad", "value = 1 / zero"),
            ("good", "value = 50"),
        ] {
            db.math_models()
                .upsert(
                    key.as_str(),
                    name,
                    &MathModelFields {
                        formula_text: Some(formula.to_string()),
                        approved_by_user: Some(true),
                        ..Default::default()
                    },
                    "test",
                )
                .await
                .unwrap();
        }
        db.params()
            .upsert(
                key.as_str(),
                Framework::MathModel,
                "zero",
                "bad",
                &ParamFields {
                    value: Some(0.0),
                    approved: Some(true),
                    ..Default::default()
                },
                "test",
            )
            .await
            .unwrap();

        let service = ScoringService::new(db.clone(), false);
        let results = service
            .score_initiative_all_frameworks(key.as_str())
            .await
            .unwrap();

        let bad = db.math_models().find(key.as_str(), "bad").await.unwrap().unwrap();
        assert_eq!(bad.computed_score, None);
        let good = db.math_models().find(key.as_str(), "good").await.unwrap().unwrap();
        assert_eq!(good.computed_score, Some(50.0));

        let math = results
            .iter()
            .find(|(f, _)| *f == Framework::MathModel)
            .map(|(_, r)| r)
            .unwrap();
        assert!(math.warnings.iter().any(|w| w.contains("bad")));
        // The good model still represents the initiative.
        assert_eq!(math.value_score, Some(50.0));
    }

    #[tokio::test]
    async fn batch_counts_unknown_keys() {
        let db = Db::open_in_memory().await.unwrap();
        let key = seed_initiative(&db, &rice_seed()).await.unwrap();
        let service = ScoringService::new(db.clone(), false);

        let outcome = service
            .compute_for_initiatives(&[key.as_str().to_string(), "INIT-999999".to_string()])
            .await
            .unwrap();
        assert_eq!(outcome.scored, 1);
        assert_eq!(outcome.skipped_no_key, 1);
    }

    #[tokio::test]
    async fn history_rows_append_when_enabled() {
        let db = Db::open_in_memory().await.unwrap();
        let key = seed_initiative(&db, &rice_seed()).await.unwrap();
        let service = ScoringService::new(db.clone(), true);

        service.score_initiative(key.as_str(), Framework::Rice, false).await.unwrap();
        service.score_initiative(key.as_str(), Framework::Rice, false).await.unwrap();

        let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
        let history = db.scores().list_for_initiative(row.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].inputs_json.is_some());
    }
}
