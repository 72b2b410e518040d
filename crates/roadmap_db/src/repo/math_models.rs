//! Math model and scoring parameter repositories.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::models::{Framework, InitiativeMathModel, InitiativeParam};

/// Writable columns of a math model row. `Some` writes, `None` keeps the
/// stored value, so LLM paths can touch only the LLM-owned columns.
#[derive(Debug, Clone, Default)]
pub struct MathModelFields {
    pub target_kpi_key: Option<String>,
    pub metric_chain_text: Option<String>,
    pub metric_chain_json: Option<String>,
    pub formula_text: Option<String>,
    pub assumptions_text: Option<String>,
    pub is_primary: Option<bool>,
    pub approved_by_user: Option<bool>,
    pub suggested_by_llm: Option<bool>,
}

pub struct MathModelRepo<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> MathModelRepo<'a> {
    pub fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn find(
        &self,
        initiative_key: &str,
        model_name: &str,
    ) -> Result<Option<InitiativeMathModel>> {
        let row = sqlx::query_as(
            "SELECT * FROM initiative_math_models WHERE initiative_key = ? AND model_name = ?",
        )
        .bind(initiative_key)
        .bind(model_name)
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_for_initiative(
        &self,
        initiative_key: &str,
    ) -> Result<Vec<InitiativeMathModel>> {
        let rows = sqlx::query_as(
            "SELECT * FROM initiative_math_models WHERE initiative_key = ? ORDER BY model_name",
        )
        .bind(initiative_key)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Upsert by `(initiative_key, model_name)`. Setting `is_primary = true`
    /// demotes every sibling so at most one primary survives.
    pub async fn upsert(
        &self,
        initiative_key: &str,
        model_name: &str,
        fields: &MathModelFields,
        provenance: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO initiative_math_models (
                initiative_key, model_name, target_kpi_key, metric_chain_text,
                metric_chain_json, formula_text, assumptions_text, is_primary,
                approved_by_user, suggested_by_llm, updated_source, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, COALESCE(?, 0), COALESCE(?, 0), COALESCE(?, 0), ?, ?)
            ON CONFLICT (initiative_key, model_name) DO UPDATE SET
                target_kpi_key = COALESCE(excluded.target_kpi_key, target_kpi_key),
                metric_chain_text = COALESCE(excluded.metric_chain_text, metric_chain_text),
                metric_chain_json = COALESCE(excluded.metric_chain_json, metric_chain_json),
                formula_text = COALESCE(excluded.formula_text, formula_text),
                assumptions_text = COALESCE(excluded.assumptions_text, assumptions_text),
                is_primary = COALESCE(?, is_primary),
                approved_by_user = COALESCE(?, approved_by_user),
                suggested_by_llm = COALESCE(?, suggested_by_llm),
                updated_source = excluded.updated_source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(initiative_key)
        .bind(model_name)
        .bind(&fields.target_kpi_key)
        .bind(&fields.metric_chain_text)
        .bind(&fields.metric_chain_json)
        .bind(&fields.formula_text)
        .bind(&fields.assumptions_text)
        .bind(fields.is_primary)
        .bind(fields.approved_by_user)
        .bind(fields.suggested_by_llm)
        .bind(provenance)
        .bind(&now)
        .bind(fields.is_primary)
        .bind(fields.approved_by_user)
        .bind(fields.suggested_by_llm)
        .execute(&mut *tx)
        .await?;

        if fields.is_primary == Some(true) {
            sqlx::query(
                r#"
                UPDATE initiative_math_models
                SET is_primary = 0
                WHERE initiative_key = ? AND model_name != ?
                "#,
            )
            .bind(initiative_key)
            .bind(model_name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Store an evaluation result; `None` clears a stale score after a
    /// formula failure.
    pub async fn set_computed(
        &self,
        model_id: i64,
        score: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE initiative_math_models SET computed_score = ?, last_computed_at = ? WHERE id = ?",
        )
        .bind(score)
        .bind(at.to_rfc3339())
        .bind(model_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}

/// Writable columns of a parameter row.
#[derive(Debug, Clone, Default)]
pub struct ParamFields {
    pub value: Option<f64>,
    pub param_display: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub source: Option<String>,
    pub approved: Option<bool>,
    pub notes: Option<String>,
}

pub struct ParamRepo<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> ParamRepo<'a> {
    pub fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn list_for(
        &self,
        initiative_key: &str,
        framework: Framework,
        model_name: &str,
    ) -> Result<Vec<InitiativeParam>> {
        let rows = sqlx::query_as(
            r#"
            SELECT * FROM initiative_params
            WHERE initiative_key = ? AND framework = ? AND model_name = ?
            ORDER BY param_name
            "#,
        )
        .bind(initiative_key)
        .bind(framework)
        .bind(model_name)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Approved parameters only: the eligibility gate for evaluation.
    pub async fn list_approved(
        &self,
        initiative_key: &str,
        framework: Framework,
        model_name: &str,
    ) -> Result<Vec<InitiativeParam>> {
        let rows = sqlx::query_as(
            r#"
            SELECT * FROM initiative_params
            WHERE initiative_key = ? AND framework = ? AND model_name = ? AND approved = 1
            ORDER BY param_name
            "#,
        )
        .bind(initiative_key)
        .bind(framework)
        .bind(model_name)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn upsert(
        &self,
        initiative_key: &str,
        framework: Framework,
        param_name: &str,
        model_name: &str,
        fields: &ParamFields,
        provenance: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO initiative_params (
                initiative_key, framework, param_name, model_name, value,
                param_display, description, unit, min_value, max_value, source,
                approved, is_auto_seeded, notes, updated_source, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(?, 0), 0, ?, ?, ?)
            ON CONFLICT (initiative_key, framework, param_name, model_name) DO UPDATE SET
                value = excluded.value,
                param_display = COALESCE(excluded.param_display, param_display),
                description = COALESCE(excluded.description, description),
                unit = COALESCE(excluded.unit, unit),
                min_value = COALESCE(excluded.min_value, min_value),
                max_value = COALESCE(excluded.max_value, max_value),
                source = COALESCE(excluded.source, source),
                approved = COALESCE(?, approved),
                notes = COALESCE(excluded.notes, notes),
                updated_source = excluded.updated_source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(initiative_key)
        .bind(framework)
        .bind(param_name)
        .bind(model_name)
        .bind(fields.value)
        .bind(&fields.param_display)
        .bind(&fields.description)
        .bind(&fields.unit)
        .bind(fields.min_value)
        .bind(fields.max_value)
        .bind(&fields.source)
        .bind(fields.approved)
        .bind(&fields.notes)
        .bind(provenance)
        .bind(Utc::now().to_rfc3339())
        .bind(fields.approved)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Seed a parameter row if missing; returns true when inserted. Seeded
    /// rows carry `is_auto_seeded = 1` and wait for a user to fill them.
    pub async fn seed_if_missing(
        &self,
        initiative_key: &str,
        framework: Framework,
        param_name: &str,
        model_name: &str,
        param_display: &str,
        source: &str,
        provenance: &str,
    ) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO initiative_params (
                initiative_key, framework, param_name, model_name,
                param_display, source, approved, is_auto_seeded,
                updated_source, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 0, 1, ?, ?)
            ON CONFLICT (initiative_key, framework, param_name, model_name) DO NOTHING
            "#,
        )
        .bind(initiative_key)
        .bind(framework)
        .bind(param_name)
        .bind(model_name)
        .bind(param_display)
        .bind(source)
        .bind(provenance)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntakeFields;
    use crate::Db;

    async fn db_with_initiative() -> (Db, String) {
        let db = Db::open_in_memory().await.unwrap();
        let repo = db.initiatives();
        let key = repo.next_key().await.unwrap();
        repo.create_from_intake(
            &key,
            "s",
            "t",
            2,
            &IntakeFields {
                title: "A".to_string(),
                ..Default::default()
            },
            "flow1.intake_sync",
        )
        .await
        .unwrap();
        (db, key.as_str().to_string())
    }

    #[tokio::test]
    async fn primary_flag_is_exclusive() {
        let (db, key) = db_with_initiative().await;
        let models = db.math_models();

        models
            .upsert(
                &key,
                "M1",
                &MathModelFields {
                    is_primary: Some(true),
                    ..Default::default()
                },
                "pm.save_selected",
            )
            .await
            .unwrap();
        models
            .upsert(
                &key,
                "M2",
                &MathModelFields {
                    is_primary: Some(true),
                    ..Default::default()
                },
                "pm.save_selected",
            )
            .await
            .unwrap();

        let rows = models.list_for_initiative(&key).await.unwrap();
        let primaries: Vec<_> = rows.iter().filter(|m| m.is_primary).collect();
        assert_eq!(primaries.len(), 1);
        assert_eq!(primaries[0].model_name, "M2");
    }

    #[tokio::test]
    async fn upsert_preserves_user_columns_when_absent() {
        let (db, key) = db_with_initiative().await;
        let models = db.math_models();

        models
            .upsert(
                &key,
                "M1",
                &MathModelFields {
                    formula_text: Some("value = a * b".to_string()),
                    approved_by_user: Some(true),
                    ..Default::default()
                },
                "pm.save_selected",
            )
            .await
            .unwrap();

        // An LLM write that only touches LLM-owned columns.
        models
            .upsert(
                &key,
                "M1",
                &MathModelFields {
                    assumptions_text: Some("assumes linear uplift".to_string()),
                    suggested_by_llm: Some(true),
                    ..Default::default()
                },
                "pm.suggest_math_model_llm",
            )
            .await
            .unwrap();

        let row = models.find(&key, "M1").await.unwrap().unwrap();
        assert_eq!(row.formula_text.as_deref(), Some("value = a * b"));
        assert!(row.approved_by_user);
        assert!(row.suggested_by_llm);
    }

    #[tokio::test]
    async fn params_upsert_and_approval_gate() {
        let (db, key) = db_with_initiative().await;
        let params = db.params();

        params
            .upsert(
                &key,
                Framework::MathModel,
                "reach",
                "M1",
                &ParamFields {
                    value: Some(1000.0),
                    approved: Some(true),
                    ..Default::default()
                },
                "pm.save_selected",
            )
            .await
            .unwrap();
        params
            .upsert(
                &key,
                Framework::MathModel,
                "conversion",
                "M1",
                &ParamFields {
                    value: Some(0.02),
                    ..Default::default()
                },
                "pm.save_selected",
            )
            .await
            .unwrap();

        let approved = params
            .list_approved(&key, Framework::MathModel, "M1")
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].param_name, "reach");
    }

    #[tokio::test]
    async fn seeding_never_overwrites() {
        let (db, key) = db_with_initiative().await;
        let params = db.params();

        let inserted = params
            .seed_if_missing(
                &key,
                Framework::MathModel,
                "reach",
                "M1",
                "Reach",
                "formula",
                "pm.seed_math_params",
            )
            .await
            .unwrap();
        assert!(inserted);

        params
            .upsert(
                &key,
                Framework::MathModel,
                "reach",
                "M1",
                &ParamFields {
                    value: Some(5.0),
                    ..Default::default()
                },
                "pm.save_selected",
            )
            .await
            .unwrap();

        let again = params
            .seed_if_missing(
                &key,
                Framework::MathModel,
                "reach",
                "M1",
                "Reach",
                "formula",
                "pm.seed_math_params",
            )
            .await
            .unwrap();
        assert!(!again);

        let rows = params.list_for(&key, Framework::MathModel, "M1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, Some(5.0));
    }
}
