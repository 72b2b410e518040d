//! Append-only score history.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::{Framework, InitiativeScore, ScoreTriple};

pub struct ScoreHistoryRepo<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> ScoreHistoryRepo<'a> {
    pub fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        initiative_id: i64,
        framework: Framework,
        triple: &ScoreTriple,
        inputs_json: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO initiative_scores (
                initiative_id, framework_name, value_score, effort_score,
                overall_score, inputs_json, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(initiative_id)
        .bind(framework)
        .bind(triple.value_score)
        .bind(triple.effort_score)
        .bind(triple.overall_score)
        .bind(inputs_json)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_initiative(&self, initiative_id: i64) -> Result<Vec<InitiativeScore>> {
        let rows = sqlx::query_as(
            "SELECT * FROM initiative_scores WHERE initiative_id = ? ORDER BY id",
        )
        .bind(initiative_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }
}
