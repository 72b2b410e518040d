//! Scenario, constraint set, run, and portfolio repositories.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::models::{
    ConstraintSetRow, ObjectiveMode, OptimizationRun, OptimizationScenario, Portfolio,
    PortfolioItem, RunState,
};

#[derive(Debug, Clone)]
pub struct ScenarioFields {
    pub period_key: Option<String>,
    pub capacity_total_tokens: i64,
    pub objective_mode: ObjectiveMode,
    pub objective_weights_json: Option<String>,
    pub notes: Option<String>,
}

pub struct OptimizationRepo<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> OptimizationRepo<'a> {
    pub fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    pub async fn upsert_scenario(
        &self,
        name: &str,
        fields: &ScenarioFields,
        provenance: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO optimization_scenarios (
                name, period_key, capacity_total_tokens, objective_mode,
                objective_weights_json, notes, updated_source, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                period_key = excluded.period_key,
                capacity_total_tokens = excluded.capacity_total_tokens,
                objective_mode = excluded.objective_mode,
                objective_weights_json = excluded.objective_weights_json,
                notes = excluded.notes,
                updated_source = excluded.updated_source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(&fields.period_key)
        .bind(fields.capacity_total_tokens)
        .bind(fields.objective_mode)
        .bind(&fields.objective_weights_json)
        .bind(&fields.notes)
        .bind(provenance)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_scenario(&self, name: &str) -> Result<Option<OptimizationScenario>> {
        let row = sqlx::query_as("SELECT * FROM optimization_scenarios WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool)
            .await?;
        Ok(row)
    }

    // ------------------------------------------------------------------
    // Compiled constraint sets
    // ------------------------------------------------------------------

    pub async fn save_constraint_set(
        &self,
        scenario_name: &str,
        set_name: &str,
        compiled_json: &str,
        messages_json: Option<&str>,
        provenance: &str,
    ) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO optimization_constraint_sets (
                scenario_name, set_name, compiled_json, messages_json,
                updated_source, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (scenario_name, set_name) DO UPDATE SET
                compiled_json = excluded.compiled_json,
                messages_json = excluded.messages_json,
                updated_source = excluded.updated_source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(scenario_name)
        .bind(set_name)
        .bind(compiled_json)
        .bind(messages_json)
        .bind(provenance)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM optimization_constraint_sets WHERE scenario_name = ? AND set_name = ?",
        )
        .bind(scenario_name)
        .bind(set_name)
        .fetch_one(self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_constraint_set(
        &self,
        scenario_name: &str,
        set_name: &str,
    ) -> Result<Option<ConstraintSetRow>> {
        let row = sqlx::query_as(
            "SELECT * FROM optimization_constraint_sets WHERE scenario_name = ? AND set_name = ?",
        )
        .bind(scenario_name)
        .bind(set_name)
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    pub async fn create_run(
        &self,
        run_id: &str,
        scenario_id: Option<i64>,
        constraint_set_id: Option<i64>,
        solver_name: &str,
        solver_version: &str,
    ) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO optimization_runs (
                run_id, scenario_id, constraint_set_id, status, started_at,
                solver_name, solver_version
            )
            VALUES (?, ?, ?, 'running', ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(scenario_id)
        .bind(constraint_set_id)
        .bind(Utc::now().to_rfc3339())
        .bind(solver_name)
        .bind(solver_version)
        .execute(self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM optimization_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_one(self.pool)
            .await?;
        Ok(id)
    }

    pub async fn snapshot_inputs(&self, run_id: &str, inputs_snapshot_json: &str) -> Result<()> {
        sqlx::query("UPDATE optimization_runs SET inputs_snapshot_json = ? WHERE run_id = ?")
            .bind(inputs_snapshot_json)
            .bind(run_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn finish_run(
        &self,
        run_id: &str,
        status: RunState,
        result_json: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE optimization_runs
            SET status = ?, finished_at = ?, result_json = ?
            WHERE run_id = ?
            "#,
        )
        .bind(status)
        .bind(Utc::now().to_rfc3339())
        .bind(result_json)
        .bind(run_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<OptimizationRun>> {
        let row = sqlx::query_as("SELECT * FROM optimization_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row)
    }

    // ------------------------------------------------------------------
    // Portfolios
    // ------------------------------------------------------------------

    /// Persist the selection result of a run in one transaction.
    pub async fn insert_portfolio(
        &self,
        optimization_run_id: i64,
        scenario_name: &str,
        total_objective: Option<f64>,
        items: &[(String, bool, i64)],
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO portfolios (optimization_run_id, scenario_name, total_objective, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(optimization_run_id)
        .bind(scenario_name)
        .bind(total_objective)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let portfolio_id: i64 = sqlx::query_scalar("SELECT last_insert_rowid()")
            .fetch_one(&mut *tx)
            .await?;

        for (initiative_key, selected, allocated_tokens) in items {
            sqlx::query(
                r#"
                INSERT INTO portfolio_items (portfolio_id, initiative_key, selected, allocated_tokens)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(portfolio_id)
            .bind(initiative_key)
            .bind(selected)
            .bind(allocated_tokens)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(portfolio_id)
    }

    pub async fn get_portfolio(&self, portfolio_id: i64) -> Result<Option<Portfolio>> {
        let row = sqlx::query_as("SELECT * FROM portfolios WHERE id = ?")
            .bind(portfolio_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_portfolio_items(&self, portfolio_id: i64) -> Result<Vec<PortfolioItem>> {
        let rows = sqlx::query_as(
            "SELECT * FROM portfolio_items WHERE portfolio_id = ? ORDER BY initiative_key",
        )
        .bind(portfolio_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Stale `running` optimization rows older than the horizon.
    pub async fn fail_stuck_runs(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let swept = sqlx::query(
            r#"
            UPDATE optimization_runs
            SET status = 'failed', finished_at = ?
            WHERE status = 'running' AND started_at < ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(older_than.to_rfc3339())
        .execute(self.pool)
        .await?
        .rows_affected();
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn scenario_upsert_round_trips() {
        let db = Db::open_in_memory().await.unwrap();
        let repo = db.optimization();

        repo.upsert_scenario(
            "Q1-Growth",
            &ScenarioFields {
                period_key: Some("2026-Q1".to_string()),
                capacity_total_tokens: 20,
                objective_mode: ObjectiveMode::NorthStar,
                objective_weights_json: None,
                notes: None,
            },
            "pm.save_selected",
        )
        .await
        .unwrap();

        let scenario = repo.get_scenario("Q1-Growth").await.unwrap().unwrap();
        assert_eq!(scenario.capacity_total_tokens, 20);
        assert_eq!(scenario.objective_mode, ObjectiveMode::NorthStar);
    }

    #[tokio::test]
    async fn run_lifecycle_and_portfolio() {
        let db = Db::open_in_memory().await.unwrap();
        let repo = db.optimization();

        let run_db_id = repo
            .create_run("run_x", None, None, "branch_and_bound", "0.1.0")
            .await
            .unwrap();
        repo.snapshot_inputs("run_x", "{}").await.unwrap();
        repo.finish_run("run_x", RunState::Succeeded, r#"{"status":"optimal"}"#)
            .await
            .unwrap();

        let run = repo.get_run("run_x").await.unwrap().unwrap();
        assert_eq!(run.status, RunState::Succeeded);
        assert!(run.finished_at.is_some());

        let portfolio_id = repo
            .insert_portfolio(
                run_db_id,
                "Q1-Growth",
                Some(11.0),
                &[
                    ("INIT-000001".to_string(), true, 10),
                    ("INIT-000002".to_string(), false, 0),
                ],
            )
            .await
            .unwrap();
        let items = repo.list_portfolio_items(portfolio_id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].selected);
        assert_eq!(items[0].allocated_tokens, 10);
    }
}
