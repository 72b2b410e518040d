//! Embedded schema bootstrap.
//!
//! Executed at startup; every statement is idempotent. Timestamps are RFC
//! 3339 TEXT, JSON columns are TEXT, booleans are INTEGER 0/1.

use anyhow::Result;
use sqlx::{Pool, Sqlite};

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS initiatives (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        initiative_key TEXT NOT NULL UNIQUE,
        source_sheet_id TEXT,
        source_tab_name TEXT,
        source_row_number INTEGER,
        title TEXT NOT NULL,
        requesting_team TEXT,
        requester_name TEXT,
        requester_email TEXT,
        country TEXT,
        product_area TEXT,
        problem_statement TEXT,
        desired_outcome TEXT,
        hypothesis TEXT,
        customer_segment TEXT,
        initiative_type TEXT,
        strategic_theme TEXT,
        deadline_date TEXT,
        impact_low REAL,
        impact_expected REAL,
        impact_high REAL,
        effort_tshirt TEXT,
        effort_engineering_days REAL,
        risk_level TEXT,
        is_mandatory INTEGER NOT NULL DEFAULT 0,
        dependencies_text TEXT,
        status TEXT NOT NULL DEFAULT 'new',
        active_scoring_framework TEXT,
        use_math_model INTEGER NOT NULL DEFAULT 0,
        strategic_priority_coefficient REAL,
        linked_objectives TEXT,
        llm_notes TEXT,
        dependencies_keys_json TEXT,
        rice_reach REAL,
        rice_impact REAL,
        rice_confidence REAL,
        rice_effort REAL,
        wsjf_business_value REAL,
        wsjf_time_criticality REAL,
        wsjf_risk_reduction REAL,
        wsjf_job_size REAL,
        rice_value_score REAL,
        rice_effort_score REAL,
        rice_overall_score REAL,
        wsjf_value_score REAL,
        wsjf_effort_score REAL,
        wsjf_overall_score REAL,
        math_value_score REAL,
        math_effort_score REAL,
        math_overall_score REAL,
        value_score REAL,
        effort_score REAL,
        overall_score REAL,
        kpi_contribution_json TEXT,
        kpi_contribution_computed_json TEXT,
        kpi_contribution_source TEXT,
        metric_chain_json TEXT,
        is_optimization_candidate INTEGER NOT NULL DEFAULT 0,
        candidate_period_key TEXT,
        engineering_tokens INTEGER,
        department TEXT,
        category TEXT,
        program TEXT,
        product TEXT,
        segment TEXT,
        updated_source TEXT,
        updated_at TEXT,
        scoring_updated_source TEXT,
        scoring_updated_at TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_initiatives_source
        ON initiatives (source_sheet_id, source_tab_name, source_row_number)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_initiatives_candidates
        ON initiatives (is_optimization_candidate, candidate_period_key)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS initiative_math_models (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        initiative_key TEXT NOT NULL REFERENCES initiatives (initiative_key) ON DELETE CASCADE,
        model_name TEXT NOT NULL,
        target_kpi_key TEXT,
        metric_chain_text TEXT,
        metric_chain_json TEXT,
        formula_text TEXT,
        assumptions_text TEXT,
        is_primary INTEGER NOT NULL DEFAULT 0,
        approved_by_user INTEGER NOT NULL DEFAULT 0,
        suggested_by_llm INTEGER NOT NULL DEFAULT 0,
        computed_score REAL,
        last_computed_at TEXT,
        updated_source TEXT,
        updated_at TEXT,
        UNIQUE (initiative_key, model_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS initiative_params (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        initiative_key TEXT NOT NULL REFERENCES initiatives (initiative_key) ON DELETE CASCADE,
        framework TEXT NOT NULL,
        param_name TEXT NOT NULL,
        model_name TEXT NOT NULL DEFAULT '',
        value REAL,
        param_display TEXT,
        description TEXT,
        unit TEXT,
        min_value REAL,
        max_value REAL,
        source TEXT,
        approved INTEGER NOT NULL DEFAULT 0,
        is_auto_seeded INTEGER NOT NULL DEFAULT 0,
        notes TEXT,
        updated_source TEXT,
        updated_at TEXT,
        UNIQUE (initiative_key, framework, param_name, model_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS initiative_scores (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        initiative_id INTEGER NOT NULL REFERENCES initiatives (id) ON DELETE CASCADE,
        framework_name TEXT NOT NULL,
        value_score REAL,
        effort_score REAL,
        overall_score REAL,
        inputs_json TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS org_metric_configs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kpi_key TEXT NOT NULL UNIQUE,
        kpi_name TEXT NOT NULL,
        kpi_level TEXT NOT NULL,
        unit TEXT,
        description TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        updated_source TEXT,
        updated_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS optimization_scenarios (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        period_key TEXT,
        capacity_total_tokens INTEGER NOT NULL DEFAULT 0,
        objective_mode TEXT NOT NULL DEFAULT 'north_star',
        objective_weights_json TEXT,
        notes TEXT,
        updated_source TEXT,
        updated_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS optimization_constraint_sets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        scenario_name TEXT NOT NULL,
        set_name TEXT NOT NULL,
        compiled_json TEXT NOT NULL,
        messages_json TEXT,
        updated_source TEXT,
        updated_at TEXT,
        UNIQUE (scenario_name, set_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS optimization_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL UNIQUE,
        scenario_id INTEGER,
        constraint_set_id INTEGER,
        status TEXT NOT NULL DEFAULT 'queued',
        started_at TEXT,
        finished_at TEXT,
        inputs_snapshot_json TEXT,
        result_json TEXT,
        solver_name TEXT,
        solver_version TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS portfolios (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        optimization_run_id INTEGER NOT NULL REFERENCES optimization_runs (id) ON DELETE CASCADE,
        scenario_name TEXT NOT NULL,
        total_objective REAL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS portfolio_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        portfolio_id INTEGER NOT NULL REFERENCES portfolios (id) ON DELETE CASCADE,
        initiative_key TEXT NOT NULL,
        selected INTEGER NOT NULL DEFAULT 0,
        allocated_tokens INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS action_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL UNIQUE,
        action TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'queued',
        payload_json TEXT NOT NULL,
        result_json TEXT,
        error_text TEXT,
        requested_by_json TEXT,
        created_at TEXT NOT NULL,
        started_at TEXT,
        finished_at TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_action_runs_status
        ON action_runs (status, id)
    "#,
];

/// Create all tables and indexes if they do not exist yet.
pub async fn bootstrap(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        bootstrap(&pool).await.unwrap();
        bootstrap(&pool).await.unwrap();

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(count >= 10);
    }
}
