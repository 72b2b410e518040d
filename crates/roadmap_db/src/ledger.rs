//! Action execution ledger.
//!
//! Claiming is atomic across worker processes: the claim transaction selects
//! the oldest queued row, then flips it to `running` guarded by
//! `AND status = 'queued'`. Zero rows affected means another worker won the
//! race and the claimer walks away empty-handed.

use anyhow::Result;
use chrono::{DateTime, Utc};
use roadmap_ids::ActionRunId;
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::models::ActionRun;

#[derive(Clone)]
pub struct ActionLedger {
    pool: Pool<Sqlite>,
}

impl ActionLedger {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Insert a freshly enqueued run.
    pub async fn enqueue(
        &self,
        run_id: &ActionRunId,
        action: &str,
        payload_json: &str,
        requested_by_json: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO action_runs (run_id, action, status, payload_json, requested_by_json, created_at)
            VALUES (?, ?, 'queued', ?, ?, ?)
            "#,
        )
        .bind(run_id.as_str())
        .bind(action)
        .bind(payload_json)
        .bind(requested_by_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!("Enqueued {}: {}", run_id, action);
        Ok(())
    }

    /// Atomically claim the oldest queued run, flipping it to `running`.
    ///
    /// Returns `None` when the queue is empty or another worker claimed the
    /// candidate row first.
    pub async fn claim_next(&self) -> Result<Option<ActionRun>> {
        let mut tx = self.pool.begin().await?;

        let run_id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT run_id FROM action_runs
            WHERE status = 'queued'
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(run_id) = run_id else {
            tx.commit().await?;
            return Ok(None);
        };

        let now = Utc::now().to_rfc3339();
        let rows_affected = sqlx::query(
            r#"
            UPDATE action_runs
            SET status = 'running',
                started_at = ?
            WHERE run_id = ? AND status = 'queued'
            "#,
        )
        .bind(&now)
        .bind(&run_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Another worker claimed it between the select and the update.
            tx.commit().await?;
            return Ok(None);
        }

        let run: ActionRun = sqlx::query_as("SELECT * FROM action_runs WHERE run_id = ?")
            .bind(&run_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Claimed {}: {}", run.run_id, run.action);
        Ok(Some(run))
    }

    /// Mark a run as succeeded with its result.
    pub async fn finish_success(&self, run_id: &str, result_json: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE action_runs
            SET status = 'succeeded',
                finished_at = ?,
                result_json = ?
            WHERE run_id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(result_json)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        info!("Run {} succeeded", run_id);
        Ok(())
    }

    /// Mark a run as failed, capturing the error and any partial result.
    pub async fn finish_failure(
        &self,
        run_id: &str,
        error_text: &str,
        partial_result_json: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE action_runs
            SET status = 'failed',
                finished_at = ?,
                error_text = ?,
                result_json = COALESCE(?, result_json)
            WHERE run_id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(error_text)
        .bind(partial_result_json)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        info!("Run {} failed: {}", run_id, error_text);
        Ok(())
    }

    /// Fetch one run by id.
    pub async fn get(&self, run_id: &str) -> Result<Option<ActionRun>> {
        let run = sqlx::query_as("SELECT * FROM action_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    /// Ledger counters for operational visibility.
    pub async fn stats(&self) -> Result<LedgerStats> {
        let stats: LedgerStats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'queued') as queued,
                COUNT(*) FILTER (WHERE status = 'running') as running,
                COUNT(*) FILTER (WHERE status = 'succeeded') as succeeded,
                COUNT(*) FILTER (WHERE status = 'failed') as failed
            FROM action_runs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    /// Sweep `running` rows whose claim is older than the horizon, marking
    /// them failed. Intended for an external sweeper cadence.
    pub async fn requeue_stuck(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let swept = sqlx::query(
            r#"
            UPDATE action_runs
            SET status = 'failed',
                finished_at = ?,
                error_text = 'worker lost: run exceeded the staleness horizon'
            WHERE status = 'running' AND started_at < ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(older_than.to_rfc3339())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if swept > 0 {
            info!("Swept {} stuck runs", swept);
        }
        Ok(swept)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct LedgerStats {
    pub queued: i32,
    pub running: i32,
    pub succeeded: i32,
    pub failed: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunState;
    use crate::Db;
    use chrono::Duration;

    async fn ledger() -> ActionLedger {
        Db::open_in_memory().await.unwrap().ledger()
    }

    fn mint() -> ActionRunId {
        ActionRunId::mint(Utc::now())
    }

    #[tokio::test]
    async fn claim_on_empty_ledger_returns_none() {
        let ledger = ledger().await;
        assert!(ledger.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_is_fifo_and_single_winner() {
        let ledger = ledger().await;
        let first = mint();
        let second = mint();
        ledger
            .enqueue(&first, "pm.backlog_sync", "{}", None)
            .await
            .unwrap();
        ledger
            .enqueue(&second, "pm.score_selected", "{}", None)
            .await
            .unwrap();

        let claimed = ledger.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.run_id, first.as_str());
        assert_eq!(claimed.status, RunState::Running);
        assert!(claimed.started_at.is_some());

        // The same row can never be claimed twice.
        let next = ledger.claim_next().await.unwrap().unwrap();
        assert_eq!(next.run_id, second.as_str());
        assert!(ledger.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_states_capture_result_and_error() {
        let ledger = ledger().await;
        let ok = mint();
        let bad = mint();
        ledger.enqueue(&ok, "a", "{}", None).await.unwrap();
        ledger.enqueue(&bad, "b", "{}", None).await.unwrap();
        ledger.claim_next().await.unwrap().unwrap();
        ledger.claim_next().await.unwrap().unwrap();

        ledger
            .finish_success(ok.as_str(), r#"{"saved_count": 2}"#)
            .await
            .unwrap();
        ledger
            .finish_failure(bad.as_str(), "boom", Some(r#"{"saved_count": 1}"#))
            .await
            .unwrap();

        let ok_row = ledger.get(ok.as_str()).await.unwrap().unwrap();
        assert_eq!(ok_row.status, RunState::Succeeded);
        assert!(ok_row.finished_at.is_some());

        let bad_row = ledger.get(bad.as_str()).await.unwrap().unwrap();
        assert_eq!(bad_row.status, RunState::Failed);
        assert_eq!(bad_row.error_text.as_deref(), Some("boom"));
        assert!(bad_row.result_json.is_some());

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test]
    async fn stuck_runs_are_swept() {
        let ledger = ledger().await;
        let run = mint();
        ledger.enqueue(&run, "a", "{}", None).await.unwrap();
        ledger.claim_next().await.unwrap().unwrap();

        // Horizon in the future: the running row is older than it.
        let swept = ledger
            .requeue_stuck(Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(swept, 1);
        let row = ledger.get(run.as_str()).await.unwrap().unwrap();
        assert_eq!(row.status, RunState::Failed);
    }
}
