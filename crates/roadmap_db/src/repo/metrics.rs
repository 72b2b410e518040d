//! KPI registry repository.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::{KpiLevel, OrgMetricConfig};

#[derive(Debug, Clone)]
pub struct MetricFields {
    pub kpi_name: String,
    pub kpi_level: KpiLevel,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
}

pub struct MetricConfigRepo<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> MetricConfigRepo<'a> {
    pub fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, kpi_key: &str, fields: &MetricFields, provenance: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO org_metric_configs (
                kpi_key, kpi_name, kpi_level, unit, description, is_active,
                updated_source, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (kpi_key) DO UPDATE SET
                kpi_name = excluded.kpi_name,
                kpi_level = excluded.kpi_level,
                unit = excluded.unit,
                description = excluded.description,
                is_active = excluded.is_active,
                updated_source = excluded.updated_source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(kpi_key)
        .bind(&fields.kpi_name)
        .bind(fields.kpi_level)
        .bind(&fields.unit)
        .bind(&fields.description)
        .bind(fields.is_active)
        .bind(provenance)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, kpi_key: &str) -> Result<Option<OrgMetricConfig>> {
        let row = sqlx::query_as("SELECT * FROM org_metric_configs WHERE kpi_key = ?")
            .bind(kpi_key)
            .fetch_optional(self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_active(&self) -> Result<Vec<OrgMetricConfig>> {
        let rows =
            sqlx::query_as("SELECT * FROM org_metric_configs WHERE is_active = 1 ORDER BY kpi_key")
                .fetch_all(self.pool)
                .await?;
        Ok(rows)
    }

    /// The single active north-star KPI, if configured.
    pub async fn active_north_star(&self) -> Result<Option<OrgMetricConfig>> {
        let row = sqlx::query_as(
            r#"
            SELECT * FROM org_metric_configs
            WHERE is_active = 1 AND kpi_level = 'north_star'
            ORDER BY kpi_key
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }

    /// Registry invariant: at most one active north-star row.
    pub async fn count_active_north_star(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM org_metric_configs WHERE is_active = 1 AND kpi_level = 'north_star'",
        )
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    fn metric(name: &str, level: KpiLevel, active: bool) -> MetricFields {
        MetricFields {
            kpi_name: name.to_string(),
            kpi_level: level,
            unit: None,
            description: None,
            is_active: active,
        }
    }

    #[tokio::test]
    async fn north_star_lookup_and_invariant_count() {
        let db = Db::open_in_memory().await.unwrap();
        let repo = db.metrics();

        repo.upsert("revenue", &metric("Revenue", KpiLevel::NorthStar, true), "t")
            .await
            .unwrap();
        repo.upsert(
            "user_retention",
            &metric("Retention", KpiLevel::Strategic, true),
            "t",
        )
        .await
        .unwrap();

        let star = repo.active_north_star().await.unwrap().unwrap();
        assert_eq!(star.kpi_key, "revenue");
        assert_eq!(repo.count_active_north_star().await.unwrap(), 1);

        // Deactivating the star leaves no active north-star.
        repo.upsert("revenue", &metric("Revenue", KpiLevel::NorthStar, false), "t")
            .await
            .unwrap();
        assert!(repo.active_north_star().await.unwrap().is_none());
    }
}
