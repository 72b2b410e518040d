//! Initiative repository.

use anyhow::Result;
use chrono::Utc;
use roadmap_ids::InitiativeKey;
use sqlx::{Pool, QueryBuilder, Sqlite};

use crate::models::{
    CentralFields, ContributionSource, Framework, Initiative, IntakeFields, ScoreTriple,
    ScoringInputFields,
};

pub struct InitiativeRepo<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> InitiativeRepo<'a> {
    pub fn new(pool: &'a Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Next unassigned business key: one past the highest stored sequence.
    pub async fn next_key(&self) -> Result<InitiativeKey> {
        let max_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(CAST(SUBSTR(initiative_key, 6) AS INTEGER)), 0) FROM initiatives",
        )
        .fetch_one(self.pool)
        .await?;
        Ok(InitiativeKey::from_sequence(max_seq as u64 + 1))
    }

    pub async fn find_by_key(&self, key: &str) -> Result<Option<Initiative>> {
        let row = sqlx::query_as("SELECT * FROM initiatives WHERE initiative_key = ?")
            .bind(key)
            .fetch_optional(self.pool)
            .await?;
        Ok(row)
    }

    /// Source-position lookup used by intake before a key is assigned.
    pub async fn find_by_source(
        &self,
        sheet_id: &str,
        tab_name: &str,
        row_number: i64,
    ) -> Result<Option<Initiative>> {
        let row = sqlx::query_as(
            r#"
            SELECT * FROM initiatives
            WHERE source_sheet_id = ? AND source_tab_name = ? AND source_row_number = ?
            "#,
        )
        .bind(sheet_id)
        .bind(tab_name)
        .bind(row_number)
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_all(&self) -> Result<Vec<Initiative>> {
        let rows = sqlx::query_as("SELECT * FROM initiatives ORDER BY initiative_key")
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn list_by_keys(&self, keys: &[String]) -> Result<Vec<Initiative>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM initiatives WHERE initiative_key IN (");
        let mut separated = builder.separated(", ");
        for key in keys {
            separated.push_bind(key);
        }
        separated.push_unseparated(") ORDER BY initiative_key");
        let rows = builder.build_query_as().fetch_all(self.pool).await?;
        Ok(rows)
    }

    /// Optimization candidates for a scenario period. A `None` period
    /// matches candidates with no period key.
    pub async fn list_candidates(&self, period_key: Option<&str>) -> Result<Vec<Initiative>> {
        let rows = match period_key {
            Some(period) => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM initiatives
                    WHERE is_optimization_candidate = 1 AND candidate_period_key = ?
                    ORDER BY initiative_key
                    "#,
                )
                .bind(period)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM initiatives
                    WHERE is_optimization_candidate = 1
                    ORDER BY initiative_key
                    "#,
                )
                .fetch_all(self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// Create a new initiative from intake with a pre-assigned key.
    pub async fn create_from_intake(
        &self,
        key: &InitiativeKey,
        source_sheet_id: &str,
        source_tab_name: &str,
        source_row_number: i64,
        fields: &IntakeFields,
        provenance: &str,
    ) -> Result<Initiative> {
        let status = fields
            .status
            .filter(|s| s.intake_writable())
            .unwrap_or(crate::models::InitiativeStatus::New);
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO initiatives (
                initiative_key, source_sheet_id, source_tab_name, source_row_number,
                title, requesting_team, requester_name, requester_email, country,
                product_area, problem_statement, desired_outcome, hypothesis,
                customer_segment, initiative_type, strategic_theme, deadline_date,
                impact_low, impact_expected, impact_high, effort_tshirt,
                effort_engineering_days, risk_level, is_mandatory, dependencies_text,
                status, updated_source, updated_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(key.as_str())
        .bind(source_sheet_id)
        .bind(source_tab_name)
        .bind(source_row_number)
        .bind(&fields.title)
        .bind(&fields.requesting_team)
        .bind(&fields.requester_name)
        .bind(&fields.requester_email)
        .bind(&fields.country)
        .bind(&fields.product_area)
        .bind(&fields.problem_statement)
        .bind(&fields.desired_outcome)
        .bind(&fields.hypothesis)
        .bind(&fields.customer_segment)
        .bind(&fields.initiative_type)
        .bind(&fields.strategic_theme)
        .bind(fields.deadline_date)
        .bind(fields.impact_low)
        .bind(fields.impact_expected)
        .bind(fields.impact_high)
        .bind(&fields.effort_tshirt)
        .bind(fields.effort_engineering_days)
        .bind(&fields.risk_level)
        .bind(fields.is_mandatory)
        .bind(&fields.dependencies_text)
        .bind(status)
        .bind(provenance)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await?;

        let created = self
            .find_by_key(key.as_str())
            .await?
            .ok_or_else(|| anyhow::anyhow!("initiative {key} vanished after insert"))?;
        Ok(created)
    }

    /// Rewrite the intake-owned column group. Status is honored only inside
    /// the intake-writable subset; anything else keeps the stored value.
    pub async fn update_intake_fields(
        &self,
        key: &str,
        fields: &IntakeFields,
        provenance: &str,
    ) -> Result<()> {
        let status = fields.status.filter(|s| s.intake_writable());
        sqlx::query(
            r#"
            UPDATE initiatives SET
                title = ?,
                requesting_team = ?, requester_name = ?, requester_email = ?,
                country = ?, product_area = ?, problem_statement = ?,
                desired_outcome = ?, hypothesis = ?, customer_segment = ?,
                initiative_type = ?, strategic_theme = ?, deadline_date = ?,
                impact_low = ?, impact_expected = ?, impact_high = ?,
                effort_tshirt = ?, effort_engineering_days = ?, risk_level = ?,
                is_mandatory = ?, dependencies_text = ?,
                status = COALESCE(?, status),
                updated_source = ?, updated_at = ?
            WHERE initiative_key = ?
            "#,
        )
        .bind(&fields.title)
        .bind(&fields.requesting_team)
        .bind(&fields.requester_name)
        .bind(&fields.requester_email)
        .bind(&fields.country)
        .bind(&fields.product_area)
        .bind(&fields.problem_statement)
        .bind(&fields.desired_outcome)
        .bind(&fields.hypothesis)
        .bind(&fields.customer_segment)
        .bind(&fields.initiative_type)
        .bind(&fields.strategic_theme)
        .bind(fields.deadline_date)
        .bind(fields.impact_low)
        .bind(fields.impact_expected)
        .bind(fields.impact_high)
        .bind(&fields.effort_tshirt)
        .bind(fields.effort_engineering_days)
        .bind(&fields.risk_level)
        .bind(fields.is_mandatory)
        .bind(&fields.dependencies_text)
        .bind(status)
        .bind(provenance)
        .bind(Utc::now().to_rfc3339())
        .bind(key)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Write the central-editable column group. Absent fields keep their
    /// stored values; this path is not a strong sync.
    pub async fn update_central_fields(
        &self,
        key: &str,
        fields: &CentralFields,
        provenance: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE initiatives SET
                status = COALESCE(?, status),
                active_scoring_framework = COALESCE(?, active_scoring_framework),
                use_math_model = COALESCE(?, use_math_model),
                strategic_priority_coefficient = COALESCE(?, strategic_priority_coefficient),
                impact_expected = COALESCE(?, impact_expected),
                effort_engineering_days = COALESCE(?, effort_engineering_days),
                linked_objectives = COALESCE(?, linked_objectives),
                llm_notes = COALESCE(?, llm_notes),
                dependencies_keys_json = COALESCE(?, dependencies_keys_json),
                is_optimization_candidate = COALESCE(?, is_optimization_candidate),
                candidate_period_key = COALESCE(?, candidate_period_key),
                engineering_tokens = COALESCE(?, engineering_tokens),
                department = COALESCE(?, department),
                category = COALESCE(?, category),
                program = COALESCE(?, program),
                product = COALESCE(?, product),
                segment = COALESCE(?, segment),
                updated_source = ?, updated_at = ?
            WHERE initiative_key = ?
            "#,
        )
        .bind(fields.status)
        .bind(fields.active_scoring_framework)
        .bind(fields.use_math_model)
        .bind(fields.strategic_priority_coefficient)
        .bind(fields.impact_expected)
        .bind(fields.effort_engineering_days)
        .bind(&fields.linked_objectives)
        .bind(&fields.llm_notes)
        .bind(&fields.dependencies_keys_json)
        .bind(fields.is_optimization_candidate)
        .bind(&fields.candidate_period_key)
        .bind(fields.engineering_tokens)
        .bind(&fields.department)
        .bind(&fields.category)
        .bind(&fields.program)
        .bind(&fields.product)
        .bind(&fields.segment)
        .bind(provenance)
        .bind(Utc::now().to_rfc3339())
        .bind(key)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Strong sync of the Scoring_Inputs group: every column is written
    /// as-is, so a blank sheet cell clears the stored value.
    pub async fn update_scoring_inputs(
        &self,
        key: &str,
        fields: &ScoringInputFields,
        provenance: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE initiatives SET
                rice_reach = ?, rice_impact = ?, rice_confidence = ?, rice_effort = ?,
                wsjf_business_value = ?, wsjf_time_criticality = ?,
                wsjf_risk_reduction = ?, wsjf_job_size = ?,
                active_scoring_framework = ?,
                use_math_model = COALESCE(?, use_math_model),
                strategic_priority_coefficient = ?,
                scoring_updated_source = ?, scoring_updated_at = ?
            WHERE initiative_key = ?
            "#,
        )
        .bind(fields.rice_reach)
        .bind(fields.rice_impact)
        .bind(fields.rice_confidence)
        .bind(fields.rice_effort)
        .bind(fields.wsjf_business_value)
        .bind(fields.wsjf_time_criticality)
        .bind(fields.wsjf_risk_reduction)
        .bind(fields.wsjf_job_size)
        .bind(fields.active_scoring_framework)
        .bind(fields.use_math_model)
        .bind(fields.strategic_priority_coefficient)
        .bind(provenance)
        .bind(Utc::now().to_rfc3339())
        .bind(key)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Write one framework's isolated score triple. Only compute paths for
    /// that framework call this.
    pub async fn update_framework_scores(
        &self,
        key: &str,
        framework: Framework,
        triple: &ScoreTriple,
    ) -> Result<()> {
        let prefix = framework.column_prefix();
        let sql = format!(
            r#"
            UPDATE initiatives SET
                {prefix}_value_score = ?,
                {prefix}_effort_score = ?,
                {prefix}_overall_score = ?
            WHERE initiative_key = ?
            "#
        );
        sqlx::query(&sql)
            .bind(triple.value_score)
            .bind(triple.effort_score)
            .bind(triple.overall_score)
            .bind(key)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Copy a triple into the active score fields. Only activation calls
    /// this; an empty triple clears the active fields.
    pub async fn update_active_scores(
        &self,
        key: &str,
        triple: &ScoreTriple,
        provenance: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE initiatives SET
                value_score = ?, effort_score = ?, overall_score = ?,
                scoring_updated_source = ?, scoring_updated_at = ?
            WHERE initiative_key = ?
            "#,
        )
        .bind(triple.value_score)
        .bind(triple.effort_score)
        .bind(triple.overall_score)
        .bind(provenance)
        .bind(Utc::now().to_rfc3339())
        .bind(key)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Record which framework is active without recomputing anything.
    pub async fn set_active_framework(
        &self,
        key: &str,
        framework: Option<Framework>,
    ) -> Result<()> {
        sqlx::query("UPDATE initiatives SET active_scoring_framework = ? WHERE initiative_key = ?")
            .bind(framework)
            .bind(key)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Overwrite the system-computed KPI contribution snapshot.
    pub async fn update_kpi_computed(&self, key: &str, computed_json: &str) -> Result<()> {
        sqlx::query(
            "UPDATE initiatives SET kpi_contribution_computed_json = ? WHERE initiative_key = ?",
        )
        .bind(computed_json)
        .bind(key)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Set the active KPI contribution map and its source. `None, None`
    /// unlocks the row.
    pub async fn update_kpi_active(
        &self,
        key: &str,
        active_json: Option<&str>,
        source: Option<ContributionSource>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE initiatives SET
                kpi_contribution_json = ?, kpi_contribution_source = ?
            WHERE initiative_key = ?
            "#,
        )
        .bind(active_json)
        .bind(source)
        .bind(key)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Parse-and-store the metric chain for an initiative.
    pub async fn update_metric_chain(&self, key: &str, chain_json: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE initiatives SET metric_chain_json = ? WHERE initiative_key = ?")
            .bind(chain_json)
            .bind(key)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InitiativeStatus;
    use crate::Db;

    fn intake(title: &str) -> IntakeFields {
        IntakeFields {
            title: title.to_string(),
            country: Some("UK".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn keys_are_sequential() {
        let db = Db::open_in_memory().await.unwrap();
        let repo = db.initiatives();
        assert_eq!(repo.next_key().await.unwrap().as_str(), "INIT-000001");

        let key = repo.next_key().await.unwrap();
        repo.create_from_intake(&key, "sheet", "Marketing_EMEA", 5, &intake("A"), "flow1.intake_sync")
            .await
            .unwrap();
        assert_eq!(repo.next_key().await.unwrap().as_str(), "INIT-000002");
    }

    #[tokio::test]
    async fn source_lookup_finds_unkeyed_rows() {
        let db = Db::open_in_memory().await.unwrap();
        let repo = db.initiatives();
        let key = repo.next_key().await.unwrap();
        repo.create_from_intake(&key, "sheet", "Tab", 7, &intake("A"), "flow1.intake_sync")
            .await
            .unwrap();

        let found = repo.find_by_source("sheet", "Tab", 7).await.unwrap().unwrap();
        assert_eq!(found.initiative_key, key.as_str());
        assert_eq!(found.status, InitiativeStatus::New);
        assert!(repo.find_by_source("sheet", "Tab", 8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn intake_update_cannot_escalate_status() {
        let db = Db::open_in_memory().await.unwrap();
        let repo = db.initiatives();
        let key = repo.next_key().await.unwrap();
        repo.create_from_intake(&key, "s", "t", 2, &intake("A"), "flow1.intake_sync")
            .await
            .unwrap();

        let mut fields = intake("A2");
        fields.status = Some(InitiativeStatus::Scheduled);
        repo.update_intake_fields(key.as_str(), &fields, "flow1.intake_sync")
            .await
            .unwrap();

        let row = repo.find_by_key(key.as_str()).await.unwrap().unwrap();
        assert_eq!(row.title, "A2");
        assert_eq!(row.status, InitiativeStatus::New);

        fields.status = Some(InitiativeStatus::Withdrawn);
        repo.update_intake_fields(key.as_str(), &fields, "flow1.intake_sync")
            .await
            .unwrap();
        let row = repo.find_by_key(key.as_str()).await.unwrap().unwrap();
        assert_eq!(row.status, InitiativeStatus::Withdrawn);
    }

    #[tokio::test]
    async fn scoring_inputs_strong_sync_clears_blanks() {
        let db = Db::open_in_memory().await.unwrap();
        let repo = db.initiatives();
        let key = repo.next_key().await.unwrap();
        repo.create_from_intake(&key, "s", "t", 2, &intake("A"), "flow1.intake_sync")
            .await
            .unwrap();

        let fields = ScoringInputFields {
            rice_reach: Some(10_000.0),
            rice_impact: Some(3.0),
            active_scoring_framework: Some(Framework::Rice),
            ..Default::default()
        };
        repo.update_scoring_inputs(key.as_str(), &fields, "flow3.productopssheet_read_inputs")
            .await
            .unwrap();
        let row = repo.find_by_key(key.as_str()).await.unwrap().unwrap();
        assert_eq!(row.rice_reach, Some(10_000.0));
        assert_eq!(row.active_scoring_framework, Some(Framework::Rice));
        assert_eq!(
            row.scoring_updated_source.as_deref(),
            Some("flow3.productopssheet_read_inputs")
        );

        // Blank cells on the next sync clear the stored values.
        repo.update_scoring_inputs(
            key.as_str(),
            &ScoringInputFields::default(),
            "flow3.productopssheet_read_inputs",
        )
        .await
        .unwrap();
        let row = repo.find_by_key(key.as_str()).await.unwrap().unwrap();
        assert_eq!(row.rice_reach, None);
        assert_eq!(row.active_scoring_framework, None);
    }

    #[tokio::test]
    async fn framework_scores_stay_isolated() {
        let db = Db::open_in_memory().await.unwrap();
        let repo = db.initiatives();
        let key = repo.next_key().await.unwrap();
        repo.create_from_intake(&key, "s", "t", 2, &intake("A"), "flow1.intake_sync")
            .await
            .unwrap();

        let triple = ScoreTriple {
            value_score: Some(21_000.0),
            effort_score: Some(20.0),
            overall_score: Some(1_050.0),
        };
        repo.update_framework_scores(key.as_str(), Framework::Rice, &triple)
            .await
            .unwrap();

        let row = repo.find_by_key(key.as_str()).await.unwrap().unwrap();
        assert_eq!(row.rice_overall_score, Some(1_050.0));
        assert_eq!(row.wsjf_overall_score, None);
        // Active fields untouched until activation.
        assert_eq!(row.overall_score, None);

        repo.update_active_scores(key.as_str(), &triple, "flow2.activate")
            .await
            .unwrap();
        let row = repo.find_by_key(key.as_str()).await.unwrap().unwrap();
        assert_eq!(row.overall_score, Some(1_050.0));
        assert_eq!(row.scoring_updated_source.as_deref(), Some("flow2.activate"));
    }

    #[tokio::test]
    async fn list_by_keys_filters() {
        let db = Db::open_in_memory().await.unwrap();
        let repo = db.initiatives();
        for n in 0..3 {
            let key = repo.next_key().await.unwrap();
            repo.create_from_intake(&key, "s", "t", 2 + n, &intake("A"), "flow1.intake_sync")
                .await
                .unwrap();
        }
        let rows = repo
            .list_by_keys(&["INIT-000001".to_string(), "INIT-000003".to_string()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(repo.list_by_keys(&[]).await.unwrap().is_empty());
    }
}
