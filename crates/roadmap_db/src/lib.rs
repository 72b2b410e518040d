//! Authoritative relational store for Roadmap Flow.
//!
//! SQLite via sqlx. Row models use `FromRow` derives; status columns are
//! `sqlx::Type` enums stored as TEXT. Repositories expose explicit,
//! ownership-scoped update methods instead of generic attribute writes, so
//! each data path can only touch the columns it owns.

pub mod ledger;
pub mod models;
pub mod repo;
pub mod schema;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

pub use ledger::{ActionLedger, LedgerStats};
pub use models::*;
pub use repo::{MathModelFields, MetricFields, ParamFields, ScenarioFields};

/// Shared database handle: a cloneable pool plus the repositories built on it.
#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    /// Open (and create if missing) the database behind a `sqlite:` URL and
    /// bootstrap the schema.
    pub async fn open(url: &str) -> Result<Self> {
        let path = url
            .strip_prefix("sqlite:")
            .with_context(|| format!("Unsupported database URL: {url}"))?;

        let pool = if path == ":memory:" {
            // A pooled in-memory database is one database per connection;
            // cap at a single connection so all sessions see the same rows.
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect(":memory:")
                .await?
        } else {
            let options = SqliteConnectOptions::from_str(url)?
                .create_if_missing(true)
                .busy_timeout(std::time::Duration::from_secs(5));
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        schema::bootstrap(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database for tests and dry runs.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn initiatives(&self) -> repo::InitiativeRepo<'_> {
        repo::InitiativeRepo::new(&self.pool)
    }

    pub fn math_models(&self) -> repo::MathModelRepo<'_> {
        repo::MathModelRepo::new(&self.pool)
    }

    pub fn params(&self) -> repo::ParamRepo<'_> {
        repo::ParamRepo::new(&self.pool)
    }

    pub fn metrics(&self) -> repo::MetricConfigRepo<'_> {
        repo::MetricConfigRepo::new(&self.pool)
    }

    pub fn scores(&self) -> repo::ScoreHistoryRepo<'_> {
        repo::ScoreHistoryRepo::new(&self.pool)
    }

    pub fn optimization(&self) -> repo::OptimizationRepo<'_> {
        repo::OptimizationRepo::new(&self.pool)
    }

    pub fn ledger(&self) -> ActionLedger {
        ActionLedger::new(self.pool.clone())
    }

    /// Cheap connectivity probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
