//! Placeholder sheet transport for deployments that have not wired one.
//!
//! The concrete grid API and its credentials live outside this workspace;
//! a deployment links its transport crate and swaps this out when building
//! `RuntimeDeps`. Every call fails with a clear message, so ledger runs
//! that need sheet access fail cleanly instead of hanging.

use async_trait::async_trait;
use roadmap_sheets::{BatchPlan, CellValue, Rect, SheetClient, SheetError};

pub struct UnconfiguredSheet;

fn unconfigured() -> SheetError {
    SheetError::Transport(
        "no sheet transport configured; wire a SheetClient into RuntimeDeps".to_string(),
    )
}

#[async_trait]
impl SheetClient for UnconfiguredSheet {
    async fn get_values(
        &self,
        _spreadsheet_id: &str,
        _rect: &Rect,
    ) -> Result<Vec<Vec<CellValue>>, SheetError> {
        Err(unconfigured())
    }

    async fn update_values(
        &self,
        _spreadsheet_id: &str,
        _rect: &Rect,
        _values: Vec<Vec<CellValue>>,
    ) -> Result<(), SheetError> {
        Err(unconfigured())
    }

    async fn batch_update(
        &self,
        _spreadsheet_id: &str,
        _plan: &BatchPlan,
    ) -> Result<(), SheetError> {
        Err(unconfigured())
    }

    async fn add_protection(
        &self,
        _spreadsheet_id: &str,
        _rect: &Rect,
        _warning_only: bool,
        _description: &str,
    ) -> Result<(), SheetError> {
        Err(unconfigured())
    }
}
