//! In-memory implementation of the sheet capability.
//!
//! Tabs are dense grids of cells; rectangles are clipped to content the way
//! a real grid API responds. Batch plans and protections are recorded so
//! tests can assert on what was sent.

use async_trait::async_trait;
use roadmap_sheets::{BatchPlan, CellValue, Rect, SheetClient, SheetError};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ProtectionRecord {
    pub rect: Rect,
    pub warning_only: bool,
    pub description: String,
}

#[derive(Default)]
struct SheetState {
    tabs: HashMap<String, Vec<Vec<CellValue>>>,
    executed_plans: Vec<BatchPlan>,
    protections: Vec<ProtectionRecord>,
}

/// A fake spreadsheet. The spreadsheet id is accepted and ignored; tests
/// address tabs directly.
#[derive(Default)]
pub struct InMemorySheet {
    state: Mutex<SheetState>,
}

impl InMemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tab from rows of string cells; row 0 is the header.
    pub fn with_tab(self, tab: &str, rows: Vec<Vec<&str>>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let grid = rows
                .into_iter()
                .map(|row| row.into_iter().map(CellValue::from).collect())
                .collect();
            state.tabs.insert(tab.to_string(), grid);
        }
        self
    }

    pub fn add_tab(&self, tab: &str, rows: Vec<Vec<&str>>) {
        let mut state = self.state.lock().unwrap();
        let grid = rows
            .into_iter()
            .map(|row| row.into_iter().map(CellValue::from).collect())
            .collect();
        state.tabs.insert(tab.to_string(), grid);
    }

    /// Snapshot of a tab's full grid.
    pub fn tab(&self, tab: &str) -> Vec<Vec<CellValue>> {
        self.state
            .lock()
            .unwrap()
            .tabs
            .get(tab)
            .cloned()
            .unwrap_or_default()
    }

    /// One cell as trimmed text (1-based coordinates).
    pub fn cell_text(&self, tab: &str, row: usize, col: usize) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .tabs
            .get(tab)?
            .get(row - 1)?
            .get(col - 1)?
            .as_trimmed_text()
    }

    /// Number of rows with any non-blank cell.
    pub fn occupied_rows(&self, tab: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .tabs
            .get(tab)
            .map(|grid| {
                grid.iter()
                    .filter(|row| row.iter().any(|c| !c.is_blank()))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn executed_plans(&self) -> Vec<BatchPlan> {
        self.state.lock().unwrap().executed_plans.clone()
    }

    pub fn protections(&self) -> Vec<ProtectionRecord> {
        self.state.lock().unwrap().protections.clone()
    }

    fn write_rect(state: &mut SheetState, rect: &Rect, values: &[Vec<CellValue>]) {
        let grid = state.tabs.entry(rect.tab.clone()).or_default();
        for (row_offset, row_values) in values.iter().enumerate() {
            let row_index = rect.row_start - 1 + row_offset;
            if grid.len() <= row_index {
                grid.resize(row_index + 1, Vec::new());
            }
            let row = &mut grid[row_index];
            for (col_offset, value) in row_values.iter().enumerate() {
                let col_index = rect.col_start - 1 + col_offset;
                if row.len() <= col_index {
                    row.resize(col_index + 1, CellValue::Blank);
                }
                row[col_index] = value.clone();
            }
        }
    }
}

#[async_trait]
impl SheetClient for InMemorySheet {
    async fn get_values(
        &self,
        _spreadsheet_id: &str,
        rect: &Rect,
    ) -> Result<Vec<Vec<CellValue>>, SheetError> {
        let state = self.state.lock().unwrap();
        let Some(grid) = state.tabs.get(&rect.tab) else {
            return Err(SheetError::TabNotFound(rect.tab.clone()));
        };

        let mut out = Vec::new();
        for row_index in (rect.row_start - 1)..rect.row_end.min(grid.len()) {
            let row = &grid[row_index];
            let cells: Vec<CellValue> = ((rect.col_start - 1)..rect.col_end.min(row.len()))
                .map(|col_index| row[col_index].clone())
                .collect();
            out.push(cells);
        }
        Ok(out)
    }

    async fn update_values(
        &self,
        _spreadsheet_id: &str,
        rect: &Rect,
        values: Vec<Vec<CellValue>>,
    ) -> Result<(), SheetError> {
        let mut state = self.state.lock().unwrap();
        Self::write_rect(&mut state, rect, &values);
        Ok(())
    }

    async fn batch_update(
        &self,
        _spreadsheet_id: &str,
        plan: &BatchPlan,
    ) -> Result<(), SheetError> {
        let mut state = self.state.lock().unwrap();
        for range in &plan.ranges {
            Self::write_rect(&mut state, &range.rect, &range.values);
        }
        state.executed_plans.push(plan.clone());
        Ok(())
    }

    async fn add_protection(
        &self,
        _spreadsheet_id: &str,
        rect: &Rect,
        warning_only: bool,
        description: &str,
    ) -> Result<(), SheetError> {
        let mut state = self.state.lock().unwrap();
        state.protections.push(ProtectionRecord {
            rect: rect.clone(),
            warning_only,
            description: description.to_string(),
        });
        Ok(())
    }
}
