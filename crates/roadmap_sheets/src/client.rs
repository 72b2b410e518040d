//! The abstract sheet transport capability and batch plans.

use crate::cells::CellValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("tab not found: {0}")]
    TabNotFound(String),
    #[error("sheet transport error: {0}")]
    Transport(String),
    #[error("batch plan exceeds {max} ranges: {got}")]
    PlanTooLarge { max: usize, got: usize },
}

/// A 1-based, inclusive grid rectangle on one tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub tab: String,
    pub row_start: usize,
    pub col_start: usize,
    pub row_end: usize,
    pub col_end: usize,
}

impl Rect {
    pub fn new(tab: &str, row_start: usize, col_start: usize, row_end: usize, col_end: usize) -> Self {
        Self {
            tab: tab.to_string(),
            row_start,
            col_start,
            row_end,
            col_end,
        }
    }

    /// A single row spanning `col_start..=col_end`.
    pub fn row(tab: &str, row: usize, col_start: usize, col_end: usize) -> Self {
        Self::new(tab, row, col_start, row, col_end)
    }

    /// A single column spanning `row_start..=row_end`.
    pub fn column(tab: &str, col: usize, row_start: usize, row_end: usize) -> Self {
        Self::new(tab, row_start, col, row_end, col)
    }

    /// One cell.
    pub fn cell(tab: &str, row: usize, col: usize) -> Self {
        Self::new(tab, row, col, row, col)
    }

    pub fn height(&self) -> usize {
        self.row_end.saturating_sub(self.row_start) + 1
    }

    pub fn width(&self) -> usize {
        self.col_end.saturating_sub(self.col_start) + 1
    }

    /// A1 notation, e.g. `Backlog!B2:D10`.
    pub fn to_a1(&self) -> String {
        format!(
            "{}!{}{}:{}{}",
            self.tab,
            col_letters(self.col_start),
            self.row_start,
            col_letters(self.col_end),
            self.row_end
        )
    }
}

/// 1-based column index to letters: 1 -> A, 27 -> AA.
pub fn col_letters(mut col: usize) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    letters.into_iter().rev().collect()
}

/// One contiguous write inside a batch plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeWrite {
    pub rect: Rect,
    pub values: Vec<Vec<CellValue>>,
}

/// A serializable batch of range writes. Plans are data so tests can assert
/// on exactly what a writer intends to touch before anything is sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub ranges: Vec<RangeWrite>,
}

impl BatchPlan {
    pub fn push(&mut self, rect: Rect, values: Vec<Vec<CellValue>>) {
        self.ranges.push(RangeWrite { rect, values });
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Split into plans of at most `max_ranges` ranges each.
    pub fn chunked(self, max_ranges: usize) -> Vec<BatchPlan> {
        if self.ranges.len() <= max_ranges {
            return vec![self];
        }
        self.ranges
            .chunks(max_ranges)
            .map(|chunk| BatchPlan {
                ranges: chunk.to_vec(),
            })
            .collect()
    }
}

/// Abstract grid operations. The concrete transport (and its credentials)
/// lives outside the core; tests use the in-memory implementation from
/// `roadmap_test_utils`.
#[async_trait]
pub trait SheetClient: Send + Sync {
    /// Read a rectangle. Rows beyond the tab's content are omitted; ragged
    /// short rows are allowed and read as blanks by callers.
    async fn get_values(
        &self,
        spreadsheet_id: &str,
        rect: &Rect,
    ) -> Result<Vec<Vec<CellValue>>, SheetError>;

    /// Write one rectangle of values anchored at the rect's top-left.
    async fn update_values(
        &self,
        spreadsheet_id: &str,
        rect: &Rect,
        values: Vec<Vec<CellValue>>,
    ) -> Result<(), SheetError>;

    /// Execute a batch plan in one transport call.
    async fn batch_update(&self, spreadsheet_id: &str, plan: &BatchPlan) -> Result<(), SheetError>;

    /// Apply a warning-only (or hard) protection to a rectangle.
    async fn add_protection(
        &self,
        spreadsheet_id: &str,
        rect: &Rect,
        warning_only: bool,
        description: &str,
    ) -> Result<(), SheetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a1_notation() {
        assert_eq!(col_letters(1), "A");
        assert_eq!(col_letters(26), "Z");
        assert_eq!(col_letters(27), "AA");
        assert_eq!(col_letters(52), "AZ");
        assert_eq!(
            Rect::new("Backlog", 2, 2, 10, 4).to_a1(),
            "Backlog!B2:D10"
        );
    }

    #[test]
    fn plans_chunk_at_the_cap() {
        let mut plan = BatchPlan::default();
        for row in 0..450 {
            plan.push(Rect::cell("T", row + 1, 1), vec![vec![CellValue::Blank]]);
        }
        let chunks = plan.chunked(200);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 200);
        assert_eq!(chunks[2].len(), 50);
    }
}
