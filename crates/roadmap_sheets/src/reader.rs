//! The generic tab-reading engine shared by every per-tab reader.

use crate::cells::CellValue;
use crate::client::{Rect, SheetClient, SheetError};
use crate::header::{all_indices, normalize, resolve_indices, Alias};
use roadmap_protocol::defaults::BLANK_ROW_CUTOFF;
use std::collections::HashMap;

/// Tab geometry. Most tabs carry data from row 2; Optimization Center tabs
/// keep human metadata in rows 2-3 and start data at row 4.
#[derive(Debug, Clone)]
pub struct TabShape {
    pub header_row: usize,
    pub start_data_row: usize,
    pub max_rows: usize,
    pub max_cols: usize,
    pub blank_run_cutoff: usize,
}

impl TabShape {
    pub fn standard() -> Self {
        Self {
            header_row: 1,
            start_data_row: 2,
            max_rows: 5_000,
            max_cols: 70,
            blank_run_cutoff: BLANK_ROW_CUTOFF,
        }
    }

    pub fn optimization_center() -> Self {
        Self {
            start_data_row: 4,
            ..Self::standard()
        }
    }
}

/// One data row keyed by canonical field names, with its 1-based sheet row
/// number preserved for targeted write-backs.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub row_number: usize,
    pub cells: HashMap<String, CellValue>,
    /// Columns present on the tab but not in the alias table.
    pub extras: HashMap<String, CellValue>,
}

impl RawRow {
    pub fn get(&self, canonical: &str) -> &CellValue {
        static BLANK: CellValue = CellValue::Blank;
        self.cells.get(canonical).unwrap_or(&BLANK)
    }
}

/// Read a tab rectangle into raw rows. Fully-blank rows are skipped; reading
/// stops after `blank_run_cutoff` consecutive blanks so empty tail regions
/// never cost quota.
pub async fn read_tab(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
    shape: &TabShape,
    aliases: &[Alias],
) -> Result<Vec<RawRow>, SheetError> {
    let header_rect = Rect::row(tab, shape.header_row, 1, shape.max_cols);
    let header_grid = client.get_values(spreadsheet_id, &header_rect).await?;
    let headers: Vec<String> = header_grid
        .first()
        .map(|row| {
            row.iter()
                .map(|cell| cell.as_trimmed_text().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    if headers.iter().all(|h| h.is_empty()) {
        return Ok(Vec::new());
    }

    let canonical = resolve_indices(&headers, aliases);
    let known_positions: Vec<usize> = canonical.values().copied().collect();
    let extras_index: Vec<(String, usize)> = all_indices(&headers)
        .into_iter()
        .filter(|(name, position)| !known_positions.contains(position) && !name.is_empty())
        .collect();

    let data_rect = Rect::new(
        tab,
        shape.start_data_row,
        1,
        shape.start_data_row + shape.max_rows - 1,
        shape.max_cols,
    );
    let grid = client.get_values(spreadsheet_id, &data_rect).await?;

    let mut rows = Vec::new();
    let mut blank_run = 0;

    for (offset, raw) in grid.iter().enumerate() {
        let row_number = shape.start_data_row + offset;
        if raw.iter().all(CellValue::is_blank) {
            blank_run += 1;
            if blank_run >= shape.blank_run_cutoff {
                break;
            }
            continue;
        }
        blank_run = 0;

        let cell_at = |position: usize| raw.get(position).cloned().unwrap_or(CellValue::Blank);

        let cells = canonical
            .iter()
            .map(|(name, position)| (name.clone(), cell_at(*position)))
            .collect();
        let extras = extras_index
            .iter()
            .map(|(name, position)| (name.clone(), cell_at(*position)))
            .filter(|(_, value)| !value.is_blank())
            .collect();

        rows.push(RawRow {
            row_number,
            cells,
            extras,
        });
    }

    Ok(rows)
}

/// Locate a canonical column's 1-based sheet position on a tab, reading only
/// the header row.
pub async fn find_column(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
    shape: &TabShape,
    canonical: &str,
    variants: &[&str],
) -> Result<Option<usize>, SheetError> {
    let header_rect = Rect::row(tab, shape.header_row, 1, shape.max_cols);
    let header_grid = client.get_values(spreadsheet_id, &header_rect).await?;
    let Some(row) = header_grid.first() else {
        return Ok(None);
    };

    let mut candidates = vec![normalize(canonical)];
    candidates.extend(variants.iter().map(|v| normalize(v)));

    for (position, cell) in row.iter().enumerate() {
        if let Some(text) = cell.as_trimmed_text() {
            if candidates.contains(&normalize(&text)) {
                return Ok(Some(position + 1));
            }
        }
    }
    Ok(None)
}
