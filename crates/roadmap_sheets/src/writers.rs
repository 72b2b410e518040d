//! Owned-column-scoped writers.
//!
//! Writers never touch a column outside their owned set, and they always
//! stamp the two audit columns when the tab carries them. All writes are
//! computed into a [`BatchPlan`] first; execution is a separate step so
//! tests can inspect exactly what would be sent.

use crate::cells::{datetime_cell, CellValue};
use crate::client::{BatchPlan, Rect, SheetClient, SheetError};
use crate::header::normalize;
use crate::reader::TabShape;
use chrono::Utc;
use roadmap_protocol::defaults::MAX_BATCH_RANGES;
use std::collections::HashMap;
use tracing::debug;

pub const UPDATED_SOURCE_COLUMN: &str = "updated_source";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Rows appended per range when splitting an oversized append.
const APPEND_CHUNK_ROWS: usize = 500;

/// One record to upsert: a key plus canonical-name → value cells.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub key: String,
    pub cells: HashMap<String, CellValue>,
}

impl WriteRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            cells: HashMap::new(),
        }
    }

    pub fn set(mut self, canonical: &str, value: CellValue) -> Self {
        self.cells.insert(canonical.to_string(), value);
        self
    }
}

/// Configuration of an upsert-by-key writer for one tab.
#[derive(Debug, Clone)]
pub struct UpsertConfig {
    pub tab: String,
    pub shape: TabShape,
    pub key_column: String,
    /// Canonical names this writer may touch; the key and audit columns are
    /// implicit.
    pub owned_columns: Vec<String>,
    pub provenance: String,
}

/// What an upsert plan will do, for the caller's summary counters.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub updated_rows: usize,
    pub appended_rows: usize,
    /// Owned columns missing from the tab header.
    pub missing_columns: Vec<String>,
}

/// Compute the batch plan for upserting records into a keyed tab.
///
/// Reads only the header row and the key column, never the full sheet.
pub async fn plan_upsert(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    config: &UpsertConfig,
    records: &[WriteRecord],
) -> Result<(BatchPlan, UpsertReport), SheetError> {
    let mut report = UpsertReport::default();
    let mut plan = BatchPlan::default();
    if records.is_empty() {
        return Ok((plan, report));
    }

    let header_positions = read_header_positions(client, spreadsheet_id, config).await?;
    let Some(&key_col) = header_positions.get(&normalize(&config.key_column)) else {
        return Err(SheetError::Transport(format!(
            "tab {} has no key column {}",
            config.tab, config.key_column
        )));
    };

    // Key column scan: key -> sheet row, plus the highest occupied row.
    let key_rect = Rect::column(
        &config.tab,
        key_col,
        config.shape.start_data_row,
        config.shape.start_data_row + config.shape.max_rows - 1,
    );
    let key_grid = client.get_values(spreadsheet_id, &key_rect).await?;
    let mut key_rows: HashMap<String, usize> = HashMap::new();
    let mut last_occupied = config.shape.start_data_row - 1;
    for (offset, row) in key_grid.iter().enumerate() {
        let sheet_row = config.shape.start_data_row + offset;
        if let Some(key) = row.first().and_then(|c| c.as_trimmed_text()) {
            key_rows.insert(key, sheet_row);
            last_occupied = sheet_row;
        }
    }

    // Column set this plan will write: owned ∩ header, plus audit columns.
    let mut writable: Vec<(String, usize)> = Vec::new();
    for canonical in &config.owned_columns {
        match header_positions.get(&normalize(canonical)) {
            Some(&position) => writable.push((canonical.clone(), position)),
            None => report.missing_columns.push(canonical.clone()),
        }
    }
    let audit_columns: Vec<(String, usize)> = [UPDATED_SOURCE_COLUMN, UPDATED_AT_COLUMN]
        .iter()
        .filter_map(|name| {
            header_positions
                .get(*name)
                .map(|&position| (name.to_string(), position))
        })
        .collect();

    let stamp_source = CellValue::text(&config.provenance);
    let stamp_at = datetime_cell(Utc::now());

    // Resolve each record to a target row, appending unknown keys after the
    // highest occupied row.
    let mut next_append = last_occupied.max(config.shape.start_data_row - 1) + 1;
    let mut column_updates: HashMap<usize, Vec<(usize, CellValue)>> = HashMap::new();
    for record in records {
        let row = match key_rows.get(&record.key) {
            Some(&row) => {
                report.updated_rows += 1;
                row
            }
            None => {
                let row = next_append;
                next_append += 1;
                report.appended_rows += 1;
                // New rows get their key written as well.
                column_updates
                    .entry(key_col)
                    .or_default()
                    .push((row, CellValue::text(&record.key)));
                row
            }
        };

        for (canonical, position) in &writable {
            if let Some(value) = record.cells.get(canonical) {
                column_updates
                    .entry(*position)
                    .or_default()
                    .push((row, value.clone()));
            }
        }
        for (name, position) in &audit_columns {
            let value = if name == UPDATED_SOURCE_COLUMN {
                stamp_source.clone()
            } else {
                stamp_at.clone()
            };
            column_updates
                .entry(*position)
                .or_default()
                .push((row, value));
        }
    }

    // Group each column's updates into contiguous row runs.
    let mut columns: Vec<_> = column_updates.into_iter().collect();
    columns.sort_by_key(|(position, _)| *position);
    for (position, mut updates) in columns {
        updates.sort_by_key(|(row, _)| *row);
        let mut run_start = 0;
        while run_start < updates.len() {
            let mut run_end = run_start;
            while run_end + 1 < updates.len()
                && updates[run_end + 1].0 == updates[run_end].0 + 1
            {
                run_end += 1;
            }
            let rect = Rect::column(
                &config.tab,
                position,
                updates[run_start].0,
                updates[run_end].0,
            );
            let values = updates[run_start..=run_end]
                .iter()
                .map(|(_, value)| vec![value.clone()])
                .collect();
            plan.push(rect, values);
            run_start = run_end + 1;
        }
    }

    debug!(
        "Upsert plan for {}: {} ranges, {} updated, {} appended",
        config.tab,
        plan.len(),
        report.updated_rows,
        report.appended_rows
    );
    Ok((plan, report))
}

/// Execute a plan, chunked to the transport's range cap.
pub async fn execute_plan(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    plan: BatchPlan,
) -> Result<(), SheetError> {
    for chunk in plan.chunked(MAX_BATCH_RANGES) {
        if !chunk.is_empty() {
            client.batch_update(spreadsheet_id, &chunk).await?;
        }
    }
    Ok(())
}

/// Plan and execute in one step.
pub async fn upsert_rows(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    config: &UpsertConfig,
    records: &[WriteRecord],
) -> Result<UpsertReport, SheetError> {
    let (plan, report) = plan_upsert(client, spreadsheet_id, config, records).await?;
    execute_plan(client, spreadsheet_id, plan).await?;
    Ok(report)
}

/// Configuration of an append-only writer.
#[derive(Debug, Clone)]
pub struct AppendConfig {
    pub tab: String,
    pub shape: TabShape,
    /// Column scanned backwards to find the last occupied row.
    pub key_column: String,
    pub provenance: String,
}

/// Append records as new rows after the last occupied key row. Prior rows
/// are never rewritten.
pub async fn append_rows(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    config: &AppendConfig,
    rows: &[HashMap<String, CellValue>],
) -> Result<usize, SheetError> {
    if rows.is_empty() {
        return Ok(0);
    }

    let header_rect = Rect::row(&config.tab, config.shape.header_row, 1, config.shape.max_cols);
    let header_grid = client.get_values(spreadsheet_id, &header_rect).await?;
    let headers: Vec<String> = header_grid
        .first()
        .map(|row| {
            row.iter()
                .map(|cell| cell.as_trimmed_text().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    let width = headers.iter().rposition(|h| !h.is_empty()).map(|i| i + 1);
    let Some(width) = width else {
        return Err(SheetError::Transport(format!(
            "tab {} has an empty header row",
            config.tab
        )));
    };

    let key_position = headers
        .iter()
        .position(|h| normalize(h) == normalize(&config.key_column))
        .ok_or_else(|| {
            SheetError::Transport(format!(
                "tab {} has no key column {}",
                config.tab, config.key_column
            ))
        })?;

    // Backwards scan of the key column for the last non-empty row.
    let key_rect = Rect::column(
        &config.tab,
        key_position + 1,
        config.shape.start_data_row,
        config.shape.start_data_row + config.shape.max_rows - 1,
    );
    let key_grid = client.get_values(spreadsheet_id, &key_rect).await?;
    let last_occupied = key_grid
        .iter()
        .rposition(|row| row.first().map(|c| !c.is_blank()).unwrap_or(false))
        .map(|offset| config.shape.start_data_row + offset)
        .unwrap_or(config.shape.start_data_row - 1);
    let first_append = last_occupied + 1;

    let stamp_source = CellValue::text(&config.provenance);
    let stamp_at = datetime_cell(Utc::now());

    // Contiguous rectangle in header order.
    let rectangle: Vec<Vec<CellValue>> = rows
        .iter()
        .map(|record| {
            headers[..width]
                .iter()
                .map(|header| {
                    let canonical = normalize(header);
                    if canonical == UPDATED_SOURCE_COLUMN {
                        record
                            .get(UPDATED_SOURCE_COLUMN)
                            .cloned()
                            .unwrap_or_else(|| stamp_source.clone())
                    } else if canonical == UPDATED_AT_COLUMN {
                        record
                            .get(UPDATED_AT_COLUMN)
                            .cloned()
                            .unwrap_or_else(|| stamp_at.clone())
                    } else {
                        record.get(&canonical).cloned().unwrap_or(CellValue::Blank)
                    }
                })
                .collect()
        })
        .collect();

    for (chunk_index, chunk) in rectangle.chunks(APPEND_CHUNK_ROWS).enumerate() {
        let row_start = first_append + chunk_index * APPEND_CHUNK_ROWS;
        let rect = Rect::new(
            &config.tab,
            row_start,
            1,
            row_start + chunk.len() - 1,
            width,
        );
        client
            .update_values(spreadsheet_id, &rect, chunk.to_vec())
            .await?;
    }

    debug!("Appended {} rows to {}", rows.len(), config.tab);
    Ok(rows.len())
}

/// Apply warning-only protections to system-owned columns so humans get a
/// confirmation prompt before editing them.
pub async fn protect_columns(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    tab: &str,
    shape: &TabShape,
    columns: &[&str],
    description: &str,
) -> Result<usize, SheetError> {
    let header_rect = Rect::row(tab, shape.header_row, 1, shape.max_cols);
    let header_grid = client.get_values(spreadsheet_id, &header_rect).await?;
    let Some(headers) = header_grid.first() else {
        return Ok(0);
    };

    let mut protected = 0;
    for (position, cell) in headers.iter().enumerate() {
        let Some(text) = cell.as_trimmed_text() else {
            continue;
        };
        if columns.iter().any(|c| normalize(c) == normalize(&text)) {
            let rect = Rect::column(
                tab,
                position + 1,
                shape.start_data_row,
                shape.start_data_row + shape.max_rows - 1,
            );
            client
                .add_protection(spreadsheet_id, &rect, true, description)
                .await?;
            protected += 1;
        }
    }
    Ok(protected)
}

async fn read_header_positions(
    client: &dyn SheetClient,
    spreadsheet_id: &str,
    config: &UpsertConfig,
) -> Result<HashMap<String, usize>, SheetError> {
    let header_rect = Rect::row(&config.tab, config.shape.header_row, 1, config.shape.max_cols);
    let header_grid = client.get_values(spreadsheet_id, &header_rect).await?;
    let mut positions = HashMap::new();
    if let Some(row) = header_grid.first() {
        for (index, cell) in row.iter().enumerate() {
            if let Some(text) = cell.as_trimmed_text() {
                positions.entry(normalize(&text)).or_insert(index + 1);
            }
        }
    }
    Ok(positions)
}
