//! Writer discipline: owned columns, provenance, chunking, append monotony.

use roadmap_sheets::reader::TabShape;
use roadmap_sheets::writers::{
    append_rows, plan_upsert, upsert_rows, AppendConfig, UpsertConfig, WriteRecord,
};
use roadmap_sheets::CellValue;
use roadmap_test_utils::InMemorySheet;
use std::collections::HashMap;

fn backlog_sheet() -> InMemorySheet {
    InMemorySheet::new().with_tab(
        "Central_Backlog",
        vec![
            vec!["Initiative Key", "Title", "PM Notes", "Overall Score", "Updated Source", "Updated At"],
            vec!["INIT-000001", "Old title", "keep me", "", "", ""],
            vec!["INIT-000002", "Другой", "mine", "", "", ""],
        ],
    )
}

fn config(owned: &[&str]) -> UpsertConfig {
    UpsertConfig {
        tab: "Central_Backlog".to_string(),
        shape: TabShape::standard(),
        key_column: "initiative_key".to_string(),
        owned_columns: owned.iter().map(|c| c.to_string()).collect(),
        provenance: "flow1.backlog_sheet_write".to_string(),
    }
}

#[tokio::test]
async fn upsert_updates_existing_and_appends_new() {
    let sheet = backlog_sheet();
    let records = vec![
        WriteRecord::new("INIT-000001").set("title", CellValue::text("New title")),
        WriteRecord::new("INIT-000003").set("title", CellValue::text("Brand new")),
    ];

    let report = upsert_rows(&sheet, "sid", &config(&["title"]), &records)
        .await
        .unwrap();
    assert_eq!(report.updated_rows, 1);
    assert_eq!(report.appended_rows, 1);

    assert_eq!(sheet.cell_text("Central_Backlog", 2, 2).as_deref(), Some("New title"));
    // The new row lands after the highest occupied row, key included.
    assert_eq!(sheet.cell_text("Central_Backlog", 4, 1).as_deref(), Some("INIT-000003"));
    assert_eq!(sheet.cell_text("Central_Backlog", 4, 2).as_deref(), Some("Brand new"));
    // Provenance stamped on every touched row.
    assert_eq!(
        sheet.cell_text("Central_Backlog", 2, 5).as_deref(),
        Some("flow1.backlog_sheet_write")
    );
    assert!(sheet.cell_text("Central_Backlog", 2, 6).is_some());
}

#[tokio::test]
async fn non_owned_columns_are_never_touched() {
    let sheet = backlog_sheet();
    let records = vec![WriteRecord::new("INIT-000001")
        .set("title", CellValue::text("New title"))
        .set("pm_notes", CellValue::text("smuggled"))];

    upsert_rows(&sheet, "sid", &config(&["title"]), &records)
        .await
        .unwrap();

    // The record carried a pm_notes cell, but the writer does not own it.
    assert_eq!(sheet.cell_text("Central_Backlog", 2, 3).as_deref(), Some("keep me"));
}

#[tokio::test]
async fn contiguous_rows_collapse_into_single_ranges() {
    let sheet = backlog_sheet();
    let records = vec![
        WriteRecord::new("INIT-000001").set("title", CellValue::text("A")),
        WriteRecord::new("INIT-000002").set("title", CellValue::text("B")),
    ];

    let (plan, _) = plan_upsert(&sheet, "sid", &config(&["title"]), &records)
        .await
        .unwrap();

    // Rows 2 and 3 are contiguous: one range per written column.
    let title_ranges: Vec<_> = plan
        .ranges
        .iter()
        .filter(|r| r.rect.col_start == 2)
        .collect();
    assert_eq!(title_ranges.len(), 1);
    assert_eq!(title_ranges[0].rect.row_start, 2);
    assert_eq!(title_ranges[0].rect.row_end, 3);
}

#[tokio::test]
async fn oversized_plans_are_chunked_to_the_range_cap() {
    let keys: Vec<String> = (0..120).map(|n| format!("INIT-{:06}", n + 1)).collect();
    // Alternate keys with blank rows so updated rows are non-contiguous:
    // every record yields its own range per column.
    let mut rows = vec![vec!["Initiative Key", "Title", "Updated Source", "Updated At"]];
    for key in &keys {
        rows.push(vec![key.as_str(), "t", "", ""]);
        rows.push(vec!["", "", "", ""]);
    }
    let sheet = InMemorySheet::new().with_tab("Central_Backlog", rows);

    let records: Vec<WriteRecord> = (0..120)
        .map(|n| {
            WriteRecord::new(format!("INIT-{:06}", n + 1)).set("title", CellValue::text("X"))
        })
        .collect();

    upsert_rows(&sheet, "sid", &config(&["title"]), &records)
        .await
        .unwrap();

    // 120 scattered rows × 3 columns (title + 2 audit) = 360 ranges > 200.
    let plans = sheet.executed_plans();
    assert!(plans.len() >= 2, "expected chunked execution, got {}", plans.len());
    assert!(plans.iter().all(|p| p.len() <= 200));
}

#[tokio::test]
async fn append_is_monotone() {
    let sheet = InMemorySheet::new().with_tab(
        "Runs",
        vec![
            vec!["Run Id", "Scenario", "Status", "Updated Source", "Updated At"],
            vec!["", "(hint)", "", "", ""],
            vec!["", "(hint)", "", "", ""],
            vec!["run_001", "Q1", "succeeded", "", ""],
        ],
    );
    let config = AppendConfig {
        tab: "Runs".to_string(),
        shape: TabShape::optimization_center(),
        key_column: "run_id".to_string(),
        provenance: "pm.optimize_run_selected_candidates".to_string(),
    };

    let mut row = HashMap::new();
    row.insert("run_id".to_string(), CellValue::text("run_002"));
    row.insert("scenario".to_string(), CellValue::text("Q1"));
    row.insert("status".to_string(), CellValue::text("succeeded"));

    let appended = append_rows(&sheet, "sid", &config, std::slice::from_ref(&row))
        .await
        .unwrap();
    assert_eq!(appended, 1);
    assert_eq!(sheet.cell_text("Runs", 5, 1).as_deref(), Some("run_002"));
    assert_eq!(
        sheet.cell_text("Runs", 5, 4).as_deref(),
        Some("pm.optimize_run_selected_candidates")
    );

    // A second call with the same rows appends again and leaves prior rows
    // untouched.
    append_rows(&sheet, "sid", &config, std::slice::from_ref(&row))
        .await
        .unwrap();
    assert_eq!(sheet.cell_text("Runs", 4, 1).as_deref(), Some("run_001"));
    assert_eq!(sheet.cell_text("Runs", 6, 1).as_deref(), Some("run_002"));
    assert_eq!(sheet.occupied_rows("Runs"), 6);
}
