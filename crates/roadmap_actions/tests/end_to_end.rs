//! End-to-end flows over the in-memory transport: intake → backlog,
//! scoring → activation, KPI override lifecycle, optimization runs.

use roadmap_actions::{ActionRegistry, ActionRunner, RuntimeDeps, WorkerLoop};
use roadmap_db::{ContributionSource, Db, Framework, KpiLevel, RunState};
use roadmap_ids::ActionRunId;
use roadmap_optimizer::BranchAndBoundSolver;
use roadmap_protocol::{ActionRequest, Scope, Settings, SheetContext};
use roadmap_test_utils::{seed_initiative, seed_metric, InMemorySheet, InitiativeSeed};
use serde_json::Value;
use std::sync::Arc;

fn deps(db: Db, sheet: Arc<InMemorySheet>) -> RuntimeDeps {
    let settings = Settings {
        intake_spreadsheet_id: "intake".to_string(),
        intake_tabs: vec!["Marketing_EMEA".to_string()],
        backlog_spreadsheet_id: "backlog".to_string(),
        backlog_tab: "Central_Backlog".to_string(),
        productops_spreadsheet_id: "productops".to_string(),
        optimization_spreadsheet_id: "optimization".to_string(),
        ..Default::default()
    };
    RuntimeDeps {
        db,
        settings: Arc::new(settings),
        sheet,
        llm: None,
        solver: Arc::new(BranchAndBoundSolver),
    }
}

async fn run_action(db: &Db, deps: RuntimeDeps, request: ActionRequest) -> roadmap_db::ActionRun {
    let run_id = ActionRunId::mint(chrono::Utc::now());
    db.ledger()
        .enqueue(
            &run_id,
            &request.action,
            &serde_json::to_string(&request).unwrap(),
            None,
        )
        .await
        .unwrap();
    let runner = ActionRunner::new(Arc::new(ActionRegistry::with_default_actions()), deps);
    WorkerLoop::new(runner, 10, Some(1)).run().await.unwrap();
    db.ledger().get(run_id.as_str()).await.unwrap().unwrap()
}

fn result_of(run: &roadmap_db::ActionRun) -> Value {
    serde_json::from_str(run.result_json.as_deref().unwrap_or("{}")).unwrap()
}

fn selection(action: &str, keys: &[&str]) -> ActionRequest {
    ActionRequest {
        action: action.to_string(),
        scope: Scope::Selection {
            initiative_keys: keys.iter().map(|k| k.to_string()).collect(),
        },
        ..Default::default()
    }
}

/// A new intake row produces a keyed backlog entry, and the key is
/// written back into the intake sheet.
#[tokio::test]
async fn new_intake_row_produces_backlog_entry() {
    let db = Db::open_in_memory().await.unwrap();
    let sheet = Arc::new(
        InMemorySheet::new()
            .with_tab(
                "Marketing_EMEA",
                vec![
                    vec!["Initiative Key", "Title", "Requester Name", "Country", "Run Status"],
                    vec!["", "", "", "", ""],
                    vec!["", "", "", "", ""],
                    vec!["", "", "", "", ""],
                    vec!["", "Improve checkout", "Alice", "UK", ""],
                ],
            )
            .with_tab(
                "Central_Backlog",
                vec![vec![
                    "Initiative Key",
                    "Title",
                    "Country",
                    "Status",
                    "Overall Score",
                    "Updated Source",
                    "Updated At",
                ]],
            ),
    );

    let run = run_action(
        &db,
        deps(db.clone(), sheet.clone()),
        ActionRequest {
            action: "pm.backlog_sync".to_string(),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(run.status, RunState::Succeeded);

    // DB row with the freshly assigned key and source position (sheet row 5).
    let initiative = db
        .initiatives()
        .find_by_key("INIT-000001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(initiative.title, "Improve checkout");
    assert_eq!(initiative.country.as_deref(), Some("UK"));
    assert_eq!(initiative.status.as_str(), "new");
    assert_eq!(initiative.source_row_number, Some(5));

    // Key back-written into the intake row.
    assert_eq!(
        sheet.cell_text("Marketing_EMEA", 5, 1).as_deref(),
        Some("INIT-000001")
    );

    // Central backlog projection row with write provenance.
    assert_eq!(
        sheet.cell_text("Central_Backlog", 2, 1).as_deref(),
        Some("INIT-000001")
    );
    assert_eq!(
        sheet.cell_text("Central_Backlog", 2, 2).as_deref(),
        Some("Improve checkout")
    );
    assert_eq!(
        sheet.cell_text("Central_Backlog", 2, 6).as_deref(),
        Some("flow1.backlog_sheet_write")
    );
}

/// RICE scoring fills the isolated triple; switching the framework
/// copies it into the active fields with activation provenance.
#[tokio::test]
async fn rice_scoring_and_activation() {
    let db = Db::open_in_memory().await.unwrap();
    let key = seed_initiative(
        &db,
        &InitiativeSeed {
            title: "Improve checkout".into(),
            rice: Some((10_000.0, 3.0, 0.7, 20.0)),
            active_framework: Some(Framework::Rice),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let sheet = Arc::new(
        InMemorySheet::new()
            .with_tab(
                "Scoring_Inputs",
                vec![
                    vec![
                        "Initiative Key", "Reach", "Impact", "Confidence", "Effort", "Framework",
                        "Rice Overall Score", "Overall Score", "Run Status",
                    ],
                    vec![key.as_str(), "10000", "3", "0.7", "20", "RICE", "", "", ""],
                ],
            )
            .with_tab(
                "KPI_Contributions",
                vec![vec!["Initiative Key", "KPI Contribution JSON"]],
            ),
    );

    let run = run_action(
        &db,
        deps(db.clone(), sheet.clone()),
        selection("pm.score_selected", &[key.as_str()]),
    )
    .await;
    assert_eq!(run.status, RunState::Succeeded);

    let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
    assert_eq!(row.rice_value_score, Some(21_000.0));
    assert_eq!(row.rice_effort_score, Some(20.0));
    assert_eq!(row.rice_overall_score, Some(1_050.0));
    // Active fields unchanged by scoring alone.
    assert_eq!(row.value_score, None);

    // Score write-back reached the sheet.
    assert_eq!(
        sheet.cell_text("Scoring_Inputs", 2, 7).as_deref(),
        Some("1050")
    );

    let run = run_action(
        &db,
        deps(db.clone(), sheet.clone()),
        selection("pm.switch_framework", &[key.as_str()]),
    )
    .await;
    assert_eq!(run.status, RunState::Succeeded);

    let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
    assert_eq!(row.value_score, Some(21_000.0));
    assert_eq!(row.effort_score, Some(20.0));
    assert_eq!(row.overall_score, Some(1_050.0));
    assert_eq!(row.scoring_updated_source.as_deref(), Some("flow2.activate"));
}

/// Computed KPI maps respect a PM override; clearing the sheet
/// cell unlocks, and the next scoring run recomputes both columns.
#[tokio::test]
async fn kpi_override_and_unlock() {
    let db = Db::open_in_memory().await.unwrap();
    seed_metric(&db, "revenue", KpiLevel::NorthStar).await.unwrap();
    seed_metric(&db, "user_retention", KpiLevel::Strategic).await.unwrap();
    let key = seed_initiative(
        &db,
        &InitiativeSeed {
            title: "Math initiative".into(),
            use_math_model: true,
            effort_engineering_days: Some(10.0),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    for (name, kpi, formula, primary) in [
        ("M1", "revenue", "value = 85.5", true),
        ("M2", "user_retention", "value = 72.3", false),
    ] {
        db.math_models()
            .upsert(
                key.as_str(),
                name,
                &roadmap_db::MathModelFields {
                    target_kpi_key: Some(kpi.to_string()),
                    formula_text: Some(formula.to_string()),
                    approved_by_user: Some(true),
                    is_primary: Some(primary),
                    ..Default::default()
                },
                "test",
            )
            .await
            .unwrap();
    }

    let sheet = Arc::new(
        InMemorySheet::new()
            .with_tab(
                "Scoring_Inputs",
                vec![
                    vec!["Initiative Key", "Use Math Model", "Run Status"],
                    vec![key.as_str(), "yes", ""],
                ],
            )
            .with_tab(
                "KPI_Contributions",
                vec![
                    vec![
                        "Initiative Key",
                        "KPI Contribution JSON",
                        "KPI Contribution Computed JSON",
                        "KPI Contribution Source",
                        "Run Status",
                    ],
                    vec![key.as_str(), r#"{"revenue": 100.0}"#, "", "", ""],
                ],
            ),
    );

    // PM override via save_selected on the KPI tab.
    let request = ActionRequest {
        sheet_context: Some(SheetContext {
            spreadsheet_id: "productops".to_string(),
            tab: "KPI_Contributions".to_string(),
        }),
        ..selection("pm.save_selected", &[key.as_str()])
    };
    run_action(&db, deps(db.clone(), sheet.clone()), request).await;

    let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
    assert_eq!(row.kpi_contribution_source, Some(ContributionSource::PmOverride));

    // Scoring keeps the override but refreshes the computed snapshot.
    run_action(
        &db,
        deps(db.clone(), sheet.clone()),
        selection("pm.score_selected", &[key.as_str()]),
    )
    .await;
    let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
    assert_eq!(row.kpi_contributions()["revenue"], 100.0);
    assert_eq!(row.kpi_contribution_source, Some(ContributionSource::PmOverride));
    let computed = roadmap_db::parse_kpi_map(row.kpi_contribution_computed_json.as_deref());
    assert_eq!(computed["revenue"], 85.5);
    assert_eq!(computed["user_retention"], 72.3);

    // PM clears the cell: unlock.
    sheet.add_tab(
        "KPI_Contributions",
        vec![
            vec![
                "Initiative Key",
                "KPI Contribution JSON",
                "KPI Contribution Computed JSON",
                "KPI Contribution Source",
                "Run Status",
            ],
            vec![key.as_str(), "", "", "", ""],
        ],
    );
    let request = ActionRequest {
        sheet_context: Some(SheetContext {
            spreadsheet_id: "productops".to_string(),
            tab: "KPI_Contributions".to_string(),
        }),
        ..selection("pm.save_selected", &[key.as_str()])
    };
    let run = run_action(&db, deps(db.clone(), sheet.clone()), request).await;
    assert_eq!(result_of(&run)["unlocked_count"], 1);

    let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
    assert_eq!(row.kpi_contribution_json, None);
    assert_eq!(row.kpi_contribution_source, None);

    // Next scoring run installs computed values in both columns.
    run_action(
        &db,
        deps(db.clone(), sheet.clone()),
        selection("pm.score_selected", &[key.as_str()]),
    )
    .await;
    let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
    assert_eq!(row.kpi_contributions()["revenue"], 85.5);
    assert_eq!(row.kpi_contribution_source, Some(ContributionSource::Computed));
}

fn optimization_tabs(sheet: &InMemorySheet, constraint_rows: Vec<Vec<&str>>) {
    let mut constraints = vec![
        vec!["Scenario", "Constraint Set", "Type", "Dimension", "Dimension Key", "Members", "Value", "Bonus"],
        vec!["(hint)", "", "", "", "", "", "", ""],
        vec!["(hint)", "", "", "", "", "", "", ""],
    ];
    constraints.extend(constraint_rows);
    sheet.add_tab("Constraints", constraints);
    sheet.add_tab(
        "Targets",
        vec![
            vec!["Scenario", "Constraint Set", "Dimension", "Dimension Key", "KPI Key", "Type", "Value"],
            vec!["(hint)", "", "", "", "", "", ""],
            vec!["(hint)", "", "", "", "", "", ""],
        ],
    );
    sheet.add_tab(
        "Candidates",
        vec![
            vec!["Initiative Key", "Title", "Engineering Tokens"],
            vec!["(hint)", "", ""],
            vec!["(hint)", "", ""],
        ],
    );
    sheet.add_tab(
        "Runs",
        vec![
            vec!["Run Id", "Scenario Name", "Status", "Total Objective", "Updated Source", "Updated At"],
            vec!["(hint)", "", "", "", "", ""],
            vec!["(hint)", "", "", "", "", ""],
        ],
    );
    sheet.add_tab(
        "Results",
        vec![
            vec!["Run Id", "Initiative Key", "Selected", "Allocated Tokens"],
            vec!["(hint)", "", "", ""],
            vec!["(hint)", "", "", ""],
        ],
    );
    sheet.add_tab(
        "Gaps",
        vec![
            vec!["Run Id", "Code", "Severity", "Message", "Keys"],
            vec!["(hint)", "", "", "", ""],
            vec!["(hint)", "", "", "", ""],
        ],
    );
}

async fn optimization_candidate(db: &Db, title: &str, tokens: i64, country: &str, ns: f64) -> String {
    let key = seed_initiative(
        db,
        &InitiativeSeed {
            title: title.to_string(),
            country: Some(country.to_string()),
            is_candidate: true,
            period_key: Some("2026-Q1".to_string()),
            engineering_tokens: Some(tokens),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let json = format!(r#"{{"revenue": {ns}}}"#);
    db.initiatives()
        .update_kpi_active(key.as_str(), Some(&json), Some(ContributionSource::Computed))
        .await
        .unwrap();
    key.as_str().to_string()
}

/// An unreachable capacity floor fails the run before the solver.
#[tokio::test]
async fn feasibility_failure_aborts_solve() {
    let db = Db::open_in_memory().await.unwrap();
    seed_metric(&db, "revenue", KpiLevel::NorthStar).await.unwrap();
    optimization_candidate(&db, "A", 10, "UK", 1.0).await;
    optimization_candidate(&db, "B", 5, "UK", 1.0).await;
    optimization_candidate(&db, "C", 20, "UK", 1.0).await;

    let sheet = Arc::new(InMemorySheet::new());
    sheet.add_tab(
        "Scenario_Config",
        vec![
            vec!["Scenario", "Period", "Capacity", "Objective"],
            vec!["(hint)", "", "", ""],
            vec!["(hint)", "", "", ""],
            vec!["Q1-Growth", "2026-Q1", "20", "north_star"],
        ],
    );
    optimization_tabs(
        &sheet,
        vec![vec!["Q1-Growth", "base", "capacity_floor", "country", "UK", "", "40", ""]],
    );

    let run = run_action(
        &db,
        deps(db.clone(), sheet.clone()),
        ActionRequest {
            action: "pm.optimize_run_all_candidates".to_string(),
            scope: Scope::Scenario {
                scenario_name: "Q1-Growth".to_string(),
                constraint_set_name: None,
            },
            ..Default::default()
        },
    )
    .await;
    assert_eq!(run.status, RunState::Succeeded);

    let result = result_of(&run);
    assert_eq!(result["status"], "failed");
    assert_eq!(
        result["feasibility"]["issues"][0]["code"],
        "capacity_floor_unreachable"
    );

    // The optimization run row is failed, with the report persisted and no
    // solver output.
    let opt_run_id = result["run_id"].as_str().unwrap();
    let opt_run = db.optimization().get_run(opt_run_id).await.unwrap().unwrap();
    assert_eq!(opt_run.status, RunState::Failed);
    let persisted: Value = serde_json::from_str(opt_run.result_json.as_deref().unwrap()).unwrap();
    assert_eq!(
        persisted["feasibility"]["issues"][0]["code"],
        "capacity_floor_unreachable"
    );
    assert!(persisted.get("solution").is_none());

    // Gaps row published; Runs row carries the failed status.
    assert_eq!(sheet.cell_text("Gaps", 4, 2).as_deref(), Some("capacity_floor_unreachable"));
    assert_eq!(sheet.cell_text("Runs", 4, 3).as_deref(), Some("failed"));
}

/// Exclusion pair + bundle with a deterministic lexicographic
/// tie-break; results and portfolio persist.
#[tokio::test]
async fn optimization_with_exclusion_and_bundle() {
    let db = Db::open_in_memory().await.unwrap();
    seed_metric(&db, "revenue", KpiLevel::NorthStar).await.unwrap();
    let a = optimization_candidate(&db, "A", 10, "UK", 5.0).await;
    let b = optimization_candidate(&db, "B", 10, "UK", 5.0).await;
    let c = optimization_candidate(&db, "C", 5, "UK", 3.0).await;
    let d = optimization_candidate(&db, "D", 5, "UK", 3.0).await;

    let sheet = Arc::new(InMemorySheet::new());
    sheet.add_tab(
        "Scenario_Config",
        vec![
            vec!["Scenario", "Period", "Capacity", "Objective"],
            vec!["(hint)", "", "", ""],
            vec!["(hint)", "", "", ""],
            vec!["Q1-Growth", "2026-Q1", "20", "north_star"],
        ],
    );
    let members_ab = format!("{a}, {b}");
    let members_cd = format!("{c}, {d}");
    optimization_tabs(
        &sheet,
        vec![
            vec!["Q1-Growth", "base", "exclusion_pair", "", "", members_ab.as_str(), "", ""],
            vec!["Q1-Growth", "base", "bundle", "", "cd_bundle", members_cd.as_str(), "", ""],
        ],
    );

    let run = run_action(
        &db,
        deps(db.clone(), sheet.clone()),
        ActionRequest {
            action: "pm.optimize_run_all_candidates".to_string(),
            scope: Scope::Scenario {
                scenario_name: "Q1-Growth".to_string(),
                constraint_set_name: None,
            },
            ..Default::default()
        },
    )
    .await;
    assert_eq!(run.status, RunState::Succeeded);

    let result = result_of(&run);
    assert_eq!(result["status"], "succeeded");
    assert_eq!(result["solver_status"], "optimal");
    assert_eq!(result["total_objective"], 11_000_000.0);
    assert_eq!(result["selected_count"], 3);

    // A wins the tie over B deterministically.
    let opt_run_id = result["run_id"].as_str().unwrap().to_string();
    let opt_run = db.optimization().get_run(&opt_run_id).await.unwrap().unwrap();
    assert_eq!(opt_run.status, RunState::Succeeded);
    assert!(opt_run.inputs_snapshot_json.is_some());
    let persisted: Value = serde_json::from_str(opt_run.result_json.as_deref().unwrap()).unwrap();
    let selected: Vec<&str> = persisted["solution"]["selected_items"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|item| item["selected"] == true)
        .map(|item| item["initiative_key"].as_str().unwrap())
        .collect();
    assert_eq!(selected, vec![a.as_str(), c.as_str(), d.as_str()]);

    // Results rows appended per candidate, tagged with the run id.
    assert_eq!(sheet.cell_text("Results", 4, 1).as_deref(), Some(opt_run_id.as_str()));
    assert_eq!(sheet.cell_text("Results", 4, 2).as_deref(), Some(a.as_str()));
    assert_eq!(sheet.occupied_rows("Results"), 7); // header + 2 hints + 4 items

    // Runs row appended with the objective.
    assert_eq!(sheet.cell_text("Runs", 4, 3).as_deref(), Some("optimal"));
    assert_eq!(sheet.cell_text("Runs", 4, 4).as_deref(), Some("11000000"));
}
