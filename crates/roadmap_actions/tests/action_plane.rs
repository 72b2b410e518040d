//! Ledger → worker → handler lifecycle over the in-memory transport.

use roadmap_actions::{ActionRegistry, ActionRunner, RuntimeDeps, WorkerLoop};
use roadmap_db::{Db, Framework, RunState};
use roadmap_ids::ActionRunId;
use roadmap_optimizer::BranchAndBoundSolver;
use roadmap_protocol::{ActionRequest, Scope, Settings, SheetContext};
use roadmap_test_utils::{seed_initiative, InMemorySheet, InitiativeSeed};
use std::sync::Arc;

fn deps(db: Db, sheet: InMemorySheet) -> RuntimeDeps {
    let settings = Settings {
        productops_spreadsheet_id: "productops".to_string(),
        backlog_spreadsheet_id: "backlog".to_string(),
        intake_spreadsheet_id: "intake".to_string(),
        intake_tabs: vec!["Marketing_EMEA".to_string()],
        ..Default::default()
    };
    RuntimeDeps {
        db,
        settings: Arc::new(settings),
        sheet: Arc::new(sheet),
        llm: None,
        solver: Arc::new(BranchAndBoundSolver),
    }
}

fn runner(deps: RuntimeDeps) -> ActionRunner {
    ActionRunner::new(Arc::new(ActionRegistry::with_default_actions()), deps)
}

async fn enqueue(db: &Db, request: &ActionRequest) -> ActionRunId {
    let run_id = ActionRunId::mint(chrono::Utc::now());
    db.ledger()
        .enqueue(
            &run_id,
            &request.action,
            &serde_json::to_string(request).unwrap(),
            None,
        )
        .await
        .unwrap();
    run_id
}

#[tokio::test]
async fn worker_drains_queue_and_records_results() {
    let db = Db::open_in_memory().await.unwrap();
    let key = seed_initiative(
        &db,
        &InitiativeSeed {
            title: "Checkout".into(),
            rice: Some((10_000.0, 3.0, 0.7, 20.0)),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let sheet = InMemorySheet::new().with_tab(
        "Scoring_Inputs",
        vec![
            vec!["Initiative Key", "Reach", "Impact", "Confidence", "Effort", "Run Status"],
            vec![key.as_str(), "10000", "3", "0.7", "20", ""],
        ],
    );
    sheet.add_tab(
        "KPI_Contributions",
        vec![vec!["Initiative Key", "KPI Contribution JSON", "KPI Contribution Computed JSON", "KPI Contribution Source"]],
    );

    let request = ActionRequest {
        action: "pm.score_selected".to_string(),
        scope: Scope::Selection {
            initiative_keys: vec![key.as_str().to_string()],
        },
        sheet_context: Some(SheetContext {
            spreadsheet_id: "productops".to_string(),
            tab: "Scoring_Inputs".to_string(),
        }),
        ..Default::default()
    };
    let run_id = enqueue(&db, &request).await;

    let worker = WorkerLoop::new(runner(deps(db.clone(), sheet)), 10, Some(5));
    let executed = worker.run().await.unwrap();
    assert_eq!(executed, 1);

    let run = db.ledger().get(run_id.as_str()).await.unwrap().unwrap();
    assert_eq!(run.status, RunState::Succeeded);
    let result: serde_json::Value = serde_json::from_str(run.result_json.as_deref().unwrap()).unwrap();
    assert_eq!(result["summary"]["selected_count"], 1);
    assert_eq!(result["saved_count"], 1);

    // RICE scores landed in the DB.
    let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
    assert_eq!(row.rice_overall_score, Some(1_050.0));
}

#[tokio::test]
async fn empty_selection_bails_without_side_effects() {
    let db = Db::open_in_memory().await.unwrap();
    let sheet = InMemorySheet::new();
    let request = ActionRequest {
        action: "pm.score_selected".to_string(),
        scope: Scope::Selection {
            initiative_keys: vec![],
        },
        ..Default::default()
    };
    let run_id = enqueue(&db, &request).await;

    let worker = WorkerLoop::new(runner(deps(db.clone(), sheet)), 10, Some(5));
    worker.run().await.unwrap();

    let run = db.ledger().get(run_id.as_str()).await.unwrap().unwrap();
    assert_eq!(run.status, RunState::Succeeded);
    let result: serde_json::Value = serde_json::from_str(run.result_json.as_deref().unwrap()).unwrap();
    assert_eq!(result["selected_count"], 0);
}

#[tokio::test]
async fn unknown_action_fails_the_run() {
    let db = Db::open_in_memory().await.unwrap();
    let request = ActionRequest {
        action: "pm.does_not_exist".to_string(),
        ..Default::default()
    };
    let run_id = enqueue(&db, &request).await;

    let worker = WorkerLoop::new(runner(deps(db.clone(), InMemorySheet::new())), 10, Some(5));
    worker.run().await.unwrap();

    let run = db.ledger().get(run_id.as_str()).await.unwrap().unwrap();
    assert_eq!(run.status, RunState::Failed);
    assert!(run.error_text.unwrap().contains("unknown action"));
}

#[tokio::test]
async fn handler_error_lands_in_error_text_and_loop_continues() {
    let db = Db::open_in_memory().await.unwrap();
    // save_selected without a tab errors inside the handler.
    let bad = ActionRequest {
        action: "pm.save_selected".to_string(),
        scope: Scope::Selection {
            initiative_keys: vec!["INIT-000001".to_string()],
        },
        ..Default::default()
    };
    let good = ActionRequest {
        action: "pm.seed_math_params".to_string(),
        scope: Scope::Selection {
            initiative_keys: vec![],
        },
        ..Default::default()
    };
    let bad_id = enqueue(&db, &bad).await;
    let good_id = enqueue(&db, &good).await;

    let worker = WorkerLoop::new(runner(deps(db.clone(), InMemorySheet::new())), 10, Some(5));
    let executed = worker.run().await.unwrap();
    assert_eq!(executed, 2);

    let bad_run = db.ledger().get(bad_id.as_str()).await.unwrap().unwrap();
    assert_eq!(bad_run.status, RunState::Failed);
    assert!(bad_run.error_text.unwrap().contains("sheet_context.tab"));

    let good_run = db.ledger().get(good_id.as_str()).await.unwrap().unwrap();
    assert_eq!(good_run.status, RunState::Succeeded);
}

#[tokio::test]
async fn switch_framework_copies_stored_scores() {
    let db = Db::open_in_memory().await.unwrap();
    let key = seed_initiative(
        &db,
        &InitiativeSeed {
            title: "Checkout".into(),
            rice: Some((10_000.0, 3.0, 0.7, 20.0)),
            active_framework: Some(Framework::Rice),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    db.initiatives()
        .update_framework_scores(
            key.as_str(),
            Framework::Rice,
            &roadmap_db::ScoreTriple {
                value_score: Some(21_000.0),
                effort_score: Some(20.0),
                overall_score: Some(1_050.0),
            },
        )
        .await
        .unwrap();

    let sheet = InMemorySheet::new().with_tab(
        "Scoring_Inputs",
        vec![vec!["Initiative Key", "Overall Score"], vec![key.as_str(), ""]],
    );
    let request = ActionRequest {
        action: "pm.switch_framework".to_string(),
        scope: Scope::Selection {
            initiative_keys: vec![key.as_str().to_string()],
        },
        ..Default::default()
    };
    enqueue(&db, &request).await;

    let worker = WorkerLoop::new(runner(deps(db.clone(), sheet)), 10, Some(5));
    worker.run().await.unwrap();

    let row = db.initiatives().find_by_key(key.as_str()).await.unwrap().unwrap();
    assert_eq!(row.value_score, Some(21_000.0));
    assert_eq!(row.effort_score, Some(20.0));
    assert_eq!(row.overall_score, Some(1_050.0));
    assert_eq!(row.scoring_updated_source.as_deref(), Some("flow2.activate"));
}
