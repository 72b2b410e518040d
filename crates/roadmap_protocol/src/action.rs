//! Action API wire types.
//!
//! These shapes are shared by the HTTP server, the ledger, and the worker.
//! All enums use strict snake_case tagging so the spreadsheet UI and the
//! Rust side never disagree on spelling.

use roadmap_ids::{ActionRunId, InitiativeKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Execution state of one ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Selection scope attached to an action request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scope {
    /// No scope: the action operates on everything it owns.
    #[default]
    None,
    /// Explicit initiative selection from the sheet UI.
    Selection { initiative_keys: Vec<String> },
    /// Scenario-level scope for optimization actions.
    Scenario {
        scenario_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        constraint_set_name: Option<String>,
    },
}

impl Scope {
    /// Parsed initiative keys of a selection scope; malformed keys are
    /// dropped (the handler reports them as `skipped_no_key`).
    pub fn selection_keys(&self) -> Vec<InitiativeKey> {
        match self {
            Self::Selection { initiative_keys } => initiative_keys
                .iter()
                .filter_map(|raw| InitiativeKey::parse(raw).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Raw key strings of a selection scope, malformed included.
    pub fn raw_selection(&self) -> &[String] {
        match self {
            Self::Selection { initiative_keys } => initiative_keys,
            _ => &[],
        }
    }
}

/// Which spreadsheet/tab the request originated from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetContext {
    #[serde(default)]
    pub spreadsheet_id: String,
    #[serde(default)]
    pub tab: String,
}

/// Free-form per-request options with typed accessors for the common ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_every: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_llm_calls: Option<usize>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Who asked for the action to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedBy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

/// Body of `POST /actions/run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_context: Option<SheetContext>,
    #[serde(default)]
    pub options: ActionOptions,
    #[serde(default)]
    pub requested_by: RequestedBy,
}

/// Structural problems with an action request payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("action name must not be empty")]
    EmptyAction,
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("action {0} requires a selection scope")]
    MissingSelection(String),
}

impl ActionRequest {
    /// Shape validation that does not need the registry.
    pub fn validate_shape(&self) -> Result<(), PayloadError> {
        if self.action.trim().is_empty() {
            return Err(PayloadError::EmptyAction);
        }
        Ok(())
    }
}

/// Response of `POST /actions/run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub run_id: ActionRunId,
    pub status: RunStatus,
}

/// Response of `GET /actions/run/{run_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusResponse {
    pub run_id: ActionRunId,
    pub status: RunStatus,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub result: Option<Value>,
    pub error_text: Option<String>,
}

/// JSON error body for 4xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: None,
        }
    }

    pub fn with_detail(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: Some(detail.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_defaults_to_none() {
        let req: ActionRequest =
            serde_json::from_str(r#"{"action": "pm.backlog_sync"}"#).unwrap();
        assert_eq!(req.scope, Scope::None);
        assert!(req.scope.selection_keys().is_empty());
    }

    #[test]
    fn selection_scope_parses_keys() {
        let body = r#"{
            "action": "pm.score_selected",
            "scope": {"type": "selection", "initiative_keys": ["INIT-000001", "bogus"]},
            "sheet_context": {"spreadsheet_id": "abc", "tab": "Scoring_Inputs"},
            "options": {"commit_every": 10},
            "requested_by": {"ui": "apps_script", "user_email": "pm@example.com"}
        }"#;
        let req: ActionRequest = serde_json::from_str(body).unwrap();
        let keys = req.scope.selection_keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].as_str(), "INIT-000001");
        assert_eq!(req.scope.raw_selection().len(), 2);
        assert_eq!(req.options.commit_every, Some(10));
    }

    #[test]
    fn empty_action_is_rejected() {
        let req = ActionRequest {
            action: "  ".into(),
            ..Default::default()
        };
        assert_eq!(req.validate_shape(), Err(PayloadError::EmptyAction));
    }

    #[test]
    fn run_status_round_trips() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert!(RunStatus::Queued.is_terminal() == false);
        assert!(RunStatus::Failed.is_terminal());
    }
}
