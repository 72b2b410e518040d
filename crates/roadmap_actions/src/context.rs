//! The action context: validated request payload plus lazily-shared
//! runtime dependencies.

use crate::llm::SuggestionClient;
use roadmap_db::Db;
use roadmap_ids::InitiativeKey;
use roadmap_optimizer::Solver;
use roadmap_protocol::{ActionRequest, Settings, SheetContext};
use roadmap_sheets::SheetClient;
use std::sync::Arc;

/// Runtime dependencies shared by every run a worker executes.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub db: Db,
    pub settings: Arc<Settings>,
    pub sheet: Arc<dyn SheetClient>,
    pub llm: Option<Arc<dyn SuggestionClient>>,
    pub solver: Arc<dyn Solver>,
}

/// Everything a handler receives.
#[derive(Clone)]
pub struct ActionContext {
    pub deps: RuntimeDeps,
    pub request: ActionRequest,
}

impl ActionContext {
    pub fn db(&self) -> &Db {
        &self.deps.db
    }

    pub fn settings(&self) -> &Settings {
        &self.deps.settings
    }

    pub fn sheet(&self) -> &dyn SheetClient {
        self.deps.sheet.as_ref()
    }

    /// Parsed selection keys from the request scope.
    pub fn selection_keys(&self) -> Vec<InitiativeKey> {
        self.request.scope.selection_keys()
    }

    /// Selection keys as plain strings for repository filters.
    pub fn selection_key_strings(&self) -> Vec<String> {
        self.selection_keys()
            .iter()
            .map(|k| k.as_str().to_string())
            .collect()
    }

    /// Raw keys that did not parse as initiative keys.
    pub fn malformed_selection_count(&self) -> usize {
        self.request.scope.raw_selection().len() - self.selection_keys().len()
    }

    pub fn sheet_context(&self) -> SheetContext {
        self.request.sheet_context.clone().unwrap_or_default()
    }

    /// Spreadsheet id from the request, else the configured fallback.
    pub fn spreadsheet_or(&self, fallback: &str) -> String {
        let from_request = self.sheet_context().spreadsheet_id;
        if from_request.is_empty() {
            fallback.to_string()
        } else {
            from_request
        }
    }

    pub fn max_llm_calls(&self) -> usize {
        self.request
            .options
            .max_llm_calls
            .unwrap_or(self.deps.settings.max_llm_calls)
    }
}
