//! The LLM suggestion capability.
//!
//! The concrete provider lives outside the core; handlers only see typed
//! requests and responses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Context handed to the provider for one math-model suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSuggestionRequest {
    pub initiative_key: String,
    pub title: String,
    pub problem_statement: Option<String>,
    pub desired_outcome: Option<String>,
    pub strategic_theme: Option<String>,
    /// The active north-star KPI, as a targeting hint.
    pub north_star_kpi: Option<String>,
    pub existing_model_names: Vec<String>,
}

/// What the provider proposes. Only LLM-owned columns are ever written
/// from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSuggestionResponse {
    pub model_name: String,
    pub target_kpi_key: Option<String>,
    pub formula_text: String,
    pub assumptions_text: Option<String>,
    pub metric_chain_text: Option<String>,
}

#[async_trait]
pub trait SuggestionClient: Send + Sync {
    async fn suggest_math_model(
        &self,
        request: &ModelSuggestionRequest,
    ) -> anyhow::Result<ModelSuggestionResponse>;
}
