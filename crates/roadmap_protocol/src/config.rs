//! Canonical system configuration shared by the API, worker, and jobs.

use crate::defaults;

/// Explicit configuration container; handlers receive it via the action
/// context instead of reading process globals.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Database URL (sqlite:...)
    pub database_url: String,
    /// Action API bind address
    pub api_bind_addr: String,
    /// Shared secret expected in the `X-ROADMAP-AI-SECRET` header
    pub shared_secret: String,
    /// Spreadsheet holding the intake tabs
    pub intake_spreadsheet_id: String,
    /// Intake tab names, comma-separated in the environment
    pub intake_tabs: Vec<String>,
    /// Spreadsheet holding the central backlog
    pub backlog_spreadsheet_id: String,
    pub backlog_tab: String,
    /// ProductOps workbook (scoring inputs, math models, params, KPI registry)
    pub productops_spreadsheet_id: String,
    /// Optimization Center workbook
    pub optimization_spreadsheet_id: String,
    /// Worker loop idle sleep in milliseconds
    pub idle_sleep_ms: u64,
    /// Default DB commit batch size for sync services
    pub commit_every: usize,
    /// Per-handler cap on LLM suggestion calls
    pub max_llm_calls: usize,
    /// Wall-clock cap handed to the solver, in seconds
    pub solver_time_limit_secs: u64,
    /// Append InitiativeScore history rows on every scoring run
    pub enable_score_history: bool,
}

impl Settings {
    /// Read settings from the environment, falling back to canonical
    /// defaults. Missing secret yields an empty string; the API refuses to
    /// start on an empty secret.
    pub fn from_env() -> Self {
        Self {
            database_url: env_or("ROADMAP_DB_URL", defaults::DEFAULT_DB_URL),
            api_bind_addr: env_or("ROADMAP_API_BIND", defaults::DEFAULT_API_BIND_ADDR),
            shared_secret: env_or("ROADMAP_AI_SECRET", ""),
            intake_spreadsheet_id: env_or("ROADMAP_INTAKE_SHEET_ID", ""),
            intake_tabs: env_or("ROADMAP_INTAKE_TABS", "")
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            backlog_spreadsheet_id: env_or("ROADMAP_BACKLOG_SHEET_ID", ""),
            backlog_tab: env_or("ROADMAP_BACKLOG_TAB", "Central_Backlog"),
            productops_spreadsheet_id: env_or("ROADMAP_PRODUCTOPS_SHEET_ID", ""),
            optimization_spreadsheet_id: env_or("ROADMAP_OPTIMIZATION_SHEET_ID", ""),
            idle_sleep_ms: env_parse("ROADMAP_WORKER_IDLE_SLEEP_MS", defaults::DEFAULT_IDLE_SLEEP_MS),
            commit_every: env_parse("ROADMAP_COMMIT_EVERY", defaults::DEFAULT_COMMIT_EVERY),
            max_llm_calls: env_parse("ROADMAP_MAX_LLM_CALLS", defaults::DEFAULT_MAX_LLM_CALLS),
            solver_time_limit_secs: env_parse(
                "ROADMAP_SOLVER_TIME_LIMIT_SECS",
                defaults::DEFAULT_SOLVER_TIME_LIMIT_SECS,
            ),
            enable_score_history: env_parse("ROADMAP_ENABLE_SCORE_HISTORY", false),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: defaults::DEFAULT_DB_URL.to_string(),
            api_bind_addr: defaults::DEFAULT_API_BIND_ADDR.to_string(),
            shared_secret: String::new(),
            intake_spreadsheet_id: String::new(),
            intake_tabs: Vec::new(),
            backlog_spreadsheet_id: String::new(),
            backlog_tab: "Central_Backlog".to_string(),
            productops_spreadsheet_id: String::new(),
            optimization_spreadsheet_id: String::new(),
            idle_sleep_ms: defaults::DEFAULT_IDLE_SLEEP_MS,
            commit_every: defaults::DEFAULT_COMMIT_EVERY,
            max_llm_calls: defaults::DEFAULT_MAX_LLM_CALLS,
            solver_time_limit_secs: defaults::DEFAULT_SOLVER_TIME_LIMIT_SECS,
            enable_score_history: false,
        }
    }
}

fn env_or(name: &str, fallback: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| fallback.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.database_url, "sqlite:roadmap_flow.db");
        assert_eq!(settings.commit_every, 10);
        assert!(!settings.enable_score_history);
    }
}
