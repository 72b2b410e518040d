//! Canonical default values shared across the API, worker, and jobs.

/// Header carrying the shared secret on every Action API request.
pub const SECRET_HEADER: &str = "X-ROADMAP-AI-SECRET";

pub const DEFAULT_DB_URL: &str = "sqlite:roadmap_flow.db";
pub const DEFAULT_API_BIND_ADDR: &str = "127.0.0.1:8787";

/// Worker loop sleep when the ledger has no queued runs.
pub const DEFAULT_IDLE_SLEEP_MS: u64 = 1_000;

/// Default DB commit batch size for sync services.
pub const DEFAULT_COMMIT_EVERY: usize = 10;

/// Per-handler cap on LLM suggestion calls.
pub const DEFAULT_MAX_LLM_CALLS: usize = 20;

/// Wall-clock cap handed to the solver.
pub const DEFAULT_SOLVER_TIME_LIMIT_SECS: u64 = 300;

/// Readers stop after this many consecutive fully-blank rows.
pub const BLANK_ROW_CUTOFF: usize = 50;

/// Writers chunk batch updates to at most this many ranges per call.
pub const MAX_BATCH_RANGES: usize = 200;

/// Per-row `run_status` messages are truncated to this display length.
pub const STATUS_MESSAGE_MAX_LEN: usize = 200;

/// Default per-statement budget for safe formula evaluation.
pub const DEFAULT_FORMULA_TIMEOUT_SECS: u64 = 5;
