//! The action execution plane: registry, runner, worker loop, and the job
//! handlers behind every registered action name.

pub mod context;
pub mod jobs;
pub mod llm;
pub mod registry;
pub mod runner;
pub mod worker;

pub use context::{ActionContext, RuntimeDeps};
pub use llm::{ModelSuggestionRequest, ModelSuggestionResponse, SuggestionClient};
pub use registry::ActionRegistry;
pub use runner::ActionRunner;
pub use worker::WorkerLoop;
