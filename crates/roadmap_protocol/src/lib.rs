//! Shared protocol types for Roadmap Flow.
//!
//! Wire shapes for the Action API, the canonical configuration container,
//! defaults, and the provenance tokens stamped by every writer.

pub mod action;
pub mod config;
pub mod defaults;
pub mod provenance;

pub use action::{
    ActionOptions, ActionRequest, EnqueueResponse, ErrorBody, PayloadError, RequestedBy,
    RunStatus, RunStatusResponse, Scope, SheetContext,
};
pub use config::Settings;
pub use defaults::SECRET_HEADER;
