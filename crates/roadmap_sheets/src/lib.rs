//! Sheet I/O for Roadmap Flow.
//!
//! The spreadsheet transport is abstracted behind the [`SheetClient`]
//! capability; everything above it is transport-agnostic. Readers turn tab
//! rectangles into typed row records with sheet row numbers; writers turn
//! records into inspectable batch plans scoped to the columns each data path
//! owns; sync services pipe readers into repository upserts and collect
//! per-row outcomes.

pub mod cells;
pub mod client;
pub mod header;
pub mod reader;
pub mod readers;
pub mod sync;
pub mod writers;

pub use cells::CellValue;
pub use client::{BatchPlan, RangeWrite, Rect, SheetClient, SheetError};
pub use sync::{RowFailure, SyncOutcome};
