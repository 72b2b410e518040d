//! Safe formula evaluation for math-model scoring.
//!
//! A restricted arithmetic script language: assignment statements over float
//! expressions with a fixed function whitelist. Scripts are compiled to a
//! small stack program and interpreted against a `HashMap<String, f64>`
//! environment. Nothing outside the whitelist parses, so user formulas can
//! never reach host evaluation.

mod eval;
mod lexer;
mod parser;

pub use eval::{evaluate_script, extract_identifiers, validate_formula, FUNCTION_WHITELIST};

use thiserror::Error;

/// Errors produced while validating or evaluating a formula script.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormulaError {
    /// The script contains a construct outside the restricted language.
    #[error("invalid formula: {0}")]
    InvalidFormula(String),
    /// Arithmetic failure at run time (division by zero, non-finite result,
    /// unknown identifier).
    #[error("execution error: {0}")]
    ExecutionError(String),
    /// The script never assigned the required `value` variable.
    #[error("script did not assign a variable named 'value'")]
    MissingValue,
    /// The cooperative per-statement deadline was exceeded.
    #[error("formula evaluation exceeded {0} seconds")]
    Timeout(u64),
}
