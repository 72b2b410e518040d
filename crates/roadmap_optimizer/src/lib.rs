//! Portfolio optimization: constraint compilation, feasibility checking,
//! problem building, and the pluggable solver contract.

pub mod constraints;
pub mod feasibility;
pub mod problem;
pub mod solver;

pub use constraints::{
    compile_constraints, Bundle, ConstraintKind, ConstraintSetCompiled, RawConstraintRow,
    RawTargetRow, SynergyBonus, TargetSpec, TargetType,
};
pub use feasibility::{check_feasibility, FeasibilityIssue, FeasibilityReport, IssueSeverity};
pub use problem::{
    build_problem, Candidate, ObjectiveSpec, OptimizationProblem, ProblemScope, KPI_SCALE,
};
pub use solver::{
    solve_lexicographic, BranchAndBoundSolver, SelectedItem, SolutionStatus, SolveError, Solver,
    OptimizationSolution,
};
