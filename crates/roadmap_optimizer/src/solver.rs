//! Solver adapter contract and the deterministic reference solver.
//!
//! The reference implementation is a depth-first branch-and-bound over
//! binary selections. Candidates are explored in initiative-key order with
//! the selected branch first, so among equal-objective optima the selection
//! with lexicographically smaller keys wins. No wall-clock state: the
//! search is bounded by a node budget, which keeps results reproducible.

use crate::constraints::{TargetType, ALL};
use crate::problem::{
    compute_coefficients, scale_to_int, ObjectiveSpec, OptimizationProblem,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

/// Relative tolerance used to freeze a prior lexicographic stage's
/// objective before optimizing the next stage.
pub const LEXICOGRAPHIC_EPS: f64 = 1e-6;

/// Node budget for the branch-and-bound search.
const NODE_LIMIT: u64 = 5_000_000;

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("solver rejected the problem: {0}")]
    BadProblem(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionStatus {
    Optimal,
    Feasible,
    Infeasible,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedItem {
    pub initiative_key: String,
    pub selected: bool,
    pub allocated_tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationSolution {
    pub status: SolutionStatus,
    /// One entry per candidate, ordered by initiative key.
    pub selected_items: Vec<SelectedItem>,
    /// Scaled integer objective (KPI units × KPI_SCALE), as a float for the
    /// wire.
    pub total_objective: f64,
    pub diagnostics: Map<String, Value>,
}

/// Problem-in, solution-out. Implementations must be deterministic for a
/// fixed problem and seed.
pub trait Solver: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn solve(&self, problem: &OptimizationProblem) -> Result<OptimizationSolution, SolveError>;
}

/// The in-tree exact solver.
#[derive(Debug, Default)]
pub struct BranchAndBoundSolver;

impl Solver for BranchAndBoundSolver {
    fn name(&self) -> &'static str {
        "branch_and_bound"
    }

    fn version(&self) -> &'static str {
        "0.1.0"
    }

    fn solve(&self, problem: &OptimizationProblem) -> Result<OptimizationSolution, SolveError> {
        if let ObjectiveSpec::Lexicographic { .. } = problem.objective {
            return solve_lexicographic(problem, self);
        }
        Ok(self.solve_single(problem))
    }
}

impl BranchAndBoundSolver {
    fn solve_single(&self, problem: &OptimizationProblem) -> OptimizationSolution {
        let search = Search::new(problem);
        search.run()
    }
}

/// Staged lexicographic solve: optimize each KPI priority in turn, freezing
/// the achieved value of every prior stage as a tight unscoped target floor
/// (relative tolerance `LEXICOGRAPHIC_EPS`).
pub fn solve_lexicographic(
    problem: &OptimizationProblem,
    solver: &dyn Solver,
) -> Result<OptimizationSolution, SolveError> {
    let ObjectiveSpec::Lexicographic { priorities } = &problem.objective else {
        return Err(SolveError::BadProblem(
            "solve_lexicographic requires a lexicographic objective".to_string(),
        ));
    };
    if priorities.is_empty() {
        return Err(SolveError::BadProblem(
            "lexicographic objective has no priorities".to_string(),
        ));
    }

    let mut stage_problem = problem.clone();
    let mut stage_bounds = Vec::new();
    let mut last = None;

    for kpi_key in priorities {
        stage_problem.objective = ObjectiveSpec::NorthStar {
            kpi_key: kpi_key.clone(),
        };
        stage_problem.objective_coefficients =
            compute_coefficients(&stage_problem.candidates, &stage_problem.objective);

        let solution = solver.solve(&stage_problem)?;
        if matches!(solution.status, SolutionStatus::Infeasible | SolutionStatus::Error) {
            return Ok(solution);
        }

        // Achieved contribution sum for this stage's KPI.
        let achieved: f64 = solution
            .selected_items
            .iter()
            .filter(|item| item.selected)
            .filter_map(|item| {
                stage_problem
                    .candidates
                    .iter()
                    .find(|c| c.initiative_key == item.initiative_key)
            })
            .filter_map(|c| c.kpi_contributions.get(kpi_key))
            .sum();
        let frozen = (achieved * (1.0 - LEXICOGRAPHIC_EPS)).max(0.0);
        stage_bounds.push(json!({ "kpi": kpi_key, "achieved": achieved, "frozen_floor": frozen }));

        stage_problem
            .constraints
            .targets
            .entry(ALL.to_string())
            .or_default()
            .entry(ALL.to_string())
            .or_default()
            .insert(
                kpi_key.clone(),
                crate::constraints::TargetSpec {
                    target_type: TargetType::Floor,
                    value: frozen,
                    notes: Some("lexicographic stage freeze".to_string()),
                },
            );
        last = Some(solution);
    }

    let mut solution = last.expect("at least one stage ran");
    solution
        .diagnostics
        .insert("lexicographic_stages".to_string(), Value::Array(stage_bounds));
    Ok(solution)
}

// ---------------------------------------------------------------------------
// Branch-and-bound search
// ---------------------------------------------------------------------------

struct Search<'a> {
    problem: &'a OptimizationProblem,
    order: Vec<&'a str>,
    coefficients: Vec<i64>,
    tokens: Vec<i64>,
    /// Forced assignments from mandatory/exclusion buckets.
    forced: Vec<Option<bool>>,
    /// Suffix sums of positive coefficients for bound pruning.
    positive_suffix: Vec<i64>,
    synergy_total: i64,
}

struct Best {
    objective: i64,
    selection: Vec<bool>,
}

impl<'a> Search<'a> {
    fn new(problem: &'a OptimizationProblem) -> Self {
        let mut order: Vec<&str> = problem
            .candidates
            .iter()
            .map(|c| c.initiative_key.as_str())
            .collect();
        order.sort();

        let coefficients: Vec<i64> = order.iter().map(|key| problem.coefficient(key)).collect();
        let tokens: Vec<i64> = order
            .iter()
            .map(|key| {
                problem
                    .candidates
                    .iter()
                    .find(|c| c.initiative_key == *key)
                    .map(|c| c.engineering_tokens)
                    .unwrap_or(0)
            })
            .collect();
        let forced: Vec<Option<bool>> = order
            .iter()
            .map(|key| {
                let mandatory = problem.constraints.mandatory.contains(*key);
                let excluded = problem.constraints.exclusion_initiatives.contains(*key);
                match (mandatory, excluded) {
                    (true, false) => Some(true),
                    (false, true) => Some(false),
                    (true, true) => Some(false),
                    (false, false) => None,
                }
            })
            .collect();

        let mut positive_suffix = vec![0i64; order.len() + 1];
        for i in (0..order.len()).rev() {
            positive_suffix[i] = positive_suffix[i + 1] + coefficients[i].max(0);
        }
        let synergy_total: i64 = problem
            .constraints
            .synergy_bonuses
            .iter()
            .map(|s| scale_to_int(s.bonus))
            .sum();

        Self {
            problem,
            order,
            coefficients,
            tokens,
            forced,
            positive_suffix,
            synergy_total,
        }
    }

    fn run(self) -> OptimizationSolution {
        let mut best: Option<Best> = None;
        let mut selection = vec![false; self.order.len()];
        let mut nodes: u64 = 0;
        let complete = self.descend(0, 0, 0, &mut selection, &mut best, &mut nodes);

        let mut diagnostics = Map::new();
        diagnostics.insert("nodes_explored".to_string(), json!(nodes));
        diagnostics.insert("search_complete".to_string(), json!(complete));

        match best {
            Some(best) => {
                let selected_items = self
                    .order
                    .iter()
                    .zip(&best.selection)
                    .map(|(key, &selected)| SelectedItem {
                        initiative_key: key.to_string(),
                        selected,
                        allocated_tokens: if selected {
                            self.tokens[self.order.iter().position(|k| k == key).unwrap_or(0)]
                        } else {
                            0
                        },
                    })
                    .collect();
                OptimizationSolution {
                    status: if complete {
                        SolutionStatus::Optimal
                    } else {
                        SolutionStatus::Feasible
                    },
                    selected_items,
                    total_objective: best.objective as f64,
                    diagnostics,
                }
            }
            None => OptimizationSolution {
                status: SolutionStatus::Infeasible,
                selected_items: Vec::new(),
                total_objective: 0.0,
                diagnostics,
            },
        }
    }

    /// Depth-first descent; returns false when the node budget ran out.
    fn descend(
        &self,
        index: usize,
        used_tokens: i64,
        objective: i64,
        selection: &mut Vec<bool>,
        best: &mut Option<Best>,
        nodes: &mut u64,
    ) -> bool {
        *nodes += 1;
        if *nodes > NODE_LIMIT {
            return false;
        }
        if used_tokens > self.problem.capacity_total_tokens {
            return true;
        }
        // Optimistic bound: everything remaining with a positive coefficient
        // plus every synergy bonus.
        if let Some(current_best) = best {
            let bound = objective + self.positive_suffix[index] + self.synergy_total;
            if bound <= current_best.objective {
                return true;
            }
        }

        if index == self.order.len() {
            if let Some(total) = self.evaluate_leaf(selection, objective) {
                let improved = match best {
                    Some(b) => total > b.objective,
                    None => true,
                };
                if improved {
                    *best = Some(Best {
                        objective: total,
                        selection: selection.clone(),
                    });
                }
            }
            return true;
        }

        let choices: &[bool] = match self.forced[index] {
            Some(true) => &[true],
            Some(false) => &[false],
            None => &[true, false],
        };
        for &choice in choices {
            selection[index] = choice;
            let next_tokens = used_tokens + if choice { self.tokens[index] } else { 0 };
            let next_objective = objective + if choice { self.coefficients[index] } else { 0 };
            let complete = self.descend(
                index + 1,
                next_tokens,
                next_objective,
                selection,
                best,
                nodes,
            );
            selection[index] = false;
            if !complete {
                return false;
            }
        }
        true
    }

    /// Full constraint check at a leaf; returns the final objective
    /// including synergy bonuses when the selection is feasible.
    fn evaluate_leaf(&self, selection: &[bool], objective: i64) -> Option<i64> {
        let selected = |key: &str| -> bool {
            self.order
                .iter()
                .position(|k| *k == key)
                .map(|i| selection[i])
                .unwrap_or(false)
        };
        let constraints = &self.problem.constraints;

        // Exclusion pairs: at most one of each.
        for (a, b) in &constraints.exclusion_pairs {
            if selected(a) && selected(b) {
                return None;
            }
        }
        // Bundles: all-or-nothing.
        for bundle in &constraints.bundles {
            let picked = bundle.members.iter().filter(|m| selected(m)).count();
            if picked != 0 && picked != bundle.members.len() {
                return None;
            }
        }
        // Prerequisites: dependent implies every requirement.
        for (dependent, requires) in &constraints.prerequisites {
            if selected(dependent) && !requires.iter().all(|r| selected(r)) {
                return None;
            }
        }
        // Per-slice caps and floors.
        for (check_floor, by_dimension) in [
            (false, &constraints.capacity_caps),
            (true, &constraints.capacity_floors),
        ] {
            for (dimension, by_key) in by_dimension {
                for (dimension_key, limit) in by_key {
                    let slice_tokens: i64 = self
                        .problem
                        .candidates
                        .iter()
                        .filter(|c| c.dimension(dimension) == Some(dimension_key.as_str()))
                        .filter(|c| selected(&c.initiative_key))
                        .map(|c| c.engineering_tokens)
                        .sum();
                    if check_floor && slice_tokens < *limit {
                        return None;
                    }
                    if !check_floor && slice_tokens > *limit {
                        return None;
                    }
                }
            }
        }
        // Target floors, scaled to the solver's integer domain.
        for (dimension, by_key) in &constraints.targets {
            for (dimension_key, by_kpi) in by_key {
                for (kpi_key, spec) in by_kpi {
                    if spec.target_type != TargetType::Floor {
                        continue;
                    }
                    let unscoped = dimension == ALL && dimension_key == ALL;
                    let achieved: f64 = self
                        .problem
                        .candidates
                        .iter()
                        .filter(|c| {
                            unscoped || c.dimension(dimension) == Some(dimension_key.as_str())
                        })
                        .filter(|c| selected(&c.initiative_key))
                        .filter_map(|c| c.kpi_contributions.get(kpi_key))
                        .sum();
                    if scale_to_int(achieved) < scale_to_int(spec.value) {
                        return None;
                    }
                }
            }
        }

        // Synergy bonuses for fully selected groups.
        let mut total = objective;
        for synergy in &constraints.synergy_bonuses {
            if synergy.members.iter().all(|m| selected(m)) {
                total += scale_to_int(synergy.bonus);
            }
        }
        debug!("feasible leaf with objective {total}");
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{Bundle, ConstraintSetCompiled, SynergyBonus};
    use crate::problem::{Candidate, ProblemScope};
    use std::collections::BTreeMap;

    fn candidate(key: &str, tokens: i64, ns: f64) -> Candidate {
        let mut kpis = BTreeMap::new();
        kpis.insert("revenue".to_string(), ns);
        Candidate {
            initiative_key: key.to_string(),
            engineering_tokens: tokens,
            dimensions: BTreeMap::new(),
            kpi_contributions: kpis,
            active_overall_score: None,
        }
    }

    fn north_star_problem(
        candidates: Vec<Candidate>,
        constraints: ConstraintSetCompiled,
        capacity: i64,
    ) -> OptimizationProblem {
        let objective = ObjectiveSpec::NorthStar {
            kpi_key: "revenue".to_string(),
        };
        let objective_coefficients = compute_coefficients(&candidates, &objective);
        OptimizationProblem {
            scenario_name: "Q1-Growth".to_string(),
            set_name: "base".to_string(),
            scope: ProblemScope::AllCandidates,
            capacity_total_tokens: capacity,
            candidates,
            constraints,
            objective,
            objective_coefficients,
            diagnostics: Map::new(),
        }
    }

    fn selected_keys(solution: &OptimizationSolution) -> Vec<&str> {
        solution
            .selected_items
            .iter()
            .filter(|i| i.selected)
            .map(|i| i.initiative_key.as_str())
            .collect()
    }

    #[test]
    fn knapsack_respects_capacity() {
        let problem = north_star_problem(
            vec![
                candidate("INIT-000001", 10, 5.0),
                candidate("INIT-000002", 10, 4.0),
                candidate("INIT-000003", 10, 3.0),
            ],
            ConstraintSetCompiled::default(),
            20,
        );
        let solution = BranchAndBoundSolver.solve(&problem).unwrap();
        assert_eq!(solution.status, SolutionStatus::Optimal);
        assert_eq!(selected_keys(&solution), vec!["INIT-000001", "INIT-000002"]);
        assert_eq!(solution.total_objective, 9_000_000.0);
    }

    #[test]
    fn exclusion_pair_and_bundle_with_lexicographic_tie_break() {
        // A(10, ns=5), B(10, ns=5), C(5, ns=3), D(5, ns=3); capacity 20;
        // exclusion (A, B); bundle {C, D}.
        let mut constraints = ConstraintSetCompiled::default();
        constraints
            .exclusion_pairs
            .push(("INIT-000001".to_string(), "INIT-000002".to_string()));
        constraints.bundles.push(Bundle {
            name: "cd".to_string(),
            members: vec!["INIT-000003".to_string(), "INIT-000004".to_string()],
        });
        let problem = north_star_problem(
            vec![
                candidate("INIT-000001", 10, 5.0),
                candidate("INIT-000002", 10, 5.0),
                candidate("INIT-000003", 5, 3.0),
                candidate("INIT-000004", 5, 3.0),
            ],
            constraints,
            20,
        );
        let solution = BranchAndBoundSolver.solve(&problem).unwrap();
        assert_eq!(solution.status, SolutionStatus::Optimal);
        // A wins the tie over B because its key sorts first.
        assert_eq!(
            selected_keys(&solution),
            vec!["INIT-000001", "INIT-000003", "INIT-000004"]
        );
        assert_eq!(solution.total_objective, 11_000_000.0);
        let allocated: i64 = solution
            .selected_items
            .iter()
            .map(|i| i.allocated_tokens)
            .sum();
        assert_eq!(allocated, 20);
    }

    #[test]
    fn mandatory_and_exclusions_are_forced() {
        let mut constraints = ConstraintSetCompiled::default();
        constraints.mandatory.insert("INIT-000003".to_string());
        constraints
            .exclusion_initiatives
            .insert("INIT-000001".to_string());
        let problem = north_star_problem(
            vec![
                candidate("INIT-000001", 5, 100.0),
                candidate("INIT-000002", 5, 1.0),
                candidate("INIT-000003", 5, 0.0),
            ],
            constraints,
            10,
        );
        let solution = BranchAndBoundSolver.solve(&problem).unwrap();
        assert_eq!(selected_keys(&solution), vec!["INIT-000002", "INIT-000003"]);
    }

    #[test]
    fn prerequisites_bind_selection() {
        let mut constraints = ConstraintSetCompiled::default();
        constraints.prerequisites.insert(
            "INIT-000002".to_string(),
            vec!["INIT-000001".to_string()],
        );
        // B is worth more than capacity allows together with A.
        let problem = north_star_problem(
            vec![candidate("INIT-000001", 8, 0.5), candidate("INIT-000002", 8, 10.0)],
            constraints,
            10,
        );
        let solution = BranchAndBoundSolver.solve(&problem).unwrap();
        // B alone is illegal; A alone beats nothing.
        assert_eq!(selected_keys(&solution), vec!["INIT-000001"]);
    }

    #[test]
    fn synergy_bonus_changes_the_winner() {
        let mut constraints = ConstraintSetCompiled::default();
        constraints.synergy_bonuses.push(SynergyBonus {
            members: vec!["INIT-000002".to_string(), "INIT-000003".to_string()],
            bonus: 4.0,
        });
        // Alone, A(6) beats B+C (2.5 + 2.5); with the bonus B+C reach 9.
        let problem = north_star_problem(
            vec![
                candidate("INIT-000001", 10, 6.0),
                candidate("INIT-000002", 5, 2.5),
                candidate("INIT-000003", 5, 2.5),
            ],
            constraints,
            10,
        );
        let solution = BranchAndBoundSolver.solve(&problem).unwrap();
        assert_eq!(selected_keys(&solution), vec!["INIT-000002", "INIT-000003"]);
        assert_eq!(solution.total_objective, 9_000_000.0);
    }

    #[test]
    fn infeasible_when_mandatory_exceeds_capacity() {
        let mut constraints = ConstraintSetCompiled::default();
        constraints.mandatory.insert("INIT-000001".to_string());
        let problem = north_star_problem(
            vec![candidate("INIT-000001", 50, 1.0)],
            constraints,
            10,
        );
        let solution = BranchAndBoundSolver.solve(&problem).unwrap();
        assert_eq!(solution.status, SolutionStatus::Infeasible);
    }

    #[test]
    fn repeated_solves_are_identical() {
        let mut constraints = ConstraintSetCompiled::default();
        constraints
            .exclusion_pairs
            .push(("INIT-000001".to_string(), "INIT-000002".to_string()));
        let problem = north_star_problem(
            vec![
                candidate("INIT-000001", 10, 5.0),
                candidate("INIT-000002", 10, 5.0),
                candidate("INIT-000003", 5, 3.0),
            ],
            constraints,
            20,
        );
        let first = BranchAndBoundSolver.solve(&problem).unwrap();
        let second = BranchAndBoundSolver.solve(&problem).unwrap();
        assert_eq!(first.selected_items, second.selected_items);
        assert_eq!(first.total_objective, second.total_objective);
    }

    #[test]
    fn lexicographic_stages_freeze_prior_objectives() {
        // Priority: revenue first, then retention. A and B tie on revenue;
        // B is better on retention, so stage 2 must pick B.
        let mut a = candidate("INIT-000001", 10, 5.0);
        a.kpi_contributions.insert("user_retention".to_string(), 1.0);
        let mut b = candidate("INIT-000002", 10, 5.0);
        b.kpi_contributions.insert("user_retention".to_string(), 3.0);

        let candidates = vec![a, b];
        let objective = ObjectiveSpec::Lexicographic {
            priorities: vec!["revenue".to_string(), "user_retention".to_string()],
        };
        let objective_coefficients = compute_coefficients(&candidates, &objective);
        let problem = OptimizationProblem {
            scenario_name: "Q1".to_string(),
            set_name: "base".to_string(),
            scope: ProblemScope::AllCandidates,
            capacity_total_tokens: 10,
            candidates,
            constraints: ConstraintSetCompiled::default(),
            objective,
            objective_coefficients,
            diagnostics: Map::new(),
        };

        let solution = BranchAndBoundSolver.solve(&problem).unwrap();
        assert_eq!(selected_keys(&solution), vec!["INIT-000002"]);
        assert!(solution.diagnostics.contains_key("lexicographic_stages"));
    }
}
