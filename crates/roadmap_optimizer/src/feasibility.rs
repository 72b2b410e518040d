//! Pre-solver static feasibility checks.
//!
//! Every check always runs; all issues are collected into one report. An
//! error-level report must skip the solver and fail the run.

use crate::constraints::{ConstraintSetCompiled, TargetType, ALL};
use crate::problem::{Candidate, OptimizationProblem};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeasibilityIssue {
    pub code: String,
    pub severity: IssueSeverity,
    pub message: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeasibilityReport {
    pub status: String,
    pub issues: Vec<FeasibilityIssue>,
}

impl FeasibilityReport {
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

/// Run every static check against the assembled problem.
pub fn check_feasibility(problem: &OptimizationProblem) -> FeasibilityReport {
    let mut issues = Vec::new();
    let candidates: HashMap<&str, &Candidate> = problem
        .candidates
        .iter()
        .map(|c| (c.initiative_key.as_str(), c))
        .collect();
    let constraints = &problem.constraints;

    check_references(constraints, &candidates, &mut issues);
    check_prerequisite_cycles(constraints, &mut issues);
    check_capacity_floors(constraints, &problem.candidates, &mut issues);
    check_target_floors(constraints, &problem.candidates, &mut issues);
    check_mandatory_exclusions(constraints, &mut issues);
    check_bundle_exclusions(constraints, &mut issues);

    let status = if issues.iter().any(|i| i.severity == IssueSeverity::Error) {
        "error"
    } else if issues.is_empty() {
        "ok"
    } else {
        "warn"
    };
    FeasibilityReport {
        status: status.to_string(),
        issues,
    }
}

fn check_references(
    constraints: &ConstraintSetCompiled,
    candidates: &HashMap<&str, &Candidate>,
    issues: &mut Vec<FeasibilityIssue>,
) {
    let missing: Vec<String> = constraints
        .referenced_keys()
        .into_iter()
        .filter(|key| !candidates.contains_key(key))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        issues.push(FeasibilityIssue {
            code: "unknown_reference".to_string(),
            severity: IssueSeverity::Error,
            message: format!(
                "constraints reference keys outside the candidate set: {}",
                missing.join(", ")
            ),
            keys: missing,
        });
    }
}

/// DFS with color marking; reports the cycle path.
fn check_prerequisite_cycles(
    constraints: &ConstraintSetCompiled,
    issues: &mut Vec<FeasibilityIssue>,
) {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let graph = &constraints.prerequisites;
    let mut colors: BTreeMap<&str, Color> = BTreeMap::new();
    for (dependent, requires) in graph {
        colors.insert(dependent, Color::White);
        for requirement in requires {
            colors.insert(requirement, Color::White);
        }
    }

    fn visit<'a>(
        node: &'a str,
        graph: &'a BTreeMap<String, Vec<String>>,
        colors: &mut BTreeMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        colors.insert(node, Color::Gray);
        stack.push(node);
        if let Some(requires) = graph.get(node) {
            for next in requires {
                match colors.get(next.as_str()).copied().unwrap_or(Color::White) {
                    Color::Gray => {
                        let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|n| n.to_string()).collect();
                        path.push(next.clone());
                        return Some(path);
                    }
                    Color::White => {
                        if let Some(cycle) = visit(next, graph, colors, stack) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
        }
        stack.pop();
        colors.insert(node, Color::Black);
        None
    }

    let nodes: Vec<&str> = colors.keys().copied().collect();
    for node in nodes {
        if colors.get(node) == Some(&Color::White) {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(node, graph, &mut colors, &mut stack) {
                issues.push(FeasibilityIssue {
                    code: "prerequisite_cycle".to_string(),
                    severity: IssueSeverity::Error,
                    message: format!("prerequisite cycle: {}", cycle.join(" -> ")),
                    keys: cycle,
                });
                return;
            }
        }
    }
}

/// Optimistic check: selecting every candidate in the slice must reach the
/// floor, or no selection can.
fn check_capacity_floors(
    constraints: &ConstraintSetCompiled,
    candidates: &[Candidate],
    issues: &mut Vec<FeasibilityIssue>,
) {
    for (dimension, by_key) in &constraints.capacity_floors {
        for (dimension_key, floor) in by_key {
            let optimistic_max: i64 = candidates
                .iter()
                .filter(|c| c.dimension(dimension) == Some(dimension_key.as_str()))
                .map(|c| c.engineering_tokens)
                .sum();
            if optimistic_max < *floor {
                issues.push(FeasibilityIssue {
                    code: "capacity_floor_unreachable".to_string(),
                    severity: IssueSeverity::Error,
                    message: format!(
                        "capacity floor on ({dimension}, {dimension_key}) requires {floor} tokens, optimistic max is {optimistic_max}"
                    ),
                    keys: vec![dimension.clone(), dimension_key.clone()],
                });
            }
        }
    }
}

/// Optimistic KPI upper bound: even selecting everything, an unreachable
/// target floor stays unreachable.
fn check_target_floors(
    constraints: &ConstraintSetCompiled,
    candidates: &[Candidate],
    issues: &mut Vec<FeasibilityIssue>,
) {
    for (dimension, by_key) in &constraints.targets {
        for (dimension_key, by_kpi) in by_key {
            for (kpi_key, spec) in by_kpi {
                if spec.target_type != TargetType::Floor {
                    continue;
                }
                let in_slice = |c: &&Candidate| {
                    dimension == ALL && dimension_key == ALL
                        || c.dimension(dimension) == Some(dimension_key.as_str())
                };
                let optimistic: f64 = candidates
                    .iter()
                    .filter(in_slice)
                    .filter_map(|c| c.kpi_contributions.get(kpi_key))
                    .sum();
                if optimistic < spec.value {
                    issues.push(FeasibilityIssue {
                        code: "target_floor_unreachable".to_string(),
                        severity: IssueSeverity::Error,
                        message: format!(
                            "target floor {kpi_key}={} on ({dimension}, {dimension_key}) exceeds the optimistic sum {optimistic}",
                            spec.value
                        ),
                        keys: vec![dimension.clone(), dimension_key.clone(), kpi_key.clone()],
                    });
                }
            }
        }
    }
}

fn check_mandatory_exclusions(
    constraints: &ConstraintSetCompiled,
    issues: &mut Vec<FeasibilityIssue>,
) {
    let conflicted: Vec<String> = constraints
        .mandatory
        .intersection(&constraints.exclusion_initiatives)
        .cloned()
        .collect();
    if !conflicted.is_empty() {
        issues.push(FeasibilityIssue {
            code: "mandatory_excluded".to_string(),
            severity: IssueSeverity::Error,
            message: format!(
                "initiatives are both mandatory and excluded: {}",
                conflicted.join(", ")
            ),
            keys: conflicted,
        });
    }
}

fn check_bundle_exclusions(
    constraints: &ConstraintSetCompiled,
    issues: &mut Vec<FeasibilityIssue>,
) {
    for bundle in &constraints.bundles {
        let excluded: Vec<String> = bundle
            .members
            .iter()
            .filter(|m| constraints.exclusion_initiatives.contains(*m))
            .cloned()
            .collect();
        if !excluded.is_empty() {
            issues.push(FeasibilityIssue {
                code: "bundle_member_excluded".to_string(),
                severity: IssueSeverity::Error,
                message: format!(
                    "bundle {} contains excluded members: {}",
                    bundle.name,
                    excluded.join(", ")
                ),
                keys: excluded,
            });
        }
    }
}
