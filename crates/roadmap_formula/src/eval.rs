//! Whitelist validation, compilation to a stack program, and interpretation.

use crate::parser::{parse_script, BinOp, Expr, Statement};
use crate::FormulaError;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Functions callable from a formula, with their accepted arities.
pub const FUNCTION_WHITELIST: &[(&str, &[usize])] = &[
    ("min", &[]),   // variadic, >= 1
    ("max", &[]),   // variadic, >= 1
    ("abs", &[1]),
    ("round", &[1, 2]),
    ("floor", &[1]),
    ("ceil", &[1]),
    ("log", &[1, 2]),
    ("log10", &[1]),
    ("exp", &[1]),
    ("sqrt", &[1]),
    ("pow", &[2]),
];

fn check_call(func: &str, arity: usize) -> Result<(), FormulaError> {
    let entry = FUNCTION_WHITELIST
        .iter()
        .find(|(name, _)| *name == func)
        .ok_or_else(|| FormulaError::InvalidFormula(format!("call to unknown name: {func}")))?;
    let ok = if entry.1.is_empty() {
        arity >= 1
    } else {
        entry.1.contains(&arity)
    };
    if !ok {
        return Err(FormulaError::InvalidFormula(format!(
            "{func} does not take {arity} arguments"
        )));
    }
    Ok(())
}

/// One stack-machine instruction. Programs are flat postorder encodings of
/// the expression tree.
#[derive(Debug, Clone, PartialEq)]
enum Instr {
    Push(f64),
    Load(String),
    Negate,
    Binary(BinOp),
    Call { func: String, arity: usize },
}

fn compile_expr(expr: &Expr, out: &mut Vec<Instr>) -> Result<(), FormulaError> {
    match expr {
        Expr::Number(value) => out.push(Instr::Push(*value)),
        Expr::Ident(name) => out.push(Instr::Load(name.clone())),
        Expr::Unary { negate, operand } => {
            compile_expr(operand, out)?;
            if *negate {
                out.push(Instr::Negate);
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            compile_expr(lhs, out)?;
            compile_expr(rhs, out)?;
            out.push(Instr::Binary(*op));
        }
        Expr::Call { func, args } => {
            check_call(func, args.len())?;
            for arg in args {
                compile_expr(arg, out)?;
            }
            out.push(Instr::Call {
                func: func.clone(),
                arity: args.len(),
            });
        }
    }
    Ok(())
}

fn run_program(
    program: &[Instr],
    env: &HashMap<String, f64>,
    line: usize,
) -> Result<f64, FormulaError> {
    let mut stack: Vec<f64> = Vec::with_capacity(8);

    for instr in program {
        match instr {
            Instr::Push(value) => stack.push(*value),
            Instr::Load(name) => {
                let value = env.get(name).copied().ok_or_else(|| {
                    FormulaError::ExecutionError(format!("line {line}: unknown variable: {name}"))
                })?;
                stack.push(value);
            }
            Instr::Negate => {
                let value = pop(&mut stack, line)?;
                stack.push(-value);
            }
            Instr::Binary(op) => {
                let rhs = pop(&mut stack, line)?;
                let lhs = pop(&mut stack, line)?;
                let result = match op {
                    BinOp::Add => lhs + rhs,
                    BinOp::Sub => lhs - rhs,
                    BinOp::Mul => lhs * rhs,
                    BinOp::Div => {
                        if rhs == 0.0 {
                            return Err(FormulaError::ExecutionError(format!(
                                "line {line}: division by zero"
                            )));
                        }
                        lhs / rhs
                    }
                    BinOp::Pow => lhs.powf(rhs),
                };
                stack.push(result);
            }
            Instr::Call { func, arity } => {
                let start = stack.len().checked_sub(*arity).ok_or_else(|| {
                    FormulaError::ExecutionError(format!("line {line}: stack underflow"))
                })?;
                let args: Vec<f64> = stack.split_off(start);
                stack.push(call_function(func, &args, line)?);
            }
        }
    }

    let result = pop(&mut stack, line)?;
    if !result.is_finite() {
        return Err(FormulaError::ExecutionError(format!(
            "line {line}: non-finite result"
        )));
    }
    Ok(result)
}

fn pop(stack: &mut Vec<f64>, line: usize) -> Result<f64, FormulaError> {
    stack
        .pop()
        .ok_or_else(|| FormulaError::ExecutionError(format!("line {line}: stack underflow")))
}

fn call_function(func: &str, args: &[f64], line: usize) -> Result<f64, FormulaError> {
    let value = match (func, args) {
        ("min", _) => args.iter().copied().fold(f64::INFINITY, f64::min),
        ("max", _) => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ("abs", [x]) => x.abs(),
        ("round", [x]) => x.round(),
        ("round", [x, digits]) => {
            let factor = 10f64.powi(*digits as i32);
            (x * factor).round() / factor
        }
        ("floor", [x]) => x.floor(),
        ("ceil", [x]) => x.ceil(),
        ("log", [x]) => x.ln(),
        ("log", [x, base]) => x.log(*base),
        ("log10", [x]) => x.log10(),
        ("exp", [x]) => x.exp(),
        ("sqrt", [x]) => x.sqrt(),
        ("pow", [x, y]) => x.powf(*y),
        _ => {
            return Err(FormulaError::ExecutionError(format!(
                "line {line}: bad call to {func}"
            )))
        }
    };
    Ok(value)
}

/// Execute a script against a starting environment and return the final
/// environment. The script must assign a variable named `value`.
pub fn evaluate_script(
    script: &str,
    env: &HashMap<String, f64>,
    timeout_secs: u64,
) -> Result<HashMap<String, f64>, FormulaError> {
    let statements = parse_script(script)?;

    // Validate every call site before running anything, so a forbidden
    // construct on line 3 is reported even when line 1 divides by zero.
    let mut programs = Vec::with_capacity(statements.len());
    for statement in &statements {
        let mut program = Vec::new();
        compile_expr(&statement.expr, &mut program)?;
        programs.push(program);
    }

    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    let mut env = env.clone();

    for (statement, program) in statements.iter().zip(&programs) {
        if Instant::now() > deadline {
            return Err(FormulaError::Timeout(timeout_secs));
        }
        let result = run_program(program, &env, statement.line)?;
        env.insert(statement.target.clone(), result);
    }

    if !env.contains_key("value") {
        return Err(FormulaError::MissingValue);
    }
    Ok(env)
}

/// Free variables on the right-hand sides of a script, in first-occurrence
/// order. Names assigned on earlier lines are bound below their definition
/// and excluded; function names are never identifiers.
pub fn extract_identifiers(formula_text: &str) -> Result<Vec<String>, FormulaError> {
    let statements = parse_script(formula_text)?;
    let mut bound: Vec<String> = Vec::new();
    let mut free: Vec<String> = Vec::new();

    for statement in &statements {
        collect_free(&statement.expr, &bound, &mut free);
        if !bound.contains(&statement.target) {
            bound.push(statement.target.clone());
        }
    }
    Ok(free)
}

fn collect_free(expr: &Expr, bound: &[String], free: &mut Vec<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Ident(name) => {
            if !bound.contains(name) && !free.contains(name) {
                free.push(name.clone());
            }
        }
        Expr::Unary { operand, .. } => collect_free(operand, bound, free),
        Expr::Binary { lhs, rhs, .. } => {
            collect_free(lhs, bound, free);
            collect_free(rhs, bound, free);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_free(arg, bound, free);
            }
        }
    }
}

/// Static lint for a formula script; each warning is a display-ready line.
pub fn validate_formula(script: &str, max_lines: usize) -> Vec<String> {
    let mut warnings = Vec::new();

    let line_count = script.lines().filter(|l| !l.trim().is_empty()).count();
    if line_count > max_lines {
        warnings.push(format!(
            "script has {line_count} statements, more than the limit of {max_lines}"
        ));
    }

    let statements = match parse_script(script) {
        Ok(statements) => statements,
        Err(err) => {
            warnings.push(err.to_string());
            return warnings;
        }
    };

    let mut assigned: Vec<&str> = Vec::new();
    for statement in &statements {
        if assigned.contains(&statement.target.as_str()) {
            warnings.push(format!(
                "line {}: variable {} is redefined",
                statement.line, statement.target
            ));
        } else {
            assigned.push(&statement.target);
        }
        if let Err(err) = lint_calls(&statement.expr) {
            warnings.push(err.to_string());
        }
    }

    if !assigned.contains(&"value") {
        warnings.push("script never assigns a variable named 'value'".to_string());
    }

    warnings
}

fn lint_calls(expr: &Expr) -> Result<(), FormulaError> {
    match expr {
        Expr::Number(_) | Expr::Ident(_) => Ok(()),
        Expr::Unary { operand, .. } => lint_calls(operand),
        Expr::Binary { lhs, rhs, .. } => {
            lint_calls(lhs)?;
            lint_calls(rhs)
        }
        Expr::Call { func, args } => {
            check_call(func, args.len())?;
            for arg in args {
                lint_calls(arg)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn evaluates_linear_script() {
        let script = "uplift = reach * conversion\nvalue = uplift * 12";
        let out = evaluate_script(script, &env(&[("reach", 1000.0), ("conversion", 0.02)]), 5)
            .unwrap();
        assert_eq!(out["uplift"], 20.0);
        assert_eq!(out["value"], 240.0);
    }

    #[test]
    fn later_statements_see_earlier_assignments() {
        let out = evaluate_script("a = 2\nb = a ** 3\nvalue = b - 1", &env(&[]), 5).unwrap();
        assert_eq!(out["value"], 7.0);
    }

    #[test]
    fn division_by_zero_is_execution_error() {
        let err = evaluate_script("value = 1 / d", &env(&[("d", 0.0)]), 5).unwrap_err();
        assert!(matches!(err, FormulaError::ExecutionError(_)));
    }

    #[test]
    fn non_finite_result_is_execution_error() {
        let err = evaluate_script("value = 10 ** 400", &env(&[]), 5).unwrap_err();
        assert!(matches!(err, FormulaError::ExecutionError(_)));
    }

    #[test]
    fn unknown_variable_is_execution_error() {
        let err = evaluate_script("value = ghost + 1", &env(&[]), 5).unwrap_err();
        assert!(matches!(err, FormulaError::ExecutionError(_)));
    }

    #[test]
    fn missing_value_assignment_fails() {
        let err = evaluate_script("score = 1 + 1", &env(&[]), 5).unwrap_err();
        assert_eq!(err, FormulaError::MissingValue);
    }

    #[test]
    fn unknown_function_is_invalid_before_execution() {
        // Line 1 would divide by zero, but the forbidden call on line 2 must
        // be reported without running anything.
        let err = evaluate_script("a = 1 / z\nvalue = eval(a)", &env(&[("z", 0.0)]), 5)
            .unwrap_err();
        assert!(matches!(err, FormulaError::InvalidFormula(_)));
    }

    #[test]
    fn whitelisted_functions_work() {
        let out = evaluate_script(
            "value = max(min(10, 20), abs(0 - 3), round(2.4))",
            &env(&[]),
            5,
        )
        .unwrap();
        assert_eq!(out["value"], 10.0);

        let out = evaluate_script("value = sqrt(9) + log(exp(1))", &env(&[]), 5).unwrap();
        assert!((out["value"] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn extract_identifiers_is_order_stable() {
        let free = extract_identifiers(
            "uplift = reach * conversion\nvalue = uplift * horizon + reach",
        )
        .unwrap();
        assert_eq!(free, vec!["reach", "conversion", "horizon"]);
    }

    #[test]
    fn extract_identifiers_ignores_function_names() {
        let free = extract_identifiers("value = max(a, b)").unwrap();
        assert_eq!(free, vec!["a", "b"]);
    }

    #[test]
    fn validate_reports_lint_warnings() {
        let warnings = validate_formula("a = 1\na = 2\nb = nope(a)", 10);
        assert!(warnings.iter().any(|w| w.contains("redefined")));
        assert!(warnings.iter().any(|w| w.contains("unknown name")));
        assert!(warnings.iter().any(|w| w.contains("value")));
    }

    #[test]
    fn validate_clean_script_is_quiet() {
        assert!(validate_formula("value = a * b", 10).is_empty());
    }
}
