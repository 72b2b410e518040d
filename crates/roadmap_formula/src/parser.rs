//! Recursive-descent parser producing the statement AST.

use crate::lexer::{tokenize, Token};
use crate::FormulaError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Ident(String),
    Unary {
        negate: bool,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// One `name = expr` statement with its 1-based source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub line: usize,
    pub target: String,
    pub expr: Expr,
}

/// Parse a full script into statements. Blank lines are skipped; every
/// non-blank line must be a single assignment.
pub fn parse_script(script: &str) -> Result<Vec<Statement>, FormulaError> {
    let mut statements = Vec::new();
    for (idx, raw_line) in script.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let tokens = tokenize(line)
            .map_err(|e| at_line(e, idx + 1))?;
        let statement = parse_statement(&tokens, idx + 1).map_err(|e| at_line(e, idx + 1))?;
        statements.push(statement);
    }
    Ok(statements)
}

fn at_line(err: FormulaError, line: usize) -> FormulaError {
    match err {
        FormulaError::InvalidFormula(msg) => {
            FormulaError::InvalidFormula(format!("line {line}: {msg}"))
        }
        other => other,
    }
}

fn parse_statement(tokens: &[Token], line: usize) -> Result<Statement, FormulaError> {
    let mut parser = Parser { tokens, pos: 0 };

    let target = match parser.next() {
        Some(Token::Ident(name)) => name.clone(),
        _ => {
            return Err(FormulaError::InvalidFormula(
                "statement must start with a variable name".to_string(),
            ))
        }
    };
    if parser.next() != Some(&Token::Assign) {
        return Err(FormulaError::InvalidFormula(
            "statement must be an assignment: name = expr".to_string(),
        ));
    }

    let expr = parser.parse_expr()?;
    if parser.peek().is_some() {
        return Err(FormulaError::InvalidFormula(
            "trailing tokens after expression".to_string(),
        ));
    }

    Ok(Statement { line, target, expr })
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), FormulaError> {
        if self.next() == Some(expected) {
            Ok(())
        } else {
            Err(FormulaError::InvalidFormula(format!("expected {what}")))
        }
    }

    // expr := term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // term := unary (('*' | '/') unary)*
    fn parse_term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // unary := ('+' | '-') unary | power
    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(Token::Plus) => {
                self.next();
                self.parse_unary()
            }
            Some(Token::Minus) => {
                self.next();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    negate: true,
                    operand: Box::new(operand),
                })
            }
            _ => self.parse_power(),
        }
    }

    // power := primary ('**' unary)?  -- right-associative, exponent may be signed
    fn parse_power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.parse_primary()?;
        if self.peek() == Some(&Token::Power) {
            self.next();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    // primary := NUMBER | IDENT | IDENT '(' args ')' | '(' expr ')'
    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Number(*value)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let args = self.parse_args()?;
                    Ok(Expr::Call {
                        func: name.clone(),
                        args,
                    })
                } else {
                    Ok(Expr::Ident(name.clone()))
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "closing parenthesis")?;
                Ok(inner)
            }
            _ => Err(FormulaError::InvalidFormula(
                "expected a number, variable, or parenthesized expression".to_string(),
            )),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, FormulaError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => {
                    return Err(FormulaError::InvalidFormula(
                        "unterminated argument list".to_string(),
                    ))
                }
            }
        }
        Ok(args)
    }
}
