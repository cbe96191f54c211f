//! Expression types and AST for stat formulas.
//!
//! Formulas compile to an immutable tree of [`Expr`] nodes. A tree holds no
//! interior state, so a single compiled formula can be shared between threads
//! and evaluated any number of times against different scopes.

use std::collections::HashMap;
use std::hash::BuildHasher;

use thiserror::Error;

/// Binary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
    /// Short-circuiting, value-preserving OR
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Gt => ">",
            BinOp::Lt => "<",
            BinOp::Gte => ">=",
            BinOp::Lte => "<=",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Or => "OR",
        }
    }
}

/// Built-in functions callable from formulas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `if(cond, a, b)`, only the selected branch is evaluated
    If,
    Max,
    Min,
    /// `random(lo, hi)`, uniform in `[lo, hi)`
    Random,
}

impl Builtin {
    /// Look up a builtin by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "if" => Some(Builtin::If),
            "max" => Some(Builtin::Max),
            "min" => Some(Builtin::Min),
            "random" => Some(Builtin::Random),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::If => "if",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Random => "random",
        }
    }

    /// Exact number of arguments the function accepts
    pub fn arity(&self) -> usize {
        match self {
            Builtin::If => 3,
            Builtin::Max | Builtin::Min | Builtin::Random => 2,
        }
    }
}

/// Expression AST node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A numeric literal (e.g., 42.5)
    Constant(f64),
    /// A variable reference, bare (`level`) or delimited (`%entity-status#STR%`)
    Variable(String),
    /// A binary operation (e.g., left + right)
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// A builtin call (e.g., max(a, b))
    Function { func: Builtin, args: Vec<Expr> },
}

/// Source of variable values and randomness during evaluation.
///
/// Unknown names resolve to `0.0`; a scope never fails a lookup.
pub trait Scope {
    fn variable(&self, name: &str) -> f64;

    /// Uniform sample in `[low, high)`
    fn random(&self, low: f64, high: f64) -> f64 {
        low + rand::random::<f64>() * (high - low)
    }
}

impl<S: BuildHasher> Scope for HashMap<String, f64, S> {
    fn variable(&self, name: &str) -> f64 {
        self.get(name).copied().unwrap_or(0.0)
    }
}

impl Scope for ahash::AHashMap<String, f64> {
    fn variable(&self, name: &str) -> f64 {
        self.get(name).copied().unwrap_or(0.0)
    }
}

/// Error type for expression evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Function called with wrong number of arguments
    #[error("Function {func} expected {expected} args, got {got}")]
    InvalidArgCount {
        func: String,
        expected: usize,
        got: usize,
    },
}

/// What went wrong while compiling a formula
#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    UnexpectedChar(char),
    UnexpectedEnd,
    UnterminatedVariable,
    EmptyVariable,
    InvalidNumber(String),
    UnknownFunction(String),
    TooDeep,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErrorKind::UnexpectedChar(c) => write!(f, "unexpected character '{}'", c),
            ParseErrorKind::UnexpectedEnd => write!(f, "unexpected end of formula"),
            ParseErrorKind::UnterminatedVariable => write!(f, "unterminated %variable%"),
            ParseErrorKind::EmptyVariable => write!(f, "empty %variable%"),
            ParseErrorKind::InvalidNumber(lexeme) => write!(f, "invalid number '{}'", lexeme),
            ParseErrorKind::UnknownFunction(name) => write!(f, "unknown function '{}'", name),
            ParseErrorKind::TooDeep => write!(f, "formula too large or nested too deeply"),
        }
    }
}

/// Error type for expression parsing
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Parse error at {position}: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// Byte offset into the formula text
    pub position: usize,
}

impl Expr {
    /// Compile formula text into an AST
    pub fn parse(text: &str) -> Result<Expr, ParseError> {
        super::parser::compile(text)
    }

    /// Evaluate against a scope.
    ///
    /// Division by zero yields `0.0`. Comparisons yield `1.0` or `0.0`.
    pub fn evaluate<S: Scope + ?Sized>(&self, scope: &S) -> Result<f64, EvalError> {
        match self {
            Expr::Constant(value) => Ok(*value),
            Expr::Variable(name) => Ok(scope.variable(name)),
            Expr::BinaryOp { op, left, right } => {
                let l = left.evaluate(scope)?;
                if *op == BinOp::Or {
                    if l != 0.0 {
                        return Ok(l);
                    }
                    return right.evaluate(scope);
                }

                let r = right.evaluate(scope)?;
                Ok(match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    BinOp::Div => {
                        if r == 0.0 {
                            0.0
                        } else {
                            l / r
                        }
                    }
                    BinOp::Gt => truth(l > r),
                    BinOp::Lt => truth(l < r),
                    BinOp::Gte => truth(l >= r),
                    BinOp::Lte => truth(l <= r),
                    BinOp::Eq => truth(l == r),
                    BinOp::Neq => truth(l != r),
                    BinOp::Or => unreachable!("handled above"),
                })
            }
            Expr::Function { func, args } => {
                if args.len() != func.arity() {
                    return Err(EvalError::InvalidArgCount {
                        func: func.name().to_string(),
                        expected: func.arity(),
                        got: args.len(),
                    });
                }

                match func {
                    Builtin::If => {
                        if args[0].evaluate(scope)? != 0.0 {
                            args[1].evaluate(scope)
                        } else {
                            args[2].evaluate(scope)
                        }
                    }
                    Builtin::Max => Ok(args[0].evaluate(scope)?.max(args[1].evaluate(scope)?)),
                    Builtin::Min => Ok(args[0].evaluate(scope)?.min(args[1].evaluate(scope)?)),
                    Builtin::Random => {
                        let low = args[0].evaluate(scope)?;
                        let high = args[1].evaluate(scope)?;
                        Ok(scope.random(low, high))
                    }
                }
            }
        }
    }

    /// Names of every variable referenced by this expression, in order of appearance
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Constant(_) => {}
            Expr::Variable(name) => out.push(name),
            Expr::BinaryOp { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
        }
    }
}

#[inline]
fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}
