//! Embedded formula language
//!
//! Formula text compiles to an immutable [`Expr`] tree which is evaluated
//! against a [`Scope`], usually an [`EvalContext`] bound to one or two
//! profiles. Compiled trees are memoized in a [`FormulaCache`].

pub mod cache;
pub mod context;
pub mod expression;
pub mod parser;

pub use cache::{FormulaCache, Section};
pub use context::{
    parse_dynamic_ref, parse_role_ref, DynamicRef, EvalContext, RandomSource, SeededRandom,
    ThreadRandom,
};
pub use expression::{BinOp, Builtin, EvalError, Expr, ParseError, ParseErrorKind, Scope};
pub use parser::compile;
