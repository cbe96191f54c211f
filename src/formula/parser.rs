//! Recursive-descent compiler for formula text.
//!
//! Grammar, lowest to highest precedence:
//!
//! ```text
//! expr     := or
//! or       := eq (("OR" | "||") eq)*
//! eq       := rel (("==" | "!=") rel)*
//! rel      := add ((">=" | "<=" | ">" | "<") add)*
//! add      := mul (("+" | "-") mul)*
//! mul      := unary (("*" | "/") unary)*
//! unary    := ("+" | "-")* primary
//! primary  := NUMBER | "%" NAME "%" | IDENT "(" args ")" | IDENT | "(" expr ")"
//! ```
//!
//! All scan state lives in a [`Cursor`] owned by a single [`compile`] call.

use super::expression::{BinOp, Builtin, Expr, ParseError, ParseErrorKind};

/// Nesting limit for parentheses, calls and unary chains
const MAX_DEPTH: usize = 256;

/// Limit on operator nodes. A flat chain like `1+1+...` nests one level per
/// operator, so this bounds the depth evaluation recurses to.
const MAX_OPERATORS: usize = 1024;

/// Compile formula text into an AST
pub fn compile(text: &str) -> Result<Expr, ParseError> {
    let mut cursor = Cursor::new(text);
    let expr = cursor.parse_or()?;
    cursor.skip_ws();
    match cursor.peek() {
        None => Ok(expr),
        Some(c) => Err(cursor.error(ParseErrorKind::UnexpectedChar(c))),
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    operators: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
            operators: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            kind,
            position: self.pos,
        }
    }

    fn error_here(&self) -> ParseError {
        match self.peek() {
            Some(c) => self.error(ParseErrorKind::UnexpectedChar(c)),
            None => self.error(ParseErrorKind::UnexpectedEnd),
        }
    }

    /// Consume `token` after optional whitespace
    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ParseError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.bump();
            Ok(())
        } else {
            Err(self.error_here())
        }
    }

    /// `OR` keyword (not a prefix of a longer identifier) or `||`
    fn eat_or(&mut self) -> bool {
        if self.eat("||") {
            return true;
        }
        let rest = self.rest();
        if rest.starts_with("OR") {
            let boundary = rest[2..].chars().next().map_or(true, |c| !is_ident_continue(c));
            if boundary {
                self.pos += 2;
                return true;
            }
        }
        false
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(ParseErrorKind::TooDeep));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Account for one more operator node
    fn grow(&mut self) -> Result<(), ParseError> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(self.error(ParseErrorKind::TooDeep));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut x = self.parse_equality()?;
        while self.eat_or() {
            self.grow()?;
            x = binary(BinOp::Or, x, self.parse_equality()?);
        }
        Ok(x)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut x = self.parse_relational()?;
        loop {
            if self.eat("==") {
                self.grow()?;
                x = binary(BinOp::Eq, x, self.parse_relational()?);
            } else if self.eat("!=") {
                self.grow()?;
                x = binary(BinOp::Neq, x, self.parse_relational()?);
            } else {
                return Ok(x);
            }
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut x = self.parse_additive()?;
        loop {
            if self.eat(">=") {
                self.grow()?;
                x = binary(BinOp::Gte, x, self.parse_additive()?);
            } else if self.eat("<=") {
                self.grow()?;
                x = binary(BinOp::Lte, x, self.parse_additive()?);
            } else if self.eat(">") {
                self.grow()?;
                x = binary(BinOp::Gt, x, self.parse_additive()?);
            } else if self.eat("<") {
                self.grow()?;
                x = binary(BinOp::Lt, x, self.parse_additive()?);
            } else {
                return Ok(x);
            }
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut x = self.parse_multiplicative()?;
        loop {
            if self.eat("+") {
                self.grow()?;
                x = binary(BinOp::Add, x, self.parse_multiplicative()?);
            } else if self.eat("-") {
                self.grow()?;
                x = binary(BinOp::Sub, x, self.parse_multiplicative()?);
            } else {
                return Ok(x);
            }
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut x = self.parse_unary()?;
        loop {
            if self.eat("*") {
                self.grow()?;
                x = binary(BinOp::Mul, x, self.parse_unary()?);
            } else if self.eat("/") {
                self.grow()?;
                x = binary(BinOp::Div, x, self.parse_unary()?);
            } else {
                return Ok(x);
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = if self.eat("+") {
            self.parse_unary()
        } else if self.eat("-") {
            // -x compiles to 0 - x
            self.grow()
                .and_then(|()| self.parse_unary())
                .map(|operand| binary(BinOp::Sub, Expr::Constant(0.0), operand))
        } else {
            self.parse_primary()
        };
        self.leave();
        result
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error(ParseErrorKind::UnexpectedEnd)),
            Some('(') => {
                self.bump();
                self.enter()?;
                let inner = self.parse_or()?;
                self.leave();
                self.expect(')')?;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(),
            Some('%') => self.parse_delimited_variable(),
            Some(c) if is_ident_start(c) => self.parse_identifier(),
            Some(c) => Err(self.error(ParseErrorKind::UnexpectedChar(c))),
        }
    }

    fn parse_number(&mut self) -> Result<Expr, ParseError> {
        let start = self.pos;
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                self.bump();
            } else {
                break;
            }
        }
        let lexeme = &self.src[start..self.pos];
        lexeme.parse::<f64>().map(Expr::Constant).map_err(|_| ParseError {
            kind: ParseErrorKind::InvalidNumber(lexeme.to_string()),
            position: start,
        })
    }

    fn parse_delimited_variable(&mut self) -> Result<Expr, ParseError> {
        let open = self.pos;
        self.bump();
        let start = self.pos;
        let Some(len) = self.rest().find('%') else {
            return Err(ParseError {
                kind: ParseErrorKind::UnterminatedVariable,
                position: open,
            });
        };
        let name = self.src[start..start + len].trim();
        self.pos = start + len + 1;
        if name.is_empty() {
            return Err(ParseError {
                kind: ParseErrorKind::EmptyVariable,
                position: open,
            });
        }
        Ok(Expr::Variable(name.to_string()))
    }

    fn parse_identifier(&mut self) -> Result<Expr, ParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            self.bump();
        }
        let name = &self.src[start..self.pos];

        if !self.eat("(") {
            return Ok(Expr::Variable(name.to_string()));
        }

        let func = Builtin::from_name(name).ok_or_else(|| ParseError {
            kind: ParseErrorKind::UnknownFunction(name.to_string()),
            position: start,
        })?;

        self.enter()?;
        let mut args = Vec::new();
        if !self.eat(")") {
            loop {
                args.push(self.parse_or()?);
                if !self.eat(",") {
                    break;
                }
            }
            self.expect(')')?;
        }
        self.leave();

        Ok(Expr::Function { func, args })
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::Variable(name.to_string())
    }

    #[test]
    fn test_literal_parsing() {
        assert_eq!(compile("42.5").unwrap(), Expr::Constant(42.5));
        assert_eq!(compile("42").unwrap(), Expr::Constant(42.0));
        assert_eq!(compile(".5").unwrap(), Expr::Constant(0.5));
    }

    #[test]
    fn test_variable_parsing() {
        assert_eq!(compile("level").unwrap(), var("level"));
        assert_eq!(compile("max_height").unwrap(), var("max_height"));
        assert_eq!(
            compile("%entity-status#STR#$defender$%").unwrap(),
            var("entity-status#STR#$defender$")
        );
    }

    #[test]
    fn test_builtin_name_without_parens_is_variable() {
        assert_eq!(compile("max").unwrap(), var("max"));
    }

    #[test]
    fn test_operator_precedence_mul_over_add() {
        assert_eq!(
            compile("a + b * c").unwrap(),
            binary(BinOp::Add, var("a"), binary(BinOp::Mul, var("b"), var("c")))
        );
    }

    #[test]
    fn test_parentheses_override_precedence() {
        assert_eq!(
            compile("(a + b) * c").unwrap(),
            binary(BinOp::Mul, binary(BinOp::Add, var("a"), var("b")), var("c"))
        );
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(
            compile("a - b - c").unwrap(),
            binary(BinOp::Sub, binary(BinOp::Sub, var("a"), var("b")), var("c"))
        );
    }

    #[test]
    fn test_or_binds_loosest() {
        assert_eq!(
            compile("a == 1 OR b").unwrap(),
            binary(
                BinOp::Or,
                binary(BinOp::Eq, var("a"), Expr::Constant(1.0)),
                var("b")
            )
        );
    }

    #[test]
    fn test_or_keyword_needs_boundary() {
        // ORDER is an identifier, not OR followed by DER
        assert!(compile("a ORDER").is_err());
        assert_eq!(compile("ORDER").unwrap(), var("ORDER"));
    }

    #[test]
    fn test_relational_two_char_operators() {
        assert_eq!(
            compile("a >= b").unwrap(),
            binary(BinOp::Gte, var("a"), var("b"))
        );
        assert_eq!(
            compile("a<=b").unwrap(),
            binary(BinOp::Lte, var("a"), var("b"))
        );
    }

    #[test]
    fn test_unary_minus_lowers_to_subtraction() {
        assert_eq!(
            compile("-x").unwrap(),
            binary(BinOp::Sub, Expr::Constant(0.0), var("x"))
        );
        assert_eq!(compile("+x").unwrap(), var("x"));
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(
            compile("max(min(a, b), c)").unwrap(),
            Expr::Function {
                func: Builtin::Max,
                args: vec![
                    Expr::Function {
                        func: Builtin::Min,
                        args: vec![var("a"), var("b")],
                    },
                    var("c"),
                ],
            }
        );
        assert_eq!(
            compile("If ( 1 , 2 , 3 )").unwrap(),
            Expr::Function {
                func: Builtin::If,
                args: vec![
                    Expr::Constant(1.0),
                    Expr::Constant(2.0),
                    Expr::Constant(3.0)
                ],
            }
        );
    }

    #[test]
    fn test_empty_argument_list() {
        assert_eq!(
            compile("random()").unwrap(),
            Expr::Function {
                func: Builtin::Random,
                args: vec![],
            }
        );
    }

    #[test]
    fn test_whitespace_handling() {
        assert_eq!(
            compile("  a   +\t b \n").unwrap(),
            binary(BinOp::Add, var("a"), var("b"))
        );
    }

    #[test]
    fn test_unexpected_character() {
        let err = compile("a + $").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedChar('$'));
        assert_eq!(err.position, 4);
    }

    #[test]
    fn test_trailing_input() {
        let err = compile("1 + 2 )").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedChar(')'));

        let err = compile("1.2.3").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedChar('.'));

        let err = compile("a = b").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedChar('='));
    }

    #[test]
    fn test_incomplete_input() {
        assert_eq!(compile("").unwrap_err().kind, ParseErrorKind::UnexpectedEnd);
        assert_eq!(compile("1 +").unwrap_err().kind, ParseErrorKind::UnexpectedEnd);
        assert_eq!(compile("(1 + 2").unwrap_err().kind, ParseErrorKind::UnexpectedEnd);
        assert_eq!(compile("max(1, 2").unwrap_err().kind, ParseErrorKind::UnexpectedEnd);
    }

    #[test]
    fn test_bad_variables_and_numbers() {
        assert_eq!(
            compile("%entity-status#STR").unwrap_err().kind,
            ParseErrorKind::UnterminatedVariable
        );
        assert_eq!(compile("%%").unwrap_err().kind, ParseErrorKind::EmptyVariable);
        assert_eq!(
            compile(".").unwrap_err().kind,
            ParseErrorKind::InvalidNumber(".".to_string())
        );
    }

    #[test]
    fn test_unknown_function() {
        let err = compile("1 + sqrt(4)").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownFunction("sqrt".to_string()));
        assert_eq!(err.position, 4);
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(MAX_DEPTH + 10), ")".repeat(MAX_DEPTH + 10));
        assert_eq!(compile(&deep).unwrap_err().kind, ParseErrorKind::TooDeep);

        let fine = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(compile(&fine).unwrap(), Expr::Constant(1.0));
    }

    #[test]
    fn test_long_flat_chain_is_rejected() {
        let long = vec!["1"; 5_000].join("+");
        assert_eq!(compile(&long).unwrap_err().kind, ParseErrorKind::TooDeep);

        let mixed = vec!["2"; 3_000].join(" * 1 - ");
        assert_eq!(compile(&mixed).unwrap_err().kind, ParseErrorKind::TooDeep);

        let negated = "-".repeat(200) + &vec!["1"; 1_000].join("+");
        assert!(compile(&negated).is_err());
    }

    #[test]
    fn test_chain_under_operator_limit_evaluates() {
        let sum = vec!["1"; MAX_OPERATORS + 1].join("+");
        let vars: std::collections::HashMap<String, f64> = Default::default();
        let value = compile(&sum).unwrap().evaluate(&vars).unwrap();
        assert_eq!(value, (MAX_OPERATORS + 1) as f64);
    }

    #[test]
    fn test_unicode_identifiers() {
        assert_eq!(
            compile("체력 * 2").unwrap(),
            binary(BinOp::Mul, var("체력"), Expr::Constant(2.0))
        );
    }
}
