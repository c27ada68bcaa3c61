//! Recursive-descent parser producing an [`Expr`] tree.

use std::fmt;

use serde_json::Value;

use super::ExpressionError;
use super::lexer::{Spanned, Token, Tokenizer};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
}

impl CompareOp {
    /// Symbolic form.
    #[must_use]
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Logical connectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// A parsed condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `true`, `false`, `null`, a number or a string.
    Literal(Value),
    /// `#name`.
    Variable(String),
    /// A bare name that is not a call.
    Identifier(String),
    /// `target.name`.
    Property {
        target: Box<Expr>,
        name: String,
    },
    /// `name(args..)`.
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// Negation.
    Not(Box<Expr>),
    /// AND / OR of two expressions.
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Comparison of two operands.
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(Value::String(s)) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Literal(v) => write!(f, "{}", v),
            Self::Variable(name) => write!(f, "#{}", name),
            Self::Identifier(name) => f.write_str(name),
            Self::Property { target, name } => write!(f, "{}.{}", target, name),
            Self::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Self::Not(inner) => write!(f, "!({})", inner),
            Self::Logical { op, left, right } => {
                let op = match op {
                    LogicalOp::And => "and",
                    LogicalOp::Or => "or",
                };
                write!(f, "({} {} {})", left, op, right)
            }
            Self::Compare { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
        }
    }
}

/// Deepest allowed nesting of groups, calls and negations.
const MAX_NESTING: usize = 64;

/// Upper bound on operator nodes in one expression. Chains of `and`, `or`
/// and `.` build left-deep trees, so this also bounds tree depth.
const MAX_OPERATORS: usize = 512;

/// Parser over a token stream.
struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    current: Spanned,
    depth: usize,
    operators: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, ExpressionError> {
        let mut tokenizer = Tokenizer::new(input);
        let current = tokenizer.next_token()?;
        Ok(Self {
            tokenizer,
            current,
            depth: 0,
            operators: 0,
        })
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn count_operator(&mut self) -> Result<(), ExpressionError> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(self.error("expression has too many operators"));
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Token, ExpressionError> {
        let next = self.tokenizer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next).token)
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::parse(message, self.current.position)
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ExpressionError> {
        if self.current.token != token {
            return Err(self.error(format!("expected {}", what)));
        }
        self.advance()?;
        Ok(())
    }

    /// Parse OR expressions (lowest precedence).
    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;

        while self.current.token == Token::Or {
            self.count_operator()?;
            self.advance()?;
            let right = self.parse_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parse AND expressions.
    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_not()?;

        while self.current.token == Token::And {
            self.count_operator()?;
            self.advance()?;
            let right = self.parse_not()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parse NOT expressions.
    fn parse_not(&mut self) -> Result<Expr, ExpressionError> {
        if self.current.token == Token::Not {
            self.count_operator()?;
            self.enter()?;
            self.advance()?;
            let expr = self.parse_not()?;
            self.leave();
            return Ok(Expr::Not(Box::new(expr)));
        }
        self.parse_comparison()
    }

    /// Parse a single, non-associative comparison.
    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_postfix()?;

        if let Token::Compare(op) = self.current.token {
            self.count_operator()?;
            self.advance()?;
            let right = self.parse_postfix()?;
            if matches!(self.current.token, Token::Compare(_)) {
                return Err(self.error("comparisons cannot be chained"));
            }
            return Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        Ok(left)
    }

    /// Parse property navigation.
    fn parse_postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.parse_primary()?;

        while self.current.token == Token::Dot {
            self.count_operator()?;
            self.advance()?;
            let name = match self.advance()? {
                Token::Identifier(name) => name,
                _ => return Err(self.error("expected property name after '.'")),
            };
            expr = Expr::Property {
                target: Box::new(expr),
                name,
            };
        }

        Ok(expr)
    }

    /// Parse literals, variables, calls and parenthesized groups.
    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.current.position;
        match self.advance()? {
            Token::OpenParen => {
                self.enter()?;
                let expr = self.parse_or()?;
                self.expect(Token::CloseParen, "')'")?;
                self.leave();
                Ok(expr)
            }
            Token::Bool(b) => Ok(Expr::Literal(Value::Bool(b))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Number(n) => Ok(Expr::Literal(number_value(n))),
            Token::Variable(name) => Ok(Expr::Variable(name)),
            Token::Identifier(name) => {
                if self.current.token != Token::OpenParen {
                    return Ok(Expr::Identifier(name));
                }
                self.enter()?;
                self.advance()?;
                let args = self.parse_arguments()?;
                self.leave();
                Ok(Expr::Call { name, args })
            }
            Token::Eof => Err(ExpressionError::parse("unexpected end of expression", position)),
            other => Err(ExpressionError::parse(
                format!("unexpected token {:?}", other),
                position,
            )),
        }
    }

    /// Parse a call's argument list after the opening parenthesis.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if self.current.token == Token::CloseParen {
            self.advance()?;
            return Ok(args);
        }

        loop {
            args.push(self.parse_or()?);
            match self.current.token {
                Token::Comma => {
                    self.advance()?;
                }
                Token::CloseParen => {
                    self.advance()?;
                    return Ok(args);
                }
                _ => return Err(self.error("expected ',' or ')' in argument list")),
            }
        }
    }
}

/// Integral numbers become JSON integers so they compare equal to stored
/// integer attributes.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

/// Parse a condition expression.
///
/// # Errors
///
/// Returns `ExpressionError::Parse` with the byte position of the offending
/// token.
pub fn parse_expression(input: &str) -> Result<Expr, ExpressionError> {
    let mut parser = Parser::new(input)?;
    let expr = parser.parse_or()?;

    if parser.current.token != Token::Eof {
        return Err(parser.error("unexpected tokens after expression"));
    }

    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.to_string(),
            args,
        }
    }

    fn string(s: &str) -> Expr {
        Expr::Literal(json!(s))
    }

    #[test]
    fn test_parse_call() {
        assert_eq!(
            parse_expression("hasRole('ADMIN')").unwrap(),
            call("hasRole", vec![string("ADMIN")])
        );
        assert_eq!(
            parse_expression("isAuthenticated()").unwrap(),
            call("isAuthenticated", vec![])
        );
        assert_eq!(
            parse_expression("permitAll").unwrap(),
            Expr::Identifier("permitAll".to_string())
        );
    }

    #[test]
    fn test_precedence() {
        // a or b and not c  ==>  a or (b and (not c))
        let expr = parse_expression("a or b and not c").unwrap();
        let Expr::Logical { op: LogicalOp::Or, right, .. } = expr else {
            panic!("expected OR at the root");
        };
        let Expr::Logical { op: LogicalOp::And, right: inner, .. } = *right else {
            panic!("expected AND on the right");
        };
        assert!(matches!(*inner, Expr::Not(_)));
    }

    #[test]
    fn test_parenthesized_group() {
        let expr = parse_expression("(a or b) and c").unwrap();
        assert!(matches!(
            expr,
            Expr::Logical {
                op: LogicalOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_property_comparison() {
        let expr = parse_expression("#returnObject.owner == #subject.name").unwrap();
        assert_eq!(
            expr,
            Expr::Compare {
                op: CompareOp::Eq,
                left: Box::new(Expr::Property {
                    target: Box::new(Expr::Variable("returnObject".to_string())),
                    name: "owner".to_string(),
                }),
                right: Box::new(Expr::Property {
                    target: Box::new(Expr::Variable("subject".to_string())),
                    name: "name".to_string(),
                }),
            }
        );
    }

    #[test]
    fn test_numbers() {
        let expr = parse_expression("getRiskScore() < 50").unwrap();
        let Expr::Compare { right, .. } = expr else {
            panic!("expected comparison");
        };
        assert_eq!(*right, Expr::Literal(json!(50)));

        let expr = parse_expression("x ge 0.5").unwrap();
        let Expr::Compare { op, right, .. } = expr else {
            panic!("expected comparison");
        };
        assert_eq!(op, CompareOp::Ge);
        assert_eq!(*right, Expr::Literal(json!(0.5)));
    }

    #[test]
    fn test_rejects_deep_nesting() {
        let deep = format!("{}true{}", "(".repeat(100_000), ")".repeat(100_000));
        let err = parse_expression(&deep).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));

        let negations = format!("{}true", "!".repeat(10_000));
        assert!(parse_expression(&negations).is_err());

        let calls = format!("{}true{}", "f(".repeat(10_000), ")".repeat(10_000));
        assert!(parse_expression(&calls).is_err());

        let shallow = format!("{}true{}", "(".repeat(32), ")".repeat(32));
        assert_eq!(parse_expression(&shallow).unwrap(), Expr::Literal(json!(true)));
    }

    #[test]
    fn test_rejects_long_operator_chains() {
        let chain = vec!["a"; 100_000].join(" and ");
        let err = parse_expression(&chain).unwrap_err();
        assert!(err.to_string().contains("too many operators"));

        let path = format!("#a{}", ".b".repeat(100_000));
        assert!(parse_expression(&path).is_err());

        let modest = vec!["hasRole('A')"; 50].join(" or ");
        assert!(parse_expression(&modest).is_ok());
    }

    #[test]
    fn test_multiple_arguments() {
        assert_eq!(
            parse_expression("hasPermission(#target, 'document', 'read')").unwrap(),
            call(
                "hasPermission",
                vec![
                    Expr::Variable("target".to_string()),
                    string("document"),
                    string("read"),
                ]
            )
        );
    }

    #[test]
    fn test_display_round_trips_structure() {
        let source = "hasRole('ADMIN') and not (#a.b != 3)";
        let expr = parse_expression(source).unwrap();
        let reparsed = parse_expression(&expr.to_string()).unwrap();
        assert_eq!(expr, reparsed);
    }

    #[test]
    fn test_parse_errors() {
        for input in [
            "",
            "hasRole('ADMIN'",
            "hasRole('ADMIN'))",
            "a and",
            "a == b == c",
            "#x.",
            "f(a b)",
            "this is not an expression",
        ] {
            assert!(
                matches!(parse_expression(input), Err(ExpressionError::Parse { .. })),
                "expected parse error for {:?}",
                input
            );
        }
    }
}
