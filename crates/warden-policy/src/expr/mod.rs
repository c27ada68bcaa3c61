//! Condition language.
//!
//! Conditions are boolean expressions over the evaluation context:
//!
//! ```text
//! expr       = or
//! or         = and (("or" / "||") and)*
//! and        = not (("and" / "&&") not)*
//! not        = ("not" / "!") not / comparison
//! comparison = postfix [compareOp postfix]
//! compareOp  = "==" / "!=" / "<" / "<=" / ">" / ">=" / "eq" / "ne" / "lt" / "le" / "gt" / "ge"
//! postfix    = primary ("." name)*
//! primary    = literal / "#" name / name "(" [expr ("," expr)*] ")" / name / "(" expr ")"
//! literal    = "true" / "false" / "null" / number / 'string' / "string"
//! ```
//!
//! # Examples
//!
//! ```text
//! hasRole('ADMIN')
//! hasAuthority('REPORT_VIEW') and getRiskScore() < 50
//! #returnObject.owner == #subject.name
//! hasPermission(#target, 'document', 'read') or hasRole('AUDITOR')
//! not (getAttribute('department') == 'contractors')
//! ```
//!
//! Parse and evaluation failures never escape [`ExpressionEngine::evaluate`]:
//! they are logged and the condition is treated as `false`.

pub mod engine;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod permission;
pub mod value;

pub use engine::{EvaluationScope, ExpressionEngine};
pub use functions::{ConditionFunction, FunctionRegistry};
pub use parser::{CompareOp, Expr, LogicalOp, parse_expression};
pub use permission::{AuthorityPermissionEvaluator, CatalogPermissionEvaluator, PermissionEvaluator};

/// Errors raised while parsing or evaluating a condition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    /// The expression is not well-formed.
    #[error("Parse error at position {position}: {message}")]
    Parse {
        /// Description of the syntax error.
        message: String,
        /// Byte offset in the expression.
        position: usize,
    },

    /// A called function is not registered.
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// A referenced variable is not bound in the context.
    #[error("Unknown variable: #{0}")]
    UnknownVariable(String),

    /// An operand has the wrong type.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// A function was called with the wrong number of arguments.
    #[error("Function '{function}' expects {expected} argument(s), got {found}")]
    Arity {
        /// Function name.
        function: String,
        /// Human-readable expected count.
        expected: String,
        /// Actual count.
        found: usize,
    },

    /// Nested permission conditions exceeded the depth limit.
    #[error("Permission condition nesting exceeds depth {0}")]
    DepthExceeded(usize),

    /// A collaborator (attribute source, permission catalog) failed.
    #[error("Collaborator failure: {0}")]
    Collaborator(String),
}

impl ExpressionError {
    /// Creates a new `Parse` error.
    #[must_use]
    pub fn parse(message: impl Into<String>, position: usize) -> Self {
        Self::Parse {
            message: message.into(),
            position,
        }
    }

    /// Creates a new `TypeMismatch` error.
    #[must_use]
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch(message.into())
    }

    /// Creates a new `Arity` error.
    #[must_use]
    pub fn arity(function: &str, expected: impl Into<String>, found: usize) -> Self {
        Self::Arity {
            function: function.to_string(),
            expected: expected.into(),
            found,
        }
    }
}
