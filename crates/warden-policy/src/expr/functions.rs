//! Functions callable from conditions.
//!
//! Each function is a [`ConditionFunction`] strategy declaring the name(s)
//! it answers to. The [`FunctionRegistry`] resolves a call to the first
//! registered strategy supporting the name, so new functions are added by
//! registration alone.

use std::sync::Arc;

use serde_json::Value;

use super::engine::EvaluationScope;
use super::{ExpressionError, value};
use crate::authority::{normalize_group, normalize_role};

/// A function strategy.
pub trait ConditionFunction: Send + Sync {
    /// Names this strategy answers to.
    fn names(&self) -> &[&str];

    /// Invoke the function with already evaluated arguments.
    ///
    /// # Errors
    ///
    /// Returns an `ExpressionError` on bad arguments or collaborator failure.
    fn call(
        &self,
        name: &str,
        scope: &mut EvaluationScope<'_>,
        args: &[Value],
    ) -> Result<Value, ExpressionError>;
}

/// Ordered set of function strategies.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: Vec<Arc<dyn ConditionFunction>>,
}

impl FunctionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in function.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AuthorityPredicates));
        registry.register(Arc::new(AuthenticationPredicates));
        registry.register(Arc::new(PermissionPredicate));
        registry.register(Arc::new(RiskScoreFunction));
        registry.register(Arc::new(AttributeFunction));
        registry
    }

    /// Append a strategy.
    pub fn register(&mut self, function: Arc<dyn ConditionFunction>) {
        self.functions.push(function);
    }

    /// First strategy supporting the name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn ConditionFunction>> {
        self.functions
            .iter()
            .find(|f| f.names().contains(&name))
    }

    /// Every registered name, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().flat_map(|f| f.names().iter().copied())
    }
}

fn expect_args(name: &str, args: &[Value], count: usize) -> Result<(), ExpressionError> {
    if args.len() != count {
        return Err(ExpressionError::arity(name, count.to_string(), args.len()));
    }
    Ok(())
}

/// String arguments, with array arguments flattened.
fn string_args<'v>(name: &str, args: &'v [Value]) -> Result<Vec<&'v str>, ExpressionError> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Array(items) => {
                for item in items {
                    out.push(value::as_str(item, name)?);
                }
            }
            other => out.push(value::as_str(other, name)?),
        }
    }
    if out.is_empty() {
        return Err(ExpressionError::arity(name, "at least 1", 0));
    }
    Ok(out)
}

// =============================================================================
// Built-in Functions
// =============================================================================

/// `hasRole`, `hasAnyRole`, `hasAuthority`, `hasAnyAuthority`, `hasGroup`,
/// `hasAnyGroup`.
#[derive(Debug, Clone, Copy)]
pub struct AuthorityPredicates;

impl ConditionFunction for AuthorityPredicates {
    fn names(&self) -> &[&str] {
        &[
            "hasRole",
            "hasAnyRole",
            "hasAuthority",
            "hasAnyAuthority",
            "hasGroup",
            "hasAnyGroup",
        ]
    }

    fn call(
        &self,
        name: &str,
        scope: &mut EvaluationScope<'_>,
        args: &[Value],
    ) -> Result<Value, ExpressionError> {
        if !name.starts_with("hasAny") {
            expect_args(name, args, 1)?;
        }
        let wanted = string_args(name, args)?;

        let normalize: fn(&str) -> String = match name {
            "hasRole" | "hasAnyRole" => normalize_role,
            "hasGroup" | "hasAnyGroup" => normalize_group,
            _ => str::to_string,
        };

        let authorities = &scope.context().authorities;
        let held = wanted
            .into_iter()
            .any(|w| authorities.contains(&normalize(w)));
        Ok(Value::Bool(held))
    }
}

/// `isAuthenticated`, `isAnonymous`, `permitAll`, `denyAll`.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticationPredicates;

impl ConditionFunction for AuthenticationPredicates {
    fn names(&self) -> &[&str] {
        &["isAuthenticated", "isAnonymous", "permitAll", "denyAll"]
    }

    fn call(
        &self,
        name: &str,
        scope: &mut EvaluationScope<'_>,
        args: &[Value],
    ) -> Result<Value, ExpressionError> {
        expect_args(name, args, 0)?;
        let authenticated = scope.context().subject.authenticated;
        let result = match name {
            "isAuthenticated" => authenticated,
            "isAnonymous" => !authenticated,
            "permitAll" => true,
            _ => false,
        };
        Ok(Value::Bool(result))
    }
}

/// `hasPermission(target, action)` and `hasPermission(target, type, action)`.
#[derive(Debug, Clone, Copy)]
pub struct PermissionPredicate;

impl ConditionFunction for PermissionPredicate {
    fn names(&self) -> &[&str] {
        &["hasPermission"]
    }

    fn call(
        &self,
        name: &str,
        scope: &mut EvaluationScope<'_>,
        args: &[Value],
    ) -> Result<Value, ExpressionError> {
        let (target, target_type, action) = match args {
            [target, action] => (target, None, value::as_str(action, "permission action")?),
            [target, target_type, action] => (
                target,
                Some(value::as_str(target_type, "permission target type")?),
                value::as_str(action, "permission action")?,
            ),
            _ => return Err(ExpressionError::arity(name, "2 or 3", args.len())),
        };

        let evaluator = scope.engine().permission_evaluator();
        evaluator
            .has_permission(scope, target, target_type, action)
            .map(Value::Bool)
    }
}

/// `getRiskScore()`.
#[derive(Debug, Clone, Copy)]
pub struct RiskScoreFunction;

impl ConditionFunction for RiskScoreFunction {
    fn names(&self) -> &[&str] {
        &["getRiskScore"]
    }

    fn call(
        &self,
        name: &str,
        scope: &mut EvaluationScope<'_>,
        args: &[Value],
    ) -> Result<Value, ExpressionError> {
        expect_args(name, args, 0)?;
        let risk = scope.engine().risk_engine();
        Ok(Value::from(risk.risk_score(scope.context())))
    }
}

/// `getAttribute(key)`.
#[derive(Debug, Clone, Copy)]
pub struct AttributeFunction;

impl ConditionFunction for AttributeFunction {
    fn names(&self) -> &[&str] {
        &["getAttribute"]
    }

    fn call(
        &self,
        name: &str,
        scope: &mut EvaluationScope<'_>,
        args: &[Value],
    ) -> Result<Value, ExpressionError> {
        expect_args(name, args, 1)?;
        let key = value::as_str(&args[0], "attribute key")?;
        scope
            .context()
            .get_attribute(key)
            .map_err(|e| ExpressionError::Collaborator(e.to_string()))
    }
}
