//! Expression evaluation engine.
//!
//! [`ExpressionEngine::evaluate`] parses a condition, evaluates it against an
//! [`EvaluationContext`] and returns the boolean result. Every failure is
//! absorbed at this boundary and reported as `false`.
//!
//! # Usage
//!
//! ```ignore
//! use warden_policy::expr::ExpressionEngine;
//!
//! let engine = ExpressionEngine::new(risk_engine)
//!     .with_permission_evaluator(Arc::new(CatalogPermissionEvaluator::new(catalog)));
//!
//! if engine.evaluate("hasRole('ADMIN') and getRiskScore() < 50", &mut ctx) {
//!     // allowed
//! }
//! ```

use std::sync::Arc;

use serde_json::Value;

use super::functions::{ConditionFunction, FunctionRegistry};
use super::parser::{Expr, LogicalOp, parse_expression};
use super::permission::{AuthorityPermissionEvaluator, PermissionEvaluator};
use super::{ExpressionError, value};
use crate::config::ExpressionConfig;
use crate::context::EvaluationContext;
use crate::risk::RiskEngine;

/// Evaluates condition-language expressions.
#[derive(Clone)]
pub struct ExpressionEngine {
    functions: FunctionRegistry,
    risk: Arc<RiskEngine>,
    permissions: Arc<dyn PermissionEvaluator>,
    max_permission_depth: usize,
}

impl ExpressionEngine {
    /// Create an engine with the standard functions and a permission
    /// evaluator that only checks authority possession.
    #[must_use]
    pub fn new(risk: Arc<RiskEngine>) -> Self {
        Self {
            functions: FunctionRegistry::standard(),
            risk,
            permissions: Arc::new(AuthorityPermissionEvaluator),
            max_permission_depth: ExpressionConfig::default().max_permission_depth,
        }
    }

    /// Create an engine honoring the expression configuration.
    #[must_use]
    pub fn from_config(config: &ExpressionConfig, risk: Arc<RiskEngine>) -> Self {
        Self::new(risk).with_max_permission_depth(config.max_permission_depth)
    }

    /// Replace the permission evaluator behind `hasPermission`.
    #[must_use]
    pub fn with_permission_evaluator(mut self, evaluator: Arc<dyn PermissionEvaluator>) -> Self {
        self.permissions = evaluator;
        self
    }

    /// Register an additional function.
    #[must_use]
    pub fn with_function(mut self, function: Arc<dyn ConditionFunction>) -> Self {
        self.functions.register(function);
        self
    }

    /// Set the nesting limit for permission-carried conditions.
    #[must_use]
    pub fn with_max_permission_depth(mut self, depth: usize) -> Self {
        self.max_permission_depth = depth;
        self
    }

    /// The risk engine behind `getRiskScore()`.
    #[must_use]
    pub fn risk_engine(&self) -> &RiskEngine {
        &self.risk
    }

    /// The evaluator behind `hasPermission`.
    #[must_use]
    pub fn permission_evaluator(&self) -> &dyn PermissionEvaluator {
        self.permissions.as_ref()
    }

    /// Registered functions.
    #[must_use]
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Evaluate a condition, failing closed.
    ///
    /// Parse errors, evaluation errors and non-boolean results are logged
    /// and yield `false`.
    pub fn evaluate(&self, expression: &str, ctx: &mut EvaluationContext) -> bool {
        match self.try_evaluate(expression, ctx) {
            Ok(result) => {
                tracing::trace!(expression, result, "Condition evaluated");
                result
            }
            Err(e) => {
                tracing::warn!(
                    expression,
                    subject = %ctx.subject.name,
                    resource = %ctx.resource.identifier,
                    error = %e,
                    "Condition evaluation failed, treating as false"
                );
                false
            }
        }
    }

    /// Evaluate a condition, reporting failures.
    ///
    /// # Errors
    ///
    /// Returns the parse or evaluation error.
    pub fn try_evaluate(
        &self,
        expression: &str,
        ctx: &mut EvaluationContext,
    ) -> Result<bool, ExpressionError> {
        let expr = parse_expression(expression)?;
        self.evaluate_expr(&expr, ctx)
    }

    /// Evaluate an already parsed condition.
    ///
    /// # Errors
    ///
    /// Returns the evaluation error.
    pub fn evaluate_expr(
        &self,
        expr: &Expr,
        ctx: &mut EvaluationContext,
    ) -> Result<bool, ExpressionError> {
        let mut scope = EvaluationScope {
            ctx,
            engine: self,
            depth: 0,
            target: None,
        };
        scope.eval_bool(expr, "condition")
    }
}

// =============================================================================
// Evaluation Scope
// =============================================================================

/// State threaded through one evaluation.
///
/// Functions receive the scope to reach the context, the engine's
/// collaborators and the permission nesting depth.
pub struct EvaluationScope<'a> {
    ctx: &'a mut EvaluationContext,
    engine: &'a ExpressionEngine,
    depth: usize,
    target: Option<Value>,
}

impl<'a> EvaluationScope<'a> {
    /// The evaluation context.
    pub fn context(&mut self) -> &mut EvaluationContext {
        &mut *self.ctx
    }

    /// The engine running this evaluation.
    #[must_use]
    pub fn engine(&self) -> &'a ExpressionEngine {
        self.engine
    }

    /// Current permission nesting depth (0 at the top level).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Evaluate a permission-carried condition with `#target` bound.
    ///
    /// # Errors
    ///
    /// Returns `ExpressionError::DepthExceeded` past the configured depth,
    /// or the nested parse/evaluation error.
    pub fn evaluate_nested(&mut self, expression: &str, target: Value) -> Result<bool, ExpressionError> {
        let depth = self.depth + 1;
        if depth > self.engine.max_permission_depth {
            return Err(ExpressionError::DepthExceeded(
                self.engine.max_permission_depth,
            ));
        }

        let expr = parse_expression(expression)?;
        let mut nested = EvaluationScope {
            ctx: &mut *self.ctx,
            engine: self.engine,
            depth,
            target: Some(target),
        };
        nested.eval_bool(&expr, "permission condition")
    }

    fn eval_bool(&mut self, expr: &Expr, what: &str) -> Result<bool, ExpressionError> {
        let result = self.eval(expr)?;
        value::as_bool(&result, what)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Variable(name) => self.variable(name),
            Expr::Identifier(name) => {
                if self.engine.functions.resolve(name).is_some() {
                    self.call(name, &[])
                } else {
                    Err(ExpressionError::UnknownVariable(name.clone()))
                }
            }
            Expr::Property { target, name } => {
                let target = self.eval(target)?;
                value::property(&target, name)
            }
            Expr::Call { name, args } => self.call(name, args),
            Expr::Not(inner) => Ok(Value::Bool(!self.eval_bool(inner, "operand of 'not'")?)),
            Expr::Logical { op, left, right } => {
                let left = self.eval_bool(left, "logical operand")?;
                let result = match op {
                    LogicalOp::And => left && self.eval_bool(right, "logical operand")?,
                    LogicalOp::Or => left || self.eval_bool(right, "logical operand")?,
                };
                Ok(Value::Bool(result))
            }
            Expr::Compare { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                value::compare(*op, &left, &right).map(Value::Bool)
            }
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> Result<Value, ExpressionError> {
        let engine = self.engine;
        let function = engine
            .functions
            .resolve(name)
            .ok_or_else(|| ExpressionError::UnknownFunction(name.to_string()))?;

        let values = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<Vec<_>, _>>()?;

        function.call(name, self, &values)
    }

    fn variable(&self, name: &str) -> Result<Value, ExpressionError> {
        let ctx = &*self.ctx;
        match name {
            "subject" => Ok(ctx.subject_value()),
            "principal" => Ok(Value::String(ctx.subject.name.clone())),
            "resource" => Ok(ctx.resource_value()),
            "target" => Ok(self
                .target
                .clone()
                .unwrap_or_else(|| ctx.resource_value())),
            "action" => Ok(Value::String(ctx.action.clone())),
            "environment" => Ok(ctx.environment_value()),
            "attributes" => Ok(Value::Object(
                ctx.attributes()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )),
            "returnObject" => ctx
                .return_value()
                .cloned()
                .ok_or_else(|| ExpressionError::UnknownVariable(name.to_string())),
            _ => ctx
                .argument(name)
                .cloned()
                .ok_or_else(|| ExpressionError::UnknownVariable(name.to_string())),
        }
    }
}
