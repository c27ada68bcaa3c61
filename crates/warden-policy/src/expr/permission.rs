//! `hasPermission` collaborator.
//!
//! The permission name checked is `ACTION` for the two-argument form and
//! `TYPE_ACTION` for the three-argument form, upper-cased. A catalog-backed
//! evaluator additionally runs the condition carried by the permission
//! definition, with `#target` bound to the permission target. That nested
//! evaluation is the only second-order evaluation in the language and is
//! bounded by the engine's permission depth.

use std::sync::Arc;

use serde_json::Value;

use super::ExpressionError;
use super::engine::EvaluationScope;
use crate::authority::PermissionCatalog;

/// Decides `hasPermission(target, [type,] action)`.
pub trait PermissionEvaluator: Send + Sync {
    /// Whether the subject in scope holds the permission on the target.
    ///
    /// # Errors
    ///
    /// Returns an `ExpressionError` if a nested condition fails or the
    /// depth limit is exceeded.
    fn has_permission(
        &self,
        scope: &mut EvaluationScope<'_>,
        target: &Value,
        target_type: Option<&str>,
        action: &str,
    ) -> Result<bool, ExpressionError>;
}

/// Authority name for a permission check.
#[must_use]
pub fn permission_name(target_type: Option<&str>, action: &str) -> String {
    match target_type {
        Some(target_type) => format!("{}_{}", target_type, action).to_uppercase(),
        None => action.to_uppercase(),
    }
}

/// Checks authority possession only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorityPermissionEvaluator;

impl PermissionEvaluator for AuthorityPermissionEvaluator {
    fn has_permission(
        &self,
        scope: &mut EvaluationScope<'_>,
        _target: &Value,
        target_type: Option<&str>,
        action: &str,
    ) -> Result<bool, ExpressionError> {
        let name = permission_name(target_type, action);
        Ok(scope.context().authorities.contains(&name))
    }
}

/// Checks authority possession, then the catalog definition's condition.
#[derive(Clone)]
pub struct CatalogPermissionEvaluator {
    catalog: Arc<dyn PermissionCatalog>,
}

impl CatalogPermissionEvaluator {
    /// Create an evaluator backed by a permission catalog.
    #[must_use]
    pub fn new(catalog: Arc<dyn PermissionCatalog>) -> Self {
        Self { catalog }
    }
}

impl PermissionEvaluator for CatalogPermissionEvaluator {
    fn has_permission(
        &self,
        scope: &mut EvaluationScope<'_>,
        target: &Value,
        target_type: Option<&str>,
        action: &str,
    ) -> Result<bool, ExpressionError> {
        let name = permission_name(target_type, action);
        if !scope.context().authorities.contains(&name) {
            return Ok(false);
        }

        let condition = self
            .catalog
            .find_permission_by_name(&name)
            .and_then(|definition| definition.condition_expression)
            .filter(|expression| !expression.trim().is_empty());

        match condition {
            Some(expression) => {
                tracing::trace!(
                    permission = %name,
                    depth = scope.depth() + 1,
                    "Evaluating permission condition"
                );
                scope.evaluate_nested(&expression, target.clone())
            }
            None => Ok(true),
        }
    }
}
