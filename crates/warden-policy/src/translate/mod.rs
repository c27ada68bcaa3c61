//! Policy-to-natural-language translation.
//!
//! Turns stored conditions into a description tree ([`ExpressionNode`]) and
//! readable text for audit screens. Translation shares the condition
//! grammar with the evaluation engine but never evaluates anything, and it
//! never fails: text that does not parse becomes an opaque terminal.
//!
//! # Example
//!
//! ```ignore
//! let translator = PolicyTranslator::new();
//! let node = translator.parse_condition("hasRole('ADMIN') and getRiskScore() < 50");
//! assert_eq!(
//!     node.render(),
//!     "all of (the user has the role ADMIN; the contextual risk score is less than 50)"
//! );
//! ```

pub mod analyzer;
pub mod node;
pub mod translators;

use std::sync::Arc;

use serde_json::Value;

pub use analyzer::{ExpressionAnalyzer, NamedAuthority, PolicyAnalysis};
pub use node::{ExpressionNode, LogicalOperator, Terminal};
pub use translators::{FunctionTranslator, TranslatorRegistry};

use crate::expr::{CompareOp, Expr, LogicalOp, parse_expression};
use crate::model::{AuthorizationPhase, Effect, Policy, PolicyCondition, TargetType};

/// Builds description trees for conditions and policies.
#[derive(Clone)]
pub struct PolicyTranslator {
    registry: TranslatorRegistry,
}

impl Default for PolicyTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyTranslator {
    /// A translator with every built-in strategy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: TranslatorRegistry::standard(),
        }
    }

    /// A translator with a custom registry.
    #[must_use]
    pub fn with_registry(registry: TranslatorRegistry) -> Self {
        Self { registry }
    }

    /// Register an additional strategy, after the existing ones.
    #[must_use]
    pub fn with_translator(mut self, translator: Arc<dyn FunctionTranslator>) -> Self {
        self.registry.register(translator);
        self
    }

    /// Tree for a whole policy: OR over rules, AND over each rule's
    /// conditions. A policy without conditions yields an "always" terminal.
    #[must_use]
    pub fn parse_policy(&self, policy: &Policy) -> ExpressionNode {
        if policy.is_unconditional() {
            return ExpressionNode::terminal(Terminal::new("true", "always"));
        }

        let rules: Vec<ExpressionNode> = policy
            .rules
            .iter()
            .map(|rule| {
                let conditions = rule.conditions.iter().map(|c| self.parse_condition_in_phase(c)).collect();
                ExpressionNode::combine(LogicalOperator::And, conditions)
            })
            .collect();

        ExpressionNode::combine(LogicalOperator::Or, rules)
    }

    /// Tree for one stored condition.
    #[must_use]
    pub fn parse_condition(&self, expression: &str) -> ExpressionNode {
        match parse_expression(expression) {
            Ok(expr) => self.translate(&expr),
            Err(e) => {
                tracing::debug!(expression = %expression, error = %e, "Condition kept as opaque text");
                ExpressionNode::opaque(expression)
            }
        }
    }

    fn parse_condition_in_phase(&self, condition: &PolicyCondition) -> ExpressionNode {
        let node = self.parse_condition(&condition.expression);
        match (condition.authorization_phase, node) {
            (AuthorizationPhase::Post, ExpressionNode::Terminal(mut terminal)) => {
                terminal.description = format!("after the call, {}", terminal.description);
                ExpressionNode::Terminal(terminal)
            }
            (AuthorizationPhase::Post, node) => ExpressionNode::terminal(Terminal::new(
                condition.expression.clone(),
                format!("after the call, {}", node.render()),
            )),
            (AuthorizationPhase::Pre, node) => node,
        }
    }

    /// One sentence describing the policy's effect, targets and condition.
    #[must_use]
    pub fn describe_policy(&self, policy: &Policy) -> String {
        let targets: Vec<String> = policy
            .targets
            .iter()
            .map(|t| match (t.target_type, &t.http_method) {
                (TargetType::Url, Some(method)) => format!("{} {}", method.to_uppercase(), t.target_identifier),
                (TargetType::Url, None) => t.target_identifier.clone(),
                (TargetType::Method, _) => format!("calls to {}", t.target_identifier),
            })
            .collect();

        let verb = match policy.effect {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        };
        let scope = if targets.is_empty() {
            "nothing".to_string()
        } else {
            targets.join(", ")
        };

        if policy.is_unconditional() {
            format!("{} access to {} unconditionally", verb, scope)
        } else {
            format!("{} access to {} when {}", verb, scope, self.parse_policy(policy).render())
        }
    }

    fn translate(&self, expr: &Expr) -> ExpressionNode {
        match expr {
            Expr::Logical { op, .. } => {
                let operator = match op {
                    LogicalOp::And => LogicalOperator::And,
                    LogicalOp::Or => LogicalOperator::Or,
                };
                let mut operands = Vec::new();
                flatten(expr, *op, &mut operands);
                let children = operands.into_iter().map(|e| self.translate(e)).collect();
                ExpressionNode::combine(operator, children)
            }
            Expr::Not(inner) => ExpressionNode::combine(LogicalOperator::Not, vec![self.translate(inner)]),
            Expr::Call { name, args } => self.translate_call(name, args, &expr.to_string()),
            Expr::Identifier(name) => self.translate_call(name, &[], name),
            Expr::Literal(Value::Bool(true)) => ExpressionNode::terminal(Terminal::new("true", "always")),
            Expr::Literal(Value::Bool(false)) => ExpressionNode::terminal(Terminal::new("false", "never")),
            Expr::Compare { op, left, right } => self.translate_comparison(expr, *op, left, right),
            other => ExpressionNode::opaque(other.to_string()),
        }
    }

    fn translate_call(&self, name: &str, args: &[Expr], text: &str) -> ExpressionNode {
        match self.registry.resolve(name) {
            Some(translator) => ExpressionNode::terminal(translator.translate(name, args, text)),
            None => ExpressionNode::opaque(text),
        }
    }

    fn translate_comparison(&self, expr: &Expr, op: CompareOp, left: &Expr, right: &Expr) -> ExpressionNode {
        let relation = match op {
            CompareOp::Eq => "equals",
            CompareOp::Ne => "does not equal",
            CompareOp::Lt => "is less than",
            CompareOp::Le => "is at most",
            CompareOp::Gt => "is greater than",
            CompareOp::Ge => "is at least",
        };
        let description = format!(
            "{} {} {}",
            self.describe_operand(left),
            relation,
            self.describe_operand(right)
        );

        let mut terminal = Terminal::new(expr.to_string(), description);
        for operand in [left, right] {
            if let Expr::Call { name, args } = operand
                && let Some(translator) = self.registry.resolve(name)
            {
                let implied = translator.translate(name, args, "");
                terminal.authorities.extend(implied.authorities);
                terminal.requires_auth |= implied.requires_auth;
                terminal.subject_type = terminal.subject_type.or(implied.subject_type);
            }
        }
        ExpressionNode::terminal(terminal)
    }

    fn describe_operand(&self, expr: &Expr) -> String {
        match expr {
            Expr::Literal(Value::String(s)) => format!("'{}'", s),
            Expr::Literal(v) => v.to_string(),
            Expr::Variable(name) => describe_variable(name),
            Expr::Property { target, name } => format!("the {} of {}", name, self.describe_operand(target)),
            Expr::Call { name, args } => self
                .registry
                .resolve(name)
                .and_then(|t| t.describe_value(name, args))
                .unwrap_or_else(|| expr.to_string()),
            other => other.to_string(),
        }
    }
}

fn flatten<'e>(expr: &'e Expr, op: LogicalOp, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::Logical { op: inner, left, right } if *inner == op => {
            flatten(left, op, out);
            flatten(right, op, out);
        }
        other => out.push(other),
    }
}

fn describe_variable(name: &str) -> String {
    match name {
        "subject" => "the current user".to_string(),
        "principal" => "the current user's name".to_string(),
        "returnObject" => "the returned object".to_string(),
        "target" => "the target".to_string(),
        "resource" => "the requested resource".to_string(),
        "action" => "the requested action".to_string(),
        "environment" => "the request environment".to_string(),
        "attributes" => "the user's attributes".to_string(),
        other => format!("the argument '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PolicyRule, PolicyTarget};

    #[test]
    fn test_single_role_policy() {
        let policy = Policy::new("p", "Admins", Effect::Allow)
            .with_target(PolicyTarget::url("/admin/**"))
            .with_rule(PolicyRule::new("admins").with_condition(PolicyCondition::pre("hasRole('ADMIN')")));

        let node = PolicyTranslator::new().parse_policy(&policy);
        assert_eq!(node.required_authorities().into_iter().collect::<Vec<_>>(), vec!["ROLE_ADMIN"]);
        assert_eq!(node.subject_type().map(|k| k.as_str()), Some("role"));
    }

    #[test]
    fn test_unparseable_condition_is_opaque() {
        let raw = "hasRole('ADMIN' and";
        match PolicyTranslator::new().parse_condition(raw) {
            ExpressionNode::Terminal(terminal) => assert_eq!(terminal.text, raw),
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_deeply_nested_condition_is_opaque() {
        let raw = format!("{}hasRole('ADMIN'){}", "(".repeat(100_000), ")".repeat(100_000));
        match PolicyTranslator::new().parse_condition(&raw) {
            ExpressionNode::Terminal(terminal) => assert_eq!(terminal.text, raw),
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_chain_is_flattened() {
        let node = PolicyTranslator::new().parse_condition("hasRole('A') or hasRole('B') or hasGroup('C')");
        match &node {
            ExpressionNode::Logical { op, children } => {
                assert_eq!(*op, LogicalOperator::Or);
                assert_eq!(children.len(), 3);
            }
            other => panic!("unexpected node: {other:?}"),
        }
        assert_eq!(node.subject_type(), None);
        assert_eq!(node.required_authorities().len(), 3);
    }

    #[test]
    fn test_comparison_rendering() {
        let translator = PolicyTranslator::new();
        assert_eq!(
            translator.parse_condition("hasRole('ADMIN') and getRiskScore() < 50").render(),
            "all of (the user has the role ADMIN; the contextual risk score is less than 50)"
        );
        assert_eq!(
            translator.parse_condition("#returnObject.owner == #subject.name").render(),
            "the owner of the returned object equals the name of the current user"
        );
    }

    #[test]
    fn test_negation_and_unknown_call() {
        let node = PolicyTranslator::new().parse_condition("not isWeekday()");
        assert_eq!(node.render(), "it is not the case that the condition `isWeekday()` holds");
        assert!(node.required_authorities().is_empty());
    }

    #[test]
    fn test_describe_policy() {
        let translator = PolicyTranslator::new();
        let policy = Policy::new("p", "Owner reads", Effect::Allow)
            .with_target(PolicyTarget::method("DocumentService.getDocument(String)"))
            .with_rule(
                PolicyRule::new("owner")
                    .with_condition(PolicyCondition::pre("isAuthenticated()"))
                    .with_condition(PolicyCondition::post("#returnObject.owner == #principal")),
            );
        assert_eq!(
            translator.describe_policy(&policy),
            "Allow access to calls to DocumentService.getDocument(String) when all of \
             (the user is signed in; after the call, the owner of the returned object equals the current user's name)"
        );

        let lockdown = Policy::new("l", "Lockdown", Effect::Deny)
            .with_target(PolicyTarget::url_with_method("/admin/**", "delete"));
        assert_eq!(
            translator.describe_policy(&lockdown),
            "Deny access to DELETE /admin/** unconditionally"
        );
    }
}
