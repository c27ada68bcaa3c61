//! Persisted policy aggregate.
//!
//! Policies are authored and persisted elsewhere; the engine only reads them.
//! A [`Policy`] applies to one or more [`PolicyTarget`]s and carries a list of
//! [`PolicyRule`]s. Conditions inside a rule are combined with AND, rules
//! inside a policy are combined with OR.
//!
//! # Example
//!
//! ```
//! use warden_policy::model::{Effect, Policy, PolicyCondition, PolicyRule, PolicyTarget};
//!
//! let policy = Policy::new("admin-area", "Admin area", Effect::Allow)
//!     .with_priority(10)
//!     .with_target(PolicyTarget::url("/admin/**"))
//!     .with_rule(PolicyRule::new("admins only").with_condition(PolicyCondition::pre("hasRole('ADMIN')")));
//!
//! assert!(policy.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};

// =============================================================================
// Enumerations
// =============================================================================

/// Outcome a policy produces when its conditions hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    /// Grant access when the conditions hold.
    Allow,
    /// Refuse access when the conditions hold.
    Deny,
}

impl Effect {
    /// Lower-case label used in logs and rendered text.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// Shape of the resource a target addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetType {
    /// A URL path pattern (Ant-style `*`, `**`, `?`).
    Url,
    /// A canonical operation signature.
    Method,
}

/// When a condition is evaluated relative to the protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthorizationPhase {
    /// Before dispatch / invocation.
    #[default]
    Pre,
    /// After invocation, with the result bound as `#returnObject`.
    Post,
}

// =============================================================================
// Policy Aggregate
// =============================================================================

/// A persisted access control policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Unique identifier.
    pub id: String,

    /// Human-readable policy name.
    pub name: String,

    /// Detailed description of the policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Outcome when the policy's conditions hold.
    pub effect: Effect,

    /// Evaluation order (lower = evaluated first).
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Resources this policy applies to.
    #[serde(default)]
    pub targets: Vec<PolicyTarget>,

    /// Rules (OR-combined).
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

fn default_priority() -> i32 {
    100
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            description: None,
            effect: Effect::Deny,
            priority: default_priority(),
            targets: Vec::new(),
            rules: Vec::new(),
        }
    }
}

impl Policy {
    /// Create a policy with no targets and no rules.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, effect: Effect) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            effect,
            ..Default::default()
        }
    }

    /// Set the evaluation priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a target.
    #[must_use]
    pub fn with_target(mut self, target: PolicyTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Add a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Targets of the given type.
    pub fn targets_of(&self, target_type: TargetType) -> impl Iterator<Item = &PolicyTarget> {
        self.targets
            .iter()
            .filter(move |t| t.target_type == target_type)
    }

    /// Returns `true` if any target has the given type.
    #[must_use]
    pub fn has_target_type(&self, target_type: TargetType) -> bool {
        self.targets_of(target_type).next().is_some()
    }

    /// Returns `true` if some target addresses the given canonical signature.
    #[must_use]
    pub fn targets_signature(&self, signature: &str) -> bool {
        self.targets_of(TargetType::Method)
            .any(|t| t.target_identifier == signature)
    }

    /// Returns `true` if the effect applies regardless of any condition.
    ///
    /// This is the case when the policy has no rules, or when any rule has no
    /// conditions (an empty AND is true, which makes the whole OR true).
    #[must_use]
    pub fn is_unconditional(&self) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|r| r.conditions.is_empty())
    }

    /// Validate the policy structure.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID or name is empty, a target identifier is
    /// empty, a URL target is not an absolute path, or a condition
    /// expression is blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }

        for target in &self.targets {
            if target.target_identifier.trim().is_empty() {
                return Err(ValidationError::InvalidTarget(
                    "target identifier cannot be empty".to_string(),
                ));
            }
            if target.target_type == TargetType::Url && !target.target_identifier.starts_with('/')
            {
                return Err(ValidationError::InvalidTarget(format!(
                    "URL target '{}' must start with '/'",
                    target.target_identifier
                )));
            }
        }

        for rule in &self.rules {
            if rule.conditions.iter().any(|c| c.expression.trim().is_empty()) {
                return Err(ValidationError::EmptyCondition(rule.description.clone()));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Target
// =============================================================================

/// The (resource shape, identifier) pair a policy applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTarget {
    /// Resource shape.
    pub target_type: TargetType,

    /// Path pattern (URL) or canonical signature (METHOD).
    pub target_identifier: String,

    /// Optional HTTP method restriction for URL targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
}

impl PolicyTarget {
    /// A URL target matching any HTTP method.
    #[must_use]
    pub fn url(pattern: impl Into<String>) -> Self {
        Self {
            target_type: TargetType::Url,
            target_identifier: pattern.into(),
            http_method: None,
        }
    }

    /// A URL target restricted to one HTTP method.
    #[must_use]
    pub fn url_with_method(pattern: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target_type: TargetType::Url,
            target_identifier: pattern.into(),
            http_method: Some(method.into()),
        }
    }

    /// A method target for a canonical signature.
    #[must_use]
    pub fn method(signature: impl Into<String>) -> Self {
        Self {
            target_type: TargetType::Method,
            target_identifier: signature.into(),
            http_method: None,
        }
    }
}

// =============================================================================
// Rule and Condition
// =============================================================================

/// A conjunction of conditions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Conditions (AND-combined).
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
}

impl PolicyRule {
    /// Create a rule with no conditions.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            conditions: Vec::new(),
        }
    }

    /// Add a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: PolicyCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Conditions belonging to the given phase.
    pub fn conditions_for(
        &self,
        phase: AuthorizationPhase,
    ) -> impl Iterator<Item = &PolicyCondition> {
        self.conditions
            .iter()
            .filter(move |c| c.authorization_phase == phase)
    }
}

/// A single condition-language expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    /// Expression in the condition language.
    pub expression: String,

    /// Evaluation phase.
    #[serde(default)]
    pub authorization_phase: AuthorizationPhase,
}

impl PolicyCondition {
    /// A PRE-phase condition.
    #[must_use]
    pub fn pre(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            authorization_phase: AuthorizationPhase::Pre,
        }
    }

    /// A POST-phase condition.
    #[must_use]
    pub fn post(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            authorization_phase: AuthorizationPhase::Post,
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Structural policy validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field is missing or blank.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A target is malformed.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// A rule contains a blank condition expression.
    #[error("Rule '{0}' contains an empty condition")]
    EmptyCondition(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_policy_json() {
        let json = serde_json::json!({
            "id": "p1",
            "name": "Owner can read",
            "effect": "ALLOW",
            "priority": 5,
            "targets": [
                { "targetType": "METHOD", "targetIdentifier": "docs.DocumentService.read(long)" }
            ],
            "rules": [{
                "description": "owner",
                "conditions": [
                    { "expression": "#returnObject.owner == #subject.name", "authorizationPhase": "POST" }
                ]
            }]
        });

        let policy: Policy = serde_json::from_value(json).unwrap();
        assert_eq!(policy.effect, Effect::Allow);
        assert_eq!(policy.priority, 5);
        assert!(policy.has_target_type(TargetType::Method));
        assert!(!policy.has_target_type(TargetType::Url));
        assert_eq!(
            policy.rules[0].conditions[0].authorization_phase,
            AuthorizationPhase::Post
        );
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_defaults_applied() {
        let json = serde_json::json!({ "id": "p", "name": "n", "effect": "DENY" });
        let policy: Policy = serde_json::from_value(json).unwrap();
        assert_eq!(policy.priority, 100);
        assert!(policy.targets.is_empty());
        assert!(policy.is_unconditional());
    }

    #[test]
    fn test_condition_phase_defaults_to_pre() {
        let json = serde_json::json!({ "expression": "true" });
        let condition: PolicyCondition = serde_json::from_value(json).unwrap();
        assert_eq!(condition.authorization_phase, AuthorizationPhase::Pre);
    }

    #[test]
    fn test_is_unconditional() {
        let conditional = Policy::new("p", "p", Effect::Allow)
            .with_rule(PolicyRule::new("r").with_condition(PolicyCondition::pre("true")));
        assert!(!conditional.is_unconditional());

        let with_empty_rule = conditional.clone().with_rule(PolicyRule::new("empty"));
        assert!(with_empty_rule.is_unconditional());
    }

    #[test]
    fn test_validate_rejects_relative_url() {
        let policy =
            Policy::new("p", "p", Effect::Allow).with_target(PolicyTarget::url("admin/**"));
        assert!(matches!(
            policy.validate(),
            Err(ValidationError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_validate_rejects_blank_condition() {
        let policy = Policy::new("p", "p", Effect::Allow)
            .with_rule(PolicyRule::new("blank").with_condition(PolicyCondition::pre("  ")));
        assert_eq!(
            policy.validate(),
            Err(ValidationError::EmptyCondition("blank".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_missing_name() {
        let policy = Policy::new("p", "", Effect::Allow);
        assert_eq!(policy.validate(), Err(ValidationError::MissingField("name")));
    }

    #[test]
    fn test_targets_signature() {
        let policy = Policy::new("p", "p", Effect::Allow)
            .with_target(PolicyTarget::method("svc.Orders.get(long)"));
        assert!(policy.targets_signature("svc.Orders.get(long)"));
        assert!(!policy.targets_signature("svc.Orders.delete(long)"));
    }
}
