//! Access decisions produced by the enforcement layer.

use serde::{Deserialize, Serialize};

use crate::PolicyResult;
use crate::error::PolicyError;

// =============================================================================
// Access Decision
// =============================================================================

/// Result of enforcing policies for one request or invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum AccessDecision {
    /// Access is granted.
    Allow,
    /// Access is denied with a reason.
    Deny(DenyReason),
}

impl AccessDecision {
    /// Returns `true` if access was granted.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Returns `true` if access was denied.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }

    /// Get the deny reason if access was denied.
    #[must_use]
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Deny(reason) => Some(reason),
            Self::Allow => None,
        }
    }

    /// Convert into a result, mapping a denial to `PolicyError::AccessDenied`.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::AccessDenied` if access was denied.
    pub fn into_result(self) -> PolicyResult<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(reason.into()),
        }
    }
}

// =============================================================================
// Deny Reason
// =============================================================================

/// Reason for access denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenyReason {
    /// Error code for programmatic handling.
    pub code: String,

    /// Human-readable error message.
    pub message: String,

    /// ID of the policy that denied access.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
}

impl DenyReason {
    /// Create a denial reason for no matching policy.
    #[must_use]
    pub fn no_matching_policy() -> Self {
        Self {
            code: "no-matching-policy".to_string(),
            message: "No policy grants access to this resource".to_string(),
            policy_id: None,
        }
    }

    /// Create a denial reason from a policy decision.
    #[must_use]
    pub fn policy_denied(policy_id: &str, policy_name: &str) -> Self {
        Self {
            code: "policy-denied".to_string(),
            message: format!("Access denied by policy '{}'", policy_name),
            policy_id: Some(policy_id.to_string()),
        }
    }
}

impl From<DenyReason> for PolicyError {
    fn from(reason: DenyReason) -> Self {
        match reason.policy_id {
            Some(policy_id) => PolicyError::denied_by_policy(policy_id, reason.message),
            None => PolicyError::access_denied(reason.message),
        }
    }
}

/// Decision applied when no policy addresses a request or invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultDecision {
    /// Allow access if no policy applies.
    Allow,
    /// Deny access unless a policy applies and grants it.
    Deny,
}

impl DefaultDecision {
    /// The access decision this default stands for.
    #[must_use]
    pub fn to_decision(self) -> AccessDecision {
        match self {
            Self::Allow => AccessDecision::Allow,
            Self::Deny => AccessDecision::Deny(DenyReason::no_matching_policy()),
        }
    }
}

// =============================================================================
// Evaluation Result
// =============================================================================

/// Complete result of a request-path check with audit information.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// The final access decision.
    pub decision: AccessDecision,

    /// The mapping entry that matched, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchedPolicy>,

    /// Compiled expression that was evaluated, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    /// Generation of the mapping table used.
    pub table_generation: u64,

    /// Time taken to reach the decision (milliseconds).
    pub evaluation_time_ms: f64,
}

/// Information about the matched mapping entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedPolicy {
    /// Policy ID.
    pub policy_id: String,

    /// Policy name.
    pub policy_name: String,

    /// Target pattern that matched.
    pub pattern: String,

    /// HTTP method restriction of the target, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_helpers() {
        assert!(AccessDecision::Allow.is_allowed());
        let deny = AccessDecision::Deny(DenyReason::policy_denied("p1", "Admin area"));
        assert!(deny.is_denied());
        assert_eq!(deny.deny_reason().unwrap().policy_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_into_result() {
        assert!(AccessDecision::Allow.into_result().is_ok());

        let err = AccessDecision::Deny(DenyReason::policy_denied("p1", "Admin area"))
            .into_result()
            .unwrap_err();
        match err {
            PolicyError::AccessDenied { policy_id, message } => {
                assert_eq!(policy_id.as_deref(), Some("p1"));
                assert!(message.contains("Admin area"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = DefaultDecision::Deny.to_decision().into_result().unwrap_err();
        assert!(matches!(err, PolicyError::AccessDenied { policy_id: None, .. }));
    }

    #[test]
    fn test_default_decision_serde() {
        let allow: DefaultDecision = serde_json::from_str("\"allow\"").unwrap();
        assert_eq!(allow, DefaultDecision::Allow);
        assert_eq!(serde_json::to_string(&DefaultDecision::Deny).unwrap(), "\"deny\"");
    }

    #[test]
    fn test_decision_serialization() {
        let json = serde_json::to_value(AccessDecision::Deny(DenyReason::no_matching_policy())).unwrap();
        assert_eq!(json["decision"], "deny");
        assert_eq!(json["code"], "no-matching-policy");
    }
}
