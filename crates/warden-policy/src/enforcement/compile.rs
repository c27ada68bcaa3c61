//! Policy to decision-expression compilation.
//!
//! A policy compiles to one condition-language string per phase: rules are
//! OR-combined, conditions inside a rule AND-combined, and a DENY policy
//! negates the result. The string is parsed again at each decision.

use crate::model::{AuthorizationPhase, Effect, Policy};

/// Constant expression granting access.
pub const ALWAYS: &str = "true";

/// Constant expression refusing access.
pub const NEVER: &str = "false";

/// Compile a policy's conditions for one phase.
///
/// - A policy without rules, or with a rule that has no conditions, applies
///   unconditionally: `true` for ALLOW and `false` for DENY in the PRE phase,
///   `true` in the POST phase (the PRE phase already decided).
/// - Otherwise only rules with conditions in `phase` take part. If none do,
///   the phase imposes no constraint and compiles to `true`.
#[must_use]
pub fn compile_policy(policy: &Policy, phase: AuthorizationPhase) -> String {
    if policy.is_unconditional() {
        return match (phase, policy.effect) {
            (AuthorizationPhase::Post, _) => ALWAYS.to_string(),
            (AuthorizationPhase::Pre, Effect::Allow) => ALWAYS.to_string(),
            (AuthorizationPhase::Pre, Effect::Deny) => NEVER.to_string(),
        };
    }

    let rules: Vec<String> = policy
        .rules
        .iter()
        .filter_map(|rule| {
            let conditions: Vec<String> = rule
                .conditions_for(phase)
                .map(|c| format!("({})", c.expression.trim()))
                .collect();
            (!conditions.is_empty()).then(|| conditions.join(" and "))
        })
        .collect();

    if rules.is_empty() {
        return ALWAYS.to_string();
    }

    let body = if rules.len() == 1 {
        rules.into_iter().collect::<String>()
    } else {
        rules
            .iter()
            .map(|r| format!("({})", r))
            .collect::<Vec<_>>()
            .join(" or ")
    };

    match policy.effect {
        Effect::Allow => body,
        Effect::Deny => format!("!({})", body),
    }
}

/// Returns `true` if the policy constrains the given phase at all.
#[must_use]
pub fn constrains_phase(policy: &Policy, phase: AuthorizationPhase) -> bool {
    compile_policy(policy, phase) != ALWAYS
}
