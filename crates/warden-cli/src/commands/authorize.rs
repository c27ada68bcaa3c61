use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use warden_policy::{InvocationDescriptor, MethodSignature, PolicyEngine, PolicyError};

use crate::cli::{AuthorizeArgs, OutputFormat};
use crate::loader::{parse_pairs, parse_value, subject};
use crate::output::{emit, print_allowed, print_denied, print_field};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PhaseOutcome {
    phase: &'static str,
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl PhaseOutcome {
    fn from_result(phase: &'static str, result: Result<(), PolicyError>) -> Result<Self> {
        match result {
            Ok(()) => Ok(Self {
                phase,
                allowed: true,
                policy_id: None,
                message: None,
            }),
            Err(PolicyError::AccessDenied { message, policy_id }) => Ok(Self {
                phase,
                allowed: false,
                policy_id,
                message: Some(message),
            }),
            Err(other) => Err(other.into()),
        }
    }
}

pub fn invocation(args: &AuthorizeArgs) -> Result<InvocationDescriptor> {
    let signature: MethodSignature = args.signature.parse()?;
    let mut invocation = InvocationDescriptor::new(signature);
    for (name, value) in parse_pairs(&args.arguments)? {
        invocation = invocation.with_argument(name, parse_value(&value));
    }
    Ok(invocation)
}

/// Returns whether every evaluated phase allowed the invocation.
pub async fn authorize(engine: &PolicyEngine, args: &AuthorizeArgs, format: OutputFormat) -> Result<bool> {
    let subject = subject(&args.subject)?;
    let invocation = invocation(args)?;
    let interceptor = engine.interceptor();

    let mut outcomes = vec![PhaseOutcome::from_result(
        "pre",
        interceptor.pre_authorize(&subject, &invocation).await,
    )?];

    if outcomes[0].allowed
        && let Some(raw) = args.return_value.as_deref()
    {
        let value: Value = serde_json::from_str(raw).context("--return-value must be valid JSON")?;
        outcomes.push(PhaseOutcome::from_result(
            "post",
            interceptor.post_authorize(&subject, &invocation, &value).await,
        )?);
    }

    let allowed = outcomes.iter().all(|o| o.allowed);

    emit(format, &outcomes, || {
        print_field("Invocation", &invocation.signature);
        print_field("Subject", &subject.name);
        for outcome in &outcomes {
            let label = outcome.phase.to_uppercase();
            match &outcome.message {
                None => print_allowed(&format!("{label} ALLOW")),
                Some(message) => print_denied(&format!("{label} DENY {message}")),
            }
        }
    })?;

    Ok(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::SubjectArgs;

    #[test]
    fn test_invocation_from_args() {
        let args = AuthorizeArgs {
            signature: "DocumentService.getDocument(String)".to_string(),
            subject: SubjectArgs {
                user: Some("alice".to_string()),
                roles: Vec::new(),
                authorities: Vec::new(),
                attributes: Vec::new(),
            },
            arguments: vec!["id=\"doc-1\"".to_string(), "limit=5".to_string()],
            return_value: None,
        };

        let invocation = invocation(&args).unwrap();
        assert_eq!(invocation.signature.canonical(), "DocumentService.getDocument(String)");
        assert_eq!(invocation.arguments[0].1, Value::String("doc-1".to_string()));
        assert_eq!(invocation.arguments[1].1, Value::from(5));
    }

    #[test]
    fn test_phase_outcome() {
        let denied = PhaseOutcome::from_result("pre", Err(PolicyError::denied_by_policy("p1", "nope"))).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.policy_id.as_deref(), Some("p1"));

        assert!(PhaseOutcome::from_result("pre", Err(PolicyError::retrieval("down"))).is_err());
    }
}
