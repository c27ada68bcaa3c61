//! Invocation enforcement.
//!
//! Guards an operation in two phases. The PRE phase runs before the
//! operation with its arguments bound; the POST phase runs after it with the
//! serialized return value bound as `#returnObject`. Only the
//! highest-priority policy registered for the signature is consulted.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::compile::{ALWAYS, compile_policy};
use super::decision::DefaultDecision;
use crate::PolicyResult;
use crate::authority::Subject;
use crate::context::{EvaluationContextBuilder, InvocationDescriptor};
use crate::error::PolicyError;
use crate::expr::ExpressionEngine;
use crate::model::AuthorizationPhase;
use crate::retrieval::PolicyRetrievalPoint;

/// Invocation enforcement point.
pub struct MethodSecurityInterceptor {
    retrieval: Arc<PolicyRetrievalPoint>,
    contexts: EvaluationContextBuilder,
    engine: Arc<ExpressionEngine>,
    default_decision: DefaultDecision,
}

impl MethodSecurityInterceptor {
    /// Create an interceptor. `default_decision` applies to invocations no
    /// policy targets.
    #[must_use]
    pub fn new(
        retrieval: Arc<PolicyRetrievalPoint>,
        contexts: EvaluationContextBuilder,
        engine: Arc<ExpressionEngine>,
        default_decision: DefaultDecision,
    ) -> Self {
        Self {
            retrieval,
            contexts,
            engine,
            default_decision,
        }
    }

    /// Authorize an invocation before it runs.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::AccessDenied` if the PRE decision denies,
    /// `PolicyError::Retrieval` or `PolicyError::Authority` if a
    /// collaborator fails.
    pub async fn pre_authorize(
        &self,
        subject: &Subject,
        invocation: &InvocationDescriptor,
    ) -> PolicyResult<()> {
        self.authorize(subject, invocation, AuthorizationPhase::Pre, None)
            .await
    }

    /// Authorize an invocation's result after it ran.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::AccessDenied` if the POST decision denies,
    /// `PolicyError::Retrieval` or `PolicyError::Authority` if a
    /// collaborator fails.
    pub async fn post_authorize(
        &self,
        subject: &Subject,
        invocation: &InvocationDescriptor,
        return_value: &Value,
    ) -> PolicyResult<()> {
        self.authorize(subject, invocation, AuthorizationPhase::Post, Some(return_value))
            .await
    }

    /// Run an operation between a PRE and a POST decision.
    ///
    /// The operation is not run if the PRE decision denies. Its result is
    /// withheld if the POST decision denies.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, `PolicyError::AccessDenied` from
    /// either phase, or `PolicyError::Internal` if the result cannot be
    /// serialized for the POST decision.
    pub async fn invoke<T, F, Fut>(
        &self,
        subject: &Subject,
        invocation: &InvocationDescriptor,
        operation: F,
    ) -> PolicyResult<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = PolicyResult<T>>,
    {
        self.pre_authorize(subject, invocation).await?;

        let result = operation().await?;

        let value = serde_json::to_value(&result).map_err(|e| {
            PolicyError::internal(format!(
                "Failed to serialize result of {}: {}",
                invocation.signature, e
            ))
        })?;
        self.post_authorize(subject, invocation, &value).await?;

        Ok(result)
    }

    async fn authorize(
        &self,
        subject: &Subject,
        invocation: &InvocationDescriptor,
        phase: AuthorizationPhase,
        return_value: Option<&Value>,
    ) -> PolicyResult<()> {
        let signature = invocation.signature.canonical();
        let policies = self.retrieval.find_method_policies(&signature).await?;

        let Some(policy) = policies.first() else {
            tracing::debug!(
                signature = %signature,
                phase = ?phase,
                default = ?self.default_decision,
                "No method policy registered"
            );
            return match self.default_decision {
                DefaultDecision::Allow => Ok(()),
                DefaultDecision::Deny => Err(PolicyError::access_denied(format!(
                    "No policy grants invocation of {}",
                    signature
                ))),
            };
        };

        let expression = compile_policy(policy, phase);
        if expression == ALWAYS {
            return Ok(());
        }

        let mut ctx = self.contexts.for_invocation(subject, invocation).await?;
        if let Some(value) = return_value {
            ctx.set_return_value(value.clone());
        }

        let allowed = self.engine.evaluate(&expression, &mut ctx);

        tracing::debug!(
            policy_id = %policy.id,
            signature = %signature,
            subject = %subject.name,
            phase = ?phase,
            allowed = allowed,
            "Method policy evaluated"
        );

        if allowed {
            Ok(())
        } else {
            Err(PolicyError::denied_by_policy(
                policy.id.clone(),
                format!("Invocation of {} denied by policy '{}'", signature, policy.name),
            ))
        }
    }
}
