//! HTTP enforcement middleware.
//!
//! Wraps an axum router so every request is decided by a
//! [`UrlPolicyManager`] before it reaches a handler. The authenticated
//! [`Subject`] is read from the request extensions, where an upstream
//! authentication layer is expected to put it; requests without one are
//! decided as anonymous.
//!
//! The client address comes only from the connection (`ConnectInfo`);
//! forwarding headers are client-controlled and never populate it. Serve the
//! router with `into_make_service_with_connect_info::<SocketAddr>()` so
//! network-origin risk can be assessed.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use warden_policy::middleware::enforce_url_policies;
//!
//! let app = Router::new()
//!     .route("/admin/users", get(list_users))
//!     .layer(middleware::from_fn_with_state(url_manager.clone(), enforce_url_policies))
//!     .layer(middleware::from_fn(authenticate));
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::authority::Subject;
use crate::context::RequestDescriptor;
use crate::enforcement::UrlPolicyManager;
use crate::error::PolicyError;

// =============================================================================
// Middleware
// =============================================================================

/// Decide the request against URL policies and reject it on denial.
///
/// # Errors
///
/// Returns `PolicyError` (which implements `IntoResponse`) if access is
/// denied or the decision could not be made.
pub async fn enforce_url_policies(
    State(manager): State<Arc<UrlPolicyManager>>,
    request: Request,
    next: Next,
) -> Result<Response, PolicyError> {
    let subject = request
        .extensions()
        .get::<Subject>()
        .cloned()
        .unwrap_or_else(Subject::anonymous);

    let descriptor = describe_request(&request);

    if let Err(e) = manager.enforce(&subject, &descriptor).await {
        tracing::info!(
            subject = %subject.name,
            method = %descriptor.method,
            path = %descriptor.path,
            code = e.code(),
            "Request rejected by URL policy"
        );
        return Err(e);
    }

    Ok(next.run(request).await)
}

/// Build a request descriptor from an axum request.
///
/// Path and query are percent-decoded. The remote address is taken from
/// `ConnectInfo` only and left unset without it.
#[must_use]
pub fn describe_request(request: &Request) -> RequestDescriptor {
    let uri = request.uri();
    let mut descriptor = RequestDescriptor::from_target(request.method().as_str(), uri.path(), uri.query());

    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            descriptor = descriptor.with_header(name.as_str(), value);
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        descriptor = descriptor.with_remote_address(addr.ip());
    }

    descriptor
}

// =============================================================================
// IntoResponse Implementation
// =============================================================================

impl IntoResponse for PolicyError {
    fn into_response(self) -> Response {
        let status = match &self {
            PolicyError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            PolicyError::Retrieval { .. } | PolicyError::Authority { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PolicyError::Configuration { .. } | PolicyError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, category = %self.category(), "Policy enforcement failed");
        }

        let (message, policy_id) = match &self {
            PolicyError::AccessDenied { message, policy_id } => (message.clone(), policy_id.clone()),
            other => (other.to_string(), None),
        };

        let mut body = json!({
            "error": self.code(),
            "message": message,
        });
        if let Some(policy_id) = policy_id {
            body["policyId"] = json!(policy_id);
        }

        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_access_denied_response() {
        let response = PolicyError::denied_by_policy("admin-area", "Access denied by policy 'Admin area'")
            .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_json(response).await;
        assert_eq!(body["error"], "access-denied");
        assert_eq!(body["policyId"], "admin-area");
    }

    #[tokio::test]
    async fn test_retrieval_failure_response() {
        let response = PolicyError::retrieval("connection refused").into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(body["error"], "policy-retrieval-failed");
        assert!(body.get("policyId").is_none());
    }

    #[test]
    fn test_describe_request() {
        let mut request = Request::builder()
            .method("post")
            .uri("/docs/7?draft=true&lang=en")
            .header("X-Tenant", "acme")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("203.0.113.9:51000".parse::<SocketAddr>().unwrap()));

        let descriptor = describe_request(&request);
        assert_eq!(descriptor.method, "POST");
        assert_eq!(descriptor.path, "/docs/7");
        assert_eq!(descriptor.query.get("draft").map(String::as_str), Some("true"));
        assert_eq!(descriptor.headers.get("x-tenant").map(String::as_str), Some("acme"));
        assert_eq!(
            descriptor.remote_address,
            Some("203.0.113.9".parse::<std::net::IpAddr>().unwrap())
        );
    }

    #[test]
    fn test_forwarded_header_is_not_the_remote_address() {
        let request = Request::builder()
            .uri("/reports")
            .header("X-Forwarded-For", "127.0.0.1")
            .body(Body::empty())
            .unwrap();

        let descriptor = describe_request(&request);
        assert_eq!(descriptor.remote_address, None);
        assert_eq!(
            descriptor.headers.get("x-forwarded-for").map(String::as_str),
            Some("127.0.0.1")
        );
    }

    #[test]
    fn test_describe_request_decodes_target() {
        let request = Request::builder()
            .uri("/%61dmin/users?q=a%20b&tag=x%2By")
            .body(Body::empty())
            .unwrap();

        let descriptor = describe_request(&request);
        assert_eq!(descriptor.path, "/admin/users");
        assert_eq!(descriptor.query.get("q").map(String::as_str), Some("a b"));
        assert_eq!(descriptor.query.get("tag").map(String::as_str), Some("x+y"));
    }
}
