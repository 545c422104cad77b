//! `KennyError`: the error-kind taxonomy shared across every component,
//! carrying both a stable `kind()` string and an HTTP status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, thiserror::Error)]
pub enum KennyError {
    #[error("manifest invalid at {path}: {reason}")]
    ManifestInvalid { path: String, reason: String },

    #[error("egress forbidden: {reason}")]
    EgressForbidden { reason: String },

    #[error("agent {agent_id} already registered with a conflicting version")]
    AlreadyRegistered { agent_id: String },

    #[error("agent {agent_id} not found")]
    AgentUnknown { agent_id: String },

    #[error("capability {verb} not found")]
    CapabilityUnknown { verb: String },

    #[error("agent {agent_id} is unhealthy")]
    AgentUnhealthy { agent_id: String },

    #[error("deadline exceeded")]
    Timeout,

    #[error("dependency {agent_id} unavailable: {reason}")]
    DependencyUnavailable { agent_id: String, reason: String },

    #[error("blocked by policy: {reason}")]
    PolicyBlocked { reason: String },

    #[error("overloaded")]
    Overloaded,

    #[error("LLM interpretation failed: {reason}")]
    LlmInterpretationFailed { reason: String },

    #[error("cache entry invalidated mid-promotion")]
    CacheStaleInvalidated,

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl KennyError {
    /// The stable, key-safe string clients may switch on.
    pub fn kind(&self) -> &'static str {
        match self {
            KennyError::ManifestInvalid { .. } => "manifest_invalid",
            KennyError::EgressForbidden { .. } => "egress_forbidden",
            KennyError::AlreadyRegistered { .. } => "already_registered",
            KennyError::AgentUnknown { .. } => "agent_unknown",
            KennyError::CapabilityUnknown { .. } => "capability_unknown",
            KennyError::AgentUnhealthy { .. } => "agent_unhealthy",
            KennyError::Timeout => "timeout",
            KennyError::DependencyUnavailable { .. } => "dependency_unavailable",
            KennyError::PolicyBlocked { .. } => "policy_blocked",
            KennyError::Overloaded => "overloaded",
            KennyError::LlmInterpretationFailed { .. } => "llm_interpretation_failed",
            KennyError::CacheStaleInvalidated => "cache_stale_invalidated",
            KennyError::NotFound => "not_found",
            KennyError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            KennyError::ManifestInvalid { .. } => StatusCode::BAD_REQUEST,
            KennyError::EgressForbidden { .. } => StatusCode::FORBIDDEN,
            KennyError::AlreadyRegistered { .. } => StatusCode::CONFLICT,
            KennyError::AgentUnknown { .. } | KennyError::CapabilityUnknown { .. } | KennyError::NotFound => {
                StatusCode::NOT_FOUND
            }
            KennyError::AgentUnhealthy { .. } | KennyError::DependencyUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            KennyError::Timeout => StatusCode::REQUEST_TIMEOUT,
            KennyError::PolicyBlocked { .. } => StatusCode::FORBIDDEN,
            KennyError::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            KennyError::LlmInterpretationFailed { .. } | KennyError::CacheStaleInvalidated => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            KennyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error_kind: &'static str,
    pub message: String,
    pub correlation_id: Uuid,
}

/// Attaches a correlation id to an error for the wire envelope; `KennyError`'s bare
/// `IntoResponse` (used when no request-scoped id is available) mints a fresh one.
pub struct WithCorrelation(pub KennyError, pub Uuid);

impl IntoResponse for WithCorrelation {
    fn into_response(self) -> Response {
        let WithCorrelation(err, correlation_id) = self;
        let body = ErrorEnvelope { error_kind: err.kind(), message: err.to_string(), correlation_id };
        (err.status_code(), Json(body)).into_response()
    }
}

impl IntoResponse for KennyError {
    fn into_response(self) -> Response {
        WithCorrelation(self, Uuid::new_v4()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(KennyError::Overloaded.kind(), "overloaded");
        assert_eq!(KennyError::Timeout.kind(), "timeout");
        assert_eq!(
            KennyError::AgentUnknown { agent_id: "x".into() }.kind(),
            "agent_unknown"
        );
    }

    #[test]
    fn status_codes_match_error_table() {
        assert_eq!(
            KennyError::ManifestInvalid { path: "p".into(), reason: "r".into() }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(KennyError::Overloaded.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            KennyError::AgentUnknown { agent_id: "a".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
