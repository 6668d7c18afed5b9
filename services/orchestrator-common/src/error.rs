//! Error taxonomy for the order orchestration core.
//!
//! Eight stable categories, each mapped to an HTTP status by the API layer.
//! Internal errors never leak detail to the client; everything else is
//! returned as-is.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("business rule violated: {message}")]
    BusinessRule { message: String },

    #[error("external service failure: {service}: {message}")]
    ExternalService { service: &'static str, message: String },

    #[error("transient failure, retries exhausted: {message}")]
    Transient { message: String },

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Conflict { .. } => "CONFLICT",
            Self::BusinessRule { .. } => "BUSINESS_RULE",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE",
            Self::Transient { .. } => "TRANSIENT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status this error maps to, per the error handling design.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Unauthorized => 401,
            Self::Forbidden { .. } => 403,
            Self::Conflict { .. } => 409,
            Self::BusinessRule { .. } => 422,
            Self::ExternalService { .. } => 502,
            Self::Transient { .. } => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Message safe to return to the client. Internal errors are never
    /// echoed verbatim — only a generic message plus the caller-supplied
    /// incident id identifies them.
    #[must_use]
    pub fn client_message(&self, incident_id: Option<&str>) -> String {
        match self {
            Self::Internal(_) => match incident_id {
                Some(id) => format!("internal error (incident {id})"),
                None => "internal error".to_string(),
            },
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_detail() {
        let err = CoreError::Internal(anyhow::anyhow!("leaked db password in here"));
        let msg = err.client_message(Some("abc123"));
        assert!(!msg.contains("leaked"));
        assert!(msg.contains("abc123"));
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(CoreError::Validation { message: "x".into() }.http_status(), 400);
        assert_eq!(CoreError::Conflict { message: "x".into() }.http_status(), 409);
        assert_eq!(
            CoreError::BusinessRule { message: "x".into() }.http_status(),
            422
        );
    }
}
