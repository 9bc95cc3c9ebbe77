//! Registration-time and serving-time error types.
//!
//! Registration errors are fatal and abort `build`. Dispatch errors are
//! caught at the dispatch boundary and turned into a response.

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tower::BoxError;

use crate::http::response::InvalidResponseError;
use crate::routing::pattern::PatternError;

/// Raised while building an application. Never seen while serving.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("route `{template}` is already registered for {method}")]
    DuplicateRoute { template: String, method: String },

    #[error("endpoint name `{endpoint}` is already in use")]
    DuplicateEndpoint { endpoint: String },

    #[error("a different blueprint is already registered as `{name}`")]
    BlueprintIdentityConflict { name: String },

    #[error("middleware `{name}` is not registered")]
    UnknownMiddleware { name: String },

    #[error("middleware `{name}` is {actual}, expected {expected}")]
    MiddlewareKindMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("blueprint `{blueprint}` mixes sync and async middleware")]
    MixedMiddlewareKinds { blueprint: String },
}

/// A request that could not be answered normally.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no route matches {method} {path}")]
    RouteNotFound { method: Method, path: String },

    #[error("{method} is not allowed for {path}")]
    MethodNotAllowed {
        method: Method,
        path: String,
        allowed: Vec<Method>,
    },

    #[error(transparent)]
    InvalidResponse(#[from] InvalidResponseError),

    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    #[error("middleware `{middleware}` failed: {source}")]
    Middleware {
        middleware: String,
        #[source]
        source: BoxError,
    },

    #[error("worker pool unavailable: {0}")]
    WorkerPool(String),

    #[error("failed to read request body: {0}")]
    BodyRead(String),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::RouteNotFound { .. } | DispatchError::MethodNotAllowed { .. } => StatusCode::NOT_FOUND,
            DispatchError::BodyRead(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error response; `debug` adds the error text to the body.
    pub fn to_response(&self, debug: bool) -> Response {
        let status = self.status();
        let reason = status.canonical_reason().unwrap_or("Error");
        let body = if debug {
            format!("{}\n\n{}", reason, self)
        } else {
            reason.to_string()
        };
        (status, body).into_response()
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        self.to_response(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let miss = DispatchError::MethodNotAllowed {
            method: Method::DELETE,
            path: "/x".into(),
            allowed: vec![Method::GET],
        };
        assert_eq!(miss.status(), StatusCode::NOT_FOUND);
        assert_eq!(DispatchError::BodyRead("eof".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            DispatchError::Handler("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_text_only_in_debug() {
        let err = DispatchError::Handler("secret detail".into());
        assert_eq!(err.to_response(false).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("secret detail"));
    }
}
