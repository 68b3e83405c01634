/// Error types for the ingest service.
///
/// Expected admission outcomes (over limit, duplicate) are not errors and
/// are returned as values by the services; this module covers the
/// caller-visible failures of the HTTP surface.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;

/// Result type for ingest-service operations
pub type Result<T> = std::result::Result<T, AppError>;

// `Display`/`Error` are implemented by hand: thiserror treats a field named
// `source` as the error source, which `String` cannot be.
#[derive(Debug)]
pub enum AppError {
    /// Rate limit exceeded for a source
    RateLimited { source: String, retry_after_secs: u64 },

    /// Malformed inbound event
    BadRequest(String),

    /// Missing or wrong shared secret / admin token
    Unauthorized,

    /// Internal server error
    Internal(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::RateLimited { source, .. } => {
                write!(f, "Rate limit exceeded for source '{source}'")
            }
            AppError::BadRequest(msg) => write!(f, "Bad request: {msg}"),
            AppError::Unauthorized => write!(f, "Unauthorized"),
            AppError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    fn error_code(&self) -> &'static str {
        match self {
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let retry_after_secs = match self {
            AppError::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };

        let mut builder = HttpResponse::build(status);
        if let Some(secs) = retry_after_secs {
            builder.insert_header(("Retry-After", secs.to_string()));
        }
        builder.json(ErrorBody {
            error: self.to_string(),
            code: self.error_code(),
            status: status.as_u16(),
            retry_after_secs,
        })
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let limited = AppError::RateLimited {
            source: "primary".to_string(),
            retry_after_secs: 30,
        };
        assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            AppError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let limited = AppError::RateLimited {
            source: "primary".to_string(),
            retry_after_secs: 42,
        };
        let resp = limited.error_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            resp.headers().get("Retry-After").unwrap().to_str().unwrap(),
            "42"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::Unauthorized.error_code(), "UNAUTHORIZED");
        assert_eq!(AppError::BadRequest("x".into()).error_code(), "BAD_REQUEST");
    }
}
