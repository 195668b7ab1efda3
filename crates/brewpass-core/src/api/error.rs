use thiserror::Error;

use crate::models::ErrorBody;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - credential may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Prefer the `{error}` message of a JSON error body over the raw text.
    fn error_message(body: &str) -> String {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => Self::truncate_body(&parsed.error),
            Err(_) => Self::truncate_body(body),
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::error_message(body);
        match status.as_u16() {
            400 | 409 | 422 => ApiError::Rejected(message),
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    /// True when the request never produced a usable HTTP exchange
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ApiError::NetworkError(_) | ApiError::RateLimited | ApiError::ServerError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_extracts_error_field() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, r#"{"error":"Email already taken"}"#);
        match err {
            ApiError::Rejected(msg) => assert_eq!(msg, "Email already taken"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_from_status_maps_codes() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream down"),
            ApiError::ServerError(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::IM_A_TEAPOT, ""),
            ApiError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("truncated, 520 total bytes"));
    }
}
