//! HTTP error responses

use crate::utils::TubeloadError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Gone(String),
    TooManyRequests { message: String, retry_after_secs: u64 },
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Gone(msg)
            | ApiError::Internal(msg) => msg,
            ApiError::TooManyRequests { message, .. } => message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "detail": self.detail(),
            "timestamp": Utc::now().to_rfc3339(),
        }));
        let mut response = (status, body).into_response();

        match &self {
            ApiError::TooManyRequests { retry_after_secs, .. } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            ApiError::Unauthorized(_) => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        response
    }
}

impl From<TubeloadError> for ApiError {
    fn from(err: TubeloadError) -> Self {
        match err {
            TubeloadError::InvalidUrl(_) | TubeloadError::Validation(_) => {
                ApiError::BadRequest(err.to_string())
            }
            TubeloadError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            TubeloadError::Forbidden(msg) | TubeloadError::AccessDenied(msg) => ApiError::Forbidden(msg),
            TubeloadError::NotFound(msg) => ApiError::NotFound(msg),
            TubeloadError::Conflict(msg) => ApiError::Conflict(msg),
            TubeloadError::Expired(msg) => ApiError::Gone(msg),
            TubeloadError::RateLimited { retry_after_secs } => ApiError::TooManyRequests {
                message: err.to_string(),
                retry_after_secs,
            },
            TubeloadError::Internal(inner) => inner.into(),
            other => {
                error!("Request failed: {}", other);
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<TubeloadError>() {
            Ok(known) => known.into(),
            Err(err) => {
                error!("Request failed: {:#}", err);
                ApiError::Internal(format!("Internal server error: {}", err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (TubeloadError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (TubeloadError::InvalidUrl("x".into()), StatusCode::BAD_REQUEST),
            (TubeloadError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (TubeloadError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (TubeloadError::AccessDenied("x".into()), StatusCode::FORBIDDEN),
            (TubeloadError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (TubeloadError::Conflict("x".into()), StatusCode::CONFLICT),
            (TubeloadError::Expired("x".into()), StatusCode::GONE),
            (TubeloadError::RateLimited { retry_after_secs: 3 }, StatusCode::TOO_MANY_REQUESTS),
            (TubeloadError::DownloadError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_anyhow_downcasts_to_known_error() {
        let err = anyhow::Error::new(TubeloadError::not_found("Download not found"));
        assert_eq!(ApiError::from(err).status(), StatusCode::NOT_FOUND);

        let err = anyhow::anyhow!("disk on fire");
        assert_eq!(ApiError::from(err).status(), StatusCode::INTERNAL_SERVER_ERROR);

        let wrapped = TubeloadError::Internal(anyhow::Error::new(TubeloadError::Expired("gone".into())));
        assert_eq!(ApiError::from(wrapped).status(), StatusCode::GONE);
    }

    #[test]
    fn test_retry_after_header() {
        let response = ApiError::from(TubeloadError::RateLimited { retry_after_secs: 7 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }
}
