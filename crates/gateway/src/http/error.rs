use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use aegis_common::GatewayError;

/// HTTP-facing error wrapper. Bodies follow the `{error:{code,message}}`
/// shape.
pub struct ApiError(pub GatewayError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

fn classify(error: &GatewayError) -> (StatusCode, &'static str) {
    match error {
        GatewayError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        GatewayError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
        GatewayError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
        GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        GatewayError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        GatewayError::ServerBusy => (StatusCode::SERVICE_UNAVAILABLE, "server_busy"),
        GatewayError::Deadline(_) => (StatusCode::REQUEST_TIMEOUT, "deadline_exceeded"),
        GatewayError::UpstreamFailed(_) => (StatusCode::BAD_GATEWAY, "upstream_failed"),
        GatewayError::NoHealthyProvider(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "no_healthy_provider")
        }
        GatewayError::EmbeddingUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "embedding_unavailable")
        }
        GatewayError::Evaluation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "evaluation_error"),
        GatewayError::AuditFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "audit_failure"),
        GatewayError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
        GatewayError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
        GatewayError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error"),
        GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = classify(&self.0);
        let body = json!({
            "error": {
                "code": code,
                "message": self.0.to_string(),
            }
        });

        let mut response = (status, Json(body)).into_response();

        if let GatewayError::RateLimited { retry_after } = &self.0 {
            let seconds = retry_after.unwrap_or(60);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}
