use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use shared::ai_provider::ProviderError;
use shared::error::AppError;
use tracing::error;

/// Error returned by every handler, rendered as
/// `{"error": {"message": "...", "status": 400}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(json!({
            "error": {
                "message": self.to_string(),
                "status": status.as_u16(),
            }
        }))
    }
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::NotFound(_) => ApiError::NotFound(e.to_string()),
            AppError::Invalid(_) | AppError::EmptyContent(_) => ApiError::BadRequest(e.to_string()),
            AppError::Database(_) | AppError::Io(_) => {
                error!(%e, "request failed");
                ApiError::Internal("internal server error".into())
            }
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::InvalidRequest(_) => ApiError::BadRequest(e.to_string()),
            ProviderError::NoProvider => ApiError::Unavailable(e.to_string()),
            _ => ApiError::Upstream(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn renders_error_envelope() {
        let resp = ApiError::NotFound("template x not found".into()).error_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["message"], "template x not found");
        assert_eq!(value["error"]["status"], 404);
    }

    #[test]
    fn database_details_are_not_leaked() {
        let api: ApiError = AppError::Database("password authentication failed".into()).into();
        assert_eq!(api.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.to_string(), "internal server error");
    }

    #[test]
    fn provider_errors_map_to_gateway_codes() {
        let api: ApiError = ProviderError::Http {
            status: 500,
            body: "boom".into(),
        }
        .into();
        assert_eq!(api.status_code(), StatusCode::BAD_GATEWAY);
        let api: ApiError = ProviderError::NoProvider.into();
        assert_eq!(api.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
