// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid callback signature")]
    InvalidSignature,

    #[error("Payment unconfirmed by gateway: statusCode {0}")]
    UnconfirmedPayment(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment gateway protocol error: {0}")]
    GatewayProtocol(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("External API error: {0}")]
    ExternalApi(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string()),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "Invalid request".to_string()),
            AppError::InvalidSignature => (StatusCode::BAD_REQUEST, "Invalid signature".to_string()),
            AppError::UnconfirmedPayment(_) => (StatusCode::CONFLICT, "Payment unconfirmed".to_string()),
            AppError::GatewayUnavailable(_) => (StatusCode::BAD_GATEWAY, "Payment gateway unavailable".to_string()),
            AppError::GatewayProtocol(_) => (StatusCode::BAD_GATEWAY, "Payment gateway protocol error".to_string()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation failed".to_string()),
            AppError::ExternalApi(_) => (StatusCode::BAD_GATEWAY, "External API error".to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

// Helper conversion functions
impl AppError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        AppError::InvalidRequest(msg.into())
    }

    pub fn gateway_unavailable(msg: impl Into<String>) -> Self {
        AppError::GatewayUnavailable(msg.into())
    }

    pub fn gateway_protocol(msg: impl Into<String>) -> Self {
        AppError::GatewayProtocol(msg.into())
    }

    pub fn external_api(msg: impl Into<String>) -> Self {
        AppError::ExternalApi(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
