use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::duitku_handlers;
use crate::state::AppState;

pub fn duitku_routes() -> Router<AppState> {
    Router::new()
        // Health
        .route("/health", get(duitku_health))
        // Purchase initiation
        .route("/initiate", post(duitku_handlers::initiate_payment))
        // Asynchronous payment notification from Duitku
        .route("/callback", post(duitku_handlers::duitku_callback))
        // Payment status check endpoint (POST for frontend)
        .route(
            "/check-payment-status",
            post(duitku_handlers::check_payment_status),
        )
}

async fn duitku_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "duitku",
        "timestamp": Utc::now().to_rfc3339(),
        "features": ["create-invoice", "callback-reconciliation", "payment-status-check"]
    }))
}
