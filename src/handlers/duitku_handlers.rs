// handlers/duitku_handlers.rs
use axum::{
    extract::{Form, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::errors::{AppError, Result};
use crate::models::callback::CallbackPayload;
use crate::models::payment_status::PaymentStatus;
use crate::services::duitku_service::PaymentGateway;
use crate::services::reconcile_service::ReconcileOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub user_id: i64,
    pub course_id: i64,
    pub instance_id: i64,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub success: bool,
    pub merchant_order_id: String,
    pub reference: String,
    pub payment_url: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub merchant_order_id: String,
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<InitiatePaymentResponse>> {
    info!("Initiating Duitku payment: {:?}", request);

    let initiated = state
        .reconcile
        .initiate_purchase(request.user_id, request.course_id, request.instance_id)
        .await?;

    Ok(Json(InitiatePaymentResponse {
        success: true,
        merchant_order_id: initiated.merchant_order_id,
        reference: initiated.reference,
        payment_url: initiated.payment_url,
    }))
}

/// Duitku posts here after every transaction attempt. The reconciliation
/// engine decides whether anything actually happened.
pub async fn duitku_callback(
    State(state): State<AppState>,
    Form(payload): Form<CallbackPayload>,
) -> Result<Json<serde_json::Value>> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(format!("bad callback parameter: {}", e)))?;

    let outcome = state.reconcile.process_callback(&payload).await?;
    let status = match outcome {
        ReconcileOutcome::Enrolled { .. } => "enrolled",
        ReconcileOutcome::AlreadyProcessed => "already processed",
    };

    Ok(Json(serde_json::json!({
        "success": true,
        "status": status,
    })))
}

/// Frontend probe for an order's current state at Duitku.
pub async fn check_payment_status(
    State(state): State<AppState>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<serde_json::Value>> {
    info!("Checking payment status: {}", request.merchant_order_id);

    let status = state
        .duitku
        .check_transaction(&request.merchant_order_id)
        .await?;

    Ok(Json(serde_json::json!({
        "merchant_order_id": request.merchant_order_id,
        "status_code": status.status_code,
        "status": PaymentStatus::from_code(&status.status_code).map(|s| s.label()),
        "status_message": status.status_message,
        "amount": status.amount,
        "reference": status.reference,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
