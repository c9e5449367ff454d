// services/duitku_service.rs
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::services::signature;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    pub merchant_order_id: String,
    pub product_details: String,
    pub customer_va_name: String,
    pub email: String,
    pub callback_url: String,
    pub return_url: String,
    pub payment_amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceResponse {
    pub reference: String,
    pub payment_url: String,
    pub status_code: String,
    #[serde(default)]
    pub status_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckTransactionRequest {
    merchant_code: String,
    merchant_order_id: String,
    signature: String,
}

/// Duitku's independent view of a transaction, fetched with our own
/// credentials rather than taken from the callback.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    #[serde(default)]
    pub merchant_order_id: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    pub status_code: String,
    #[serde(default)]
    pub status_message: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, request: &CreateInvoiceRequest) -> Result<CreateInvoiceResponse>;
    async fn check_transaction(&self, merchant_order_id: &str) -> Result<TransactionStatus>;
}

#[derive(Clone)]
pub struct DuitkuService {
    merchant_code: String,
    api_key: String,
    base_url: String,
    client: Client,
}

impl DuitkuService {
    pub fn new(config: &AppConfig) -> Self {
        // Duitku's sample integrations disable TLS peer verification;
        // we keep it on.
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        DuitkuService {
            merchant_code: config.duitku_merchant_code.clone(),
            api_key: config.duitku_api_key.clone(),
            base_url: config.duitku_base_url().to_string(),
            client,
        }
    }
}

#[async_trait]
impl PaymentGateway for DuitkuService {
    async fn create_invoice(&self, request: &CreateInvoiceRequest) -> Result<CreateInvoiceResponse> {
        let url = format!("{}/createInvoice", self.base_url);
        let timestamp = Utc::now().timestamp_millis().to_string();
        let sig = signature::invoice_signature(&self.merchant_code, &timestamp, &self.api_key);

        info!(
            "createInvoice for order {} ({})",
            request.merchant_order_id, url
        );

        let response = self
            .client
            .post(&url)
            .header("x-duitku-signature", sig)
            .header("x-duitku-timestamp", &timestamp)
            .header("x-duitku-merchantcode", &self.merchant_code)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::gateway_unavailable(format!("createInvoice request failed: {}", e)))?;

        let http_code = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| AppError::gateway_unavailable(format!("createInvoice body read failed: {}", e)))?;

        if !http_code.is_success() {
            error!("createInvoice returned {}: {}", http_code, raw);
            return Err(AppError::gateway_unavailable(format!(
                "createInvoice returned {}: {}",
                http_code, raw
            )));
        }

        let parsed: CreateInvoiceResponse = serde_json::from_str(&raw).map_err(|e| {
            AppError::gateway_protocol(format!("createInvoice body did not parse: {} ({})", e, raw))
        })?;
        info!(
            "createInvoice ok for order {}: reference {}",
            request.merchant_order_id, parsed.reference
        );
        Ok(parsed)
    }

    async fn check_transaction(&self, merchant_order_id: &str) -> Result<TransactionStatus> {
        let url = format!("{}/transactionStatus", self.base_url);
        let body = CheckTransactionRequest {
            merchant_code: self.merchant_code.clone(),
            merchant_order_id: merchant_order_id.to_string(),
            signature: signature::status_signature(
                &self.merchant_code,
                merchant_order_id,
                &self.api_key,
            ),
        };

        info!("transactionStatus for order {} ({})", merchant_order_id, url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                AppError::gateway_unavailable(format!("transactionStatus request failed: {}", e))
            })?;

        let http_code = response.status();
        let raw = response.text().await.map_err(|e| {
            AppError::gateway_unavailable(format!("transactionStatus body read failed: {}", e))
        })?;

        if !http_code.is_success() {
            error!("transactionStatus returned {}: {}", http_code, raw);
            return Err(AppError::gateway_unavailable(format!(
                "transactionStatus returned {}: {}",
                http_code, raw
            )));
        }

        let parsed: TransactionStatus = serde_json::from_str(&raw).map_err(|e| {
            AppError::gateway_protocol(format!(
                "transactionStatus body did not parse: {} ({})",
                e, raw
            ))
        })?;
        info!(
            "transactionStatus for order {}: statusCode {}",
            merchant_order_id, parsed.status_code
        );
        Ok(parsed)
    }
}
