// models/callback.rs
use serde::Deserialize;
use validator::Validate;

/// Form parameters Duitku posts to the callback endpoint. Untrusted input;
/// lives for a single request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CallbackPayload {
    #[serde(rename = "merchantCode")]
    #[validate(length(min = 1))]
    pub merchant_code: String,

    #[serde(rename = "amount")]
    #[validate(length(min = 1))]
    pub amount: String,

    #[serde(rename = "merchantOrderId")]
    #[validate(length(min = 1))]
    pub merchant_order_id: String,

    #[serde(rename = "productDetail")]
    pub product_detail: String,

    #[serde(rename = "additionalParam")]
    pub additional_param: String,

    #[serde(rename = "paymentCode")]
    pub payment_code: String,

    #[serde(rename = "resultCode")]
    #[validate(length(min = 1))]
    pub result_code: String,

    #[serde(rename = "merchantUserId")]
    pub merchant_user_id: String,

    #[serde(rename = "reference")]
    #[validate(length(min = 1))]
    pub reference: String,

    #[serde(rename = "signature")]
    #[validate(length(min = 1))]
    pub signature: String,
}
