// services/signature.rs
//
// Duitku uses two distinct signing schemes: MD5 for callback verification
// and transactionStatus requests, SHA-256 for createInvoice headers. They
// are not interchangeable; both concatenation orders are fixed by the
// provider.
use sha2::{Digest, Sha256};

/// MD5 over `merchantCode ++ amount ++ merchantOrderId ++ apiKey`, lowercase hex.
pub fn callback_signature(
    merchant_code: &str,
    amount: &str,
    merchant_order_id: &str,
    api_key: &str,
) -> String {
    let digest = md5::compute(format!(
        "{}{}{}{}",
        merchant_code, amount, merchant_order_id, api_key
    ));
    format!("{:x}", digest)
}

/// Byte-for-byte comparison against the signature Duitku sent.
pub fn verify_callback_signature(
    merchant_code: &str,
    amount: &str,
    merchant_order_id: &str,
    api_key: &str,
    provided: &str,
) -> bool {
    callback_signature(merchant_code, amount, merchant_order_id, api_key) == provided
}

/// SHA-256 over `merchantCode ++ timestampMillis ++ apiKey`, lowercase hex.
/// Goes into the `x-duitku-signature` header of createInvoice requests.
pub fn invoice_signature(merchant_code: &str, timestamp_millis: &str, api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(merchant_code.as_bytes());
    hasher.update(timestamp_millis.as_bytes());
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// MD5 over `merchantCode ++ merchantOrderId ++ apiKey`, lowercase hex.
/// Goes into the body of transactionStatus requests.
pub fn status_signature(merchant_code: &str, merchant_order_id: &str, api_key: &str) -> String {
    let digest = md5::compute(format!(
        "{}{}{}",
        merchant_code, merchant_order_id, api_key
    ));
    format!("{:x}", digest)
}
