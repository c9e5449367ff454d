// models/enrolment_order.rs
use chrono::{DateTime, Utc};
use mongodb::bson;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// One row per enrolment order, created at purchase initiation and settled
/// at most once by a callback. Unique on
/// (user_id, course_id, instance_id, reference).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolmentOrder {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: i64,
    pub course_id: i64,
    pub instance_id: i64,

    /// Duitku's transaction reference, returned by createInvoice.
    pub reference: String,
    pub merchant_order_id: String,
    pub amount: i64,

    /// Duitku status code ("00" success, "01" pending, "02" canceled).
    pub payment_status: String,
    pub pending_reason: String,

    /// Millisecond timestamp of the last status change.
    pub time_updated: i64,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Natural key of an enrolment order; the dedupe key for callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub user_id: i64,
    pub course_id: i64,
    pub instance_id: i64,
    pub reference: String,
}
