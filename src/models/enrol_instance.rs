// models/enrol_instance.rs
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// A configured way of gaining access to a course. Only instances with
/// `method == "duitku"` and `status == 0` (active) take part in payment
/// reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolInstance {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub instance_id: i64,
    pub course_id: i64,
    pub method: String,

    /// 0 = active.
    pub status: i64,
    pub role_id: i64,

    /// Enrolment duration in seconds; 0 means unlimited access.
    pub enrol_period: i64,

    /// Price in the smallest currency unit Duitku accepts (whole rupiah).
    pub cost: i64,
}
