// models/enrolment.rs
use chrono::{DateTime, Utc};
use mongodb::bson;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// A user's membership in a course via a specific enrolment instance.
/// Unique on (instance_id, user_id); time_start/time_end of 0 mean
/// unlimited access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrolment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub instance_id: i64,
    pub user_id: i64,
    pub role_id: i64,
    pub time_start: i64,
    pub time_end: i64,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}
