// models/course.rs
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub course_id: i64,
    pub full_name: String,
    pub short_name: String,

    /// Primary teacher for enrolment notifications, if one is assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<i64>,
}
