// services/enrolment_service.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{self, doc};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};

use crate::errors::Result;
use crate::models::course::Course;
use crate::models::enrol_instance::EnrolInstance;
use crate::models::enrolment::Enrolment;
use crate::models::enrolment_order::{EnrolmentOrder, OrderKey};
use crate::models::payment_status::CHECK_STATUS_SUCCESS;
use crate::models::user::User;

const ENROL_METHOD: &str = "duitku";

/// Result of the check-and-set on an order's payment status.
#[derive(Debug, Clone)]
pub enum OrderClaim {
    /// This caller won the transition; enrolment must follow.
    Claimed(EnrolmentOrder),
    /// A previous callback already settled the order.
    AlreadyCompleted,
    /// No order was ever recorded for this key.
    Missing,
}

/// Everything the reconciliation engine needs from persistence: lookups,
/// the enrolment side effect, and the order-record transitions.
#[async_trait]
pub trait EnrolmentStore: Send + Sync {
    async fn find_user(&self, user_id: i64) -> Result<Option<User>>;
    async fn find_course(&self, course_id: i64) -> Result<Option<Course>>;
    async fn find_active_instance(&self, instance_id: i64) -> Result<Option<EnrolInstance>>;
    async fn find_teacher(&self, course: &Course) -> Result<Option<User>>;
    async fn list_admins(&self) -> Result<Vec<User>>;

    async fn record_invoice(&self, order: EnrolmentOrder) -> Result<()>;

    /// Atomically flips the order to success unless it already is. Exactly
    /// one concurrent caller observes `Claimed`; the rest observe
    /// `AlreadyCompleted`.
    async fn claim_order_success(
        &self,
        key: &OrderKey,
        reason: &str,
        time_updated: i64,
    ) -> Result<OrderClaim>;

    /// Puts a claimed order back to pending so a later callback can retry.
    async fn reopen_order(&self, key: &OrderKey, reason: &str, time_updated: i64) -> Result<()>;

    async fn enrol_user(
        &self,
        instance: &EnrolInstance,
        user_id: i64,
        time_start: i64,
        time_end: i64,
    ) -> Result<()>;
}

/// Enrolment window from an instance's configured duration: 0 means
/// unlimited access, anything else runs from now for that many seconds.
pub fn enrolment_window(enrol_period: i64, now: DateTime<Utc>) -> (i64, i64) {
    if enrol_period > 0 {
        let time_start = now.timestamp();
        (time_start, time_start + enrol_period)
    } else {
        (0, 0)
    }
}

#[derive(Clone)]
pub struct MongoEnrolmentStore {
    db: Database,
}

impl MongoEnrolmentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    fn courses(&self) -> Collection<Course> {
        self.db.collection("courses")
    }

    fn instances(&self) -> Collection<EnrolInstance> {
        self.db.collection("enrol_instances")
    }

    fn orders(&self) -> Collection<EnrolmentOrder> {
        self.db.collection("enrolment_orders")
    }

    fn enrolments(&self) -> Collection<Enrolment> {
        self.db.collection("enrolments")
    }

    /// Unique indexes backing the exactly-once guarantees.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let order_index = IndexModel::builder()
            .keys(doc! {
                "user_id": 1,
                "course_id": 1,
                "instance_id": 1,
                "reference": 1,
            })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.orders().create_index(order_index).await?;

        let enrolment_index = IndexModel::builder()
            .keys(doc! { "instance_id": 1, "user_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.enrolments().create_index(enrolment_index).await?;

        Ok(())
    }
}

fn order_key_filter(key: &OrderKey) -> bson::Document {
    doc! {
        "user_id": key.user_id,
        "course_id": key.course_id,
        "instance_id": key.instance_id,
        "reference": &key.reference,
    }
}

#[async_trait]
impl EnrolmentStore for MongoEnrolmentStore {
    async fn find_user(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.users().find_one(doc! { "user_id": user_id }).await?)
    }

    async fn find_course(&self, course_id: i64) -> Result<Option<Course>> {
        Ok(self
            .courses()
            .find_one(doc! { "course_id": course_id })
            .await?)
    }

    async fn find_active_instance(&self, instance_id: i64) -> Result<Option<EnrolInstance>> {
        Ok(self
            .instances()
            .find_one(doc! {
                "instance_id": instance_id,
                "method": ENROL_METHOD,
                "status": 0,
            })
            .await?)
    }

    async fn find_teacher(&self, course: &Course) -> Result<Option<User>> {
        match course.teacher_id {
            Some(teacher_id) => self.find_user(teacher_id).await,
            None => Ok(None),
        }
    }

    async fn list_admins(&self) -> Result<Vec<User>> {
        let cursor = self
            .users()
            .find(doc! { "is_admin": true })
            .sort(doc! { "user_id": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn record_invoice(&self, order: EnrolmentOrder) -> Result<()> {
        self.orders().insert_one(order).await?;
        Ok(())
    }

    async fn claim_order_success(
        &self,
        key: &OrderKey,
        reason: &str,
        time_updated: i64,
    ) -> Result<OrderClaim> {
        let mut filter = order_key_filter(key);
        filter.insert("payment_status", doc! { "$ne": CHECK_STATUS_SUCCESS });
        let update = doc! {
            "$set": {
                "payment_status": CHECK_STATUS_SUCCESS,
                "pending_reason": reason,
                "time_updated": time_updated,
            }
        };

        let claimed = self
            .orders()
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?;
        if let Some(order) = claimed {
            return Ok(OrderClaim::Claimed(order));
        }

        // Either a previous callback already settled it, or no order was
        // ever recorded for this key.
        match self.orders().find_one(order_key_filter(key)).await? {
            Some(_) => Ok(OrderClaim::AlreadyCompleted),
            None => Ok(OrderClaim::Missing),
        }
    }

    async fn reopen_order(&self, key: &OrderKey, reason: &str, time_updated: i64) -> Result<()> {
        use crate::models::payment_status::CHECK_STATUS_PENDING;

        let update = doc! {
            "$set": {
                "payment_status": CHECK_STATUS_PENDING,
                "pending_reason": reason,
                "time_updated": time_updated,
            }
        };
        self.orders()
            .update_one(order_key_filter(key), update)
            .await?;
        Ok(())
    }

    async fn enrol_user(
        &self,
        instance: &EnrolInstance,
        user_id: i64,
        time_start: i64,
        time_end: i64,
    ) -> Result<()> {
        let filter = doc! {
            "instance_id": instance.instance_id,
            "user_id": user_id,
        };
        let update = doc! {
            "$set": {
                "role_id": instance.role_id,
                "time_start": time_start,
                "time_end": time_end,
            },
            "$setOnInsert": {
                "created_at": bson::DateTime::now(),
            },
        };
        self.enrolments()
            .update_one(filter, update)
            .upsert(true)
            .await?;
        Ok(())
    }
}
