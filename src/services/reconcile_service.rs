// services/reconcile_service.rs
//
// Orders move Received -> SignatureVerified -> StatusConfirmed -> Enrolled
// -> Notified, with a rejection exit at every gate. The gates always run in
// that order: the independent gateway re-check never happens before the
// signature passes, and nothing is persisted before both agree.
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::models::callback::CallbackPayload;
use crate::models::course::Course;
use crate::models::enrolment_order::{EnrolmentOrder, OrderKey};
use crate::models::order_ref::OrderRef;
use crate::models::payment_status::{CHECK_STATUS_PENDING, CHECK_STATUS_SUCCESS};
use crate::models::user::User;
use crate::services::duitku_service::{CreateInvoiceRequest, PaymentGateway};
use crate::services::enrolment_service::{enrolment_window, EnrolmentStore, OrderClaim};
use crate::services::mail_service::{
    EnrolmentMailData, Notifier, ADMIN_TEMPLATE, STUDENT_TEMPLATE, TEACHER_TEMPLATE,
};
use crate::services::signature;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Enrolled {
        user_id: i64,
        course_id: i64,
        instance_id: i64,
    },
    /// A duplicate callback for an already-settled order; nothing was done.
    AlreadyProcessed,
}

#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub merchant_order_id: String,
    pub reference: String,
    pub payment_url: String,
}

pub struct ReconcileService {
    config: AppConfig,
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn EnrolmentStore>,
    mailer: Arc<dyn Notifier>,
}

impl ReconcileService {
    pub fn new(
        config: AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn EnrolmentStore>,
        mailer: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            gateway,
            store,
            mailer,
        }
    }

    /// Starts a purchase: creates the Duitku invoice and records the order
    /// as pending so the callback has something to settle against.
    pub async fn initiate_purchase(
        &self,
        user_id: i64,
        course_id: i64,
        instance_id: i64,
    ) -> Result<InitiatedPayment> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(AppError::NotFound("user"))?;
        let course = self
            .store
            .find_course(course_id)
            .await?
            .ok_or(AppError::NotFound("course"))?;
        let instance = self
            .store
            .find_active_instance(instance_id)
            .await?
            .ok_or(AppError::NotFound("enrolment instance"))?;
        if instance.cost <= 0 {
            return Err(AppError::invalid_request(
                "enrolment instance has no cost configured",
            ));
        }

        let order_ref = OrderRef::new(
            Utc::now().timestamp_millis().to_string(),
            user.user_id,
            course.course_id,
            instance.instance_id,
        );
        let merchant_order_id = order_ref.encode();

        let request = CreateInvoiceRequest {
            merchant_order_id: merchant_order_id.clone(),
            product_details: course.full_name.clone(),
            customer_va_name: user.username.clone(),
            email: user.email.clone(),
            callback_url: self.config.duitku_callback_url.clone(),
            return_url: self.config.duitku_return_url.clone(),
            payment_amount: instance.cost,
        };
        let invoice = self.gateway.create_invoice(&request).await?;

        let now = Utc::now();
        self.store
            .record_invoice(EnrolmentOrder {
                id: None,
                user_id: user.user_id,
                course_id: course.course_id,
                instance_id: instance.instance_id,
                reference: invoice.reference.clone(),
                merchant_order_id: merchant_order_id.clone(),
                amount: instance.cost,
                payment_status: CHECK_STATUS_PENDING.to_string(),
                pending_reason: "awaiting payment".to_string(),
                time_updated: now.timestamp_millis(),
                created_at: now,
            })
            .await?;

        info!(
            "payment initiated: order {} reference {}",
            merchant_order_id, invoice.reference
        );
        Ok(InitiatedPayment {
            merchant_order_id,
            reference: invoice.reference,
            payment_url: invoice.payment_url,
        })
    }

    /// Settles a Duitku callback. Enrolment happens if and only if the
    /// inbound signature is valid AND the independent status re-check
    /// against Duitku reports success; neither alone suffices.
    pub async fn process_callback(&self, callback: &CallbackPayload) -> Result<ReconcileOutcome> {
        info!(
            "Duitku callback received for order {}",
            callback.merchant_order_id
        );

        // Gate 1: authenticity. Nothing leaves this process before these pass.
        if callback.merchant_code != self.config.duitku_merchant_code {
            warn!(
                "callback merchantCode {} does not match ours",
                callback.merchant_code
            );
            return Err(AppError::InvalidSignature);
        }
        let order_ref = OrderRef::decode(&callback.merchant_order_id)?;
        if !signature::verify_callback_signature(
            &callback.merchant_code,
            &callback.amount,
            &callback.merchant_order_id,
            &self.config.duitku_api_key,
            &callback.signature,
        ) {
            warn!(
                "bad signature on callback for order {}",
                callback.merchant_order_id
            );
            return Err(AppError::InvalidSignature);
        }
        if callback.result_code != CHECK_STATUS_SUCCESS {
            return Err(AppError::invalid_request(format!(
                "payment not successful, resultCode {}",
                callback.result_code
            )));
        }

        // Gate 2: the callback alone is never trusted, even with a valid
        // signature. Re-query Duitku with our own stored credentials.
        let status = self
            .gateway
            .check_transaction(&callback.merchant_order_id)
            .await?;
        if status.status_code != CHECK_STATUS_SUCCESS {
            warn!(
                "gateway reports statusCode {} for order {}",
                status.status_code, callback.merchant_order_id
            );
            return Err(AppError::UnconfirmedPayment(status.status_code));
        }

        // Gate 3: resolve the parties, then claim the order record before
        // touching enrolments. The claim is the dedupe point for provider
        // retries.
        let user = self
            .store
            .find_user(order_ref.user_id)
            .await?
            .ok_or(AppError::NotFound("user"))?;
        let course = self
            .store
            .find_course(order_ref.course_id)
            .await?
            .ok_or(AppError::NotFound("course"))?;
        let instance = self
            .store
            .find_active_instance(order_ref.instance_id)
            .await?
            .ok_or(AppError::NotFound("enrolment instance"))?;

        let key = OrderKey {
            user_id: order_ref.user_id,
            course_id: order_ref.course_id,
            instance_id: order_ref.instance_id,
            reference: callback.reference.clone(),
        };
        let now = Utc::now();
        match self
            .store
            .claim_order_success(&key, "payment callback processed", now.timestamp_millis())
            .await?
        {
            OrderClaim::AlreadyCompleted => {
                info!(
                    "order {} already settled, skipping enrolment",
                    callback.merchant_order_id
                );
                return Ok(ReconcileOutcome::AlreadyProcessed);
            }
            OrderClaim::Missing => return Err(AppError::NotFound("enrolment order")),
            OrderClaim::Claimed(_) => {}
        }

        let (time_start, time_end) = enrolment_window(instance.enrol_period, now);
        if let Err(e) = self
            .store
            .enrol_user(&instance, user.user_id, time_start, time_end)
            .await
        {
            // Give a later retry another chance at the claim.
            if let Err(reopen_err) = self
                .store
                .reopen_order(&key, "enrolment failed", Utc::now().timestamp_millis())
                .await
            {
                warn!(
                    "could not reopen order {}: {}",
                    callback.merchant_order_id, reopen_err
                );
            }
            return Err(e);
        }
        info!(
            "user {} enrolled in course {} via instance {}",
            user.user_id, course.course_id, instance.instance_id
        );

        // Gate 4: best effort only. A lost email never unwinds an enrolment.
        self.send_notifications(&user, &course, &callback.amount)
            .await;

        Ok(ReconcileOutcome::Enrolled {
            user_id: user.user_id,
            course_id: course.course_id,
            instance_id: instance.instance_id,
        })
    }

    async fn send_notifications(&self, student: &User, course: &Course, amount: &str) {
        if !(self.config.mail_students || self.config.mail_teachers || self.config.mail_admins) {
            return;
        }

        let teacher = match self.store.find_teacher(course).await {
            Ok(teacher) => teacher,
            Err(e) => {
                warn!(
                    "teacher lookup failed for course {}: {}",
                    course.course_id, e
                );
                None
            }
        };
        let teacher_name = teacher
            .as_ref()
            .map(|t| t.username.clone())
            .unwrap_or_else(|| self.config.support_name.clone());

        let mut data = EnrolmentMailData {
            course_full_name: course.full_name.clone(),
            course_short_name: course.short_name.clone(),
            amount: amount.to_string(),
            student_username: student.username.clone(),
            teacher_name,
            admin_username: String::new(),
        };

        if self.config.mail_students {
            if let Err(e) = self.mailer.send(&student.email, STUDENT_TEMPLATE, &data).await {
                warn!("student enrolment mail failed: {}", e);
            }
        }

        if self.config.mail_teachers {
            // No qualifying teacher: the designated support identity steps in.
            let recipient = teacher
                .as_ref()
                .map(|t| t.email.as_str())
                .unwrap_or(self.config.support_email.as_str());
            if let Err(e) = self.mailer.send(recipient, TEACHER_TEMPLATE, &data).await {
                warn!("teacher enrolment mail failed: {}", e);
            }
        }

        if self.config.mail_admins {
            match self.store.list_admins().await {
                Ok(admins) => {
                    for admin in admins {
                        data.admin_username = admin.username.clone();
                        if let Err(e) = self.mailer.send(&admin.email, ADMIN_TEMPLATE, &data).await
                        {
                            warn!("admin enrolment mail failed for {}: {}", admin.username, e);
                        }
                    }
                }
                Err(e) => warn!("admin lookup failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::models::enrol_instance::EnrolInstance;
    use crate::models::payment_status::CHECK_STATUS_CANCELED;
    use crate::services::duitku_service::{CreateInvoiceResponse, TransactionStatus};

    const API_KEY: &str = "test-api-key";
    const MERCHANT_CODE: &str = "D0001";
    const REFERENCE: &str = "D000117229TX";

    fn test_config() -> AppConfig {
        AppConfig {
            duitku_merchant_code: MERCHANT_CODE.to_string(),
            duitku_api_key: API_KEY.to_string(),
            duitku_environment: "sandbox".to_string(),
            duitku_callback_url: "https://lms.example.com/api/duitku/callback".to_string(),
            duitku_return_url: "https://lms.example.com/courses".to_string(),
            mail_students: false,
            mail_teachers: false,
            mail_admins: false,
            mail_api_url: "https://mail.example.com/send".to_string(),
            mail_api_key: "mail-key".to_string(),
            mail_from: "noreply@lms.example.com".to_string(),
            support_name: "Support".to_string(),
            support_email: "support@lms.example.com".to_string(),
            database_url: "mongodb://localhost:27017".to_string(),
            port: 3000,
            host: "127.0.0.1".to_string(),
        }
    }

    fn test_user(user_id: i64) -> User {
        User {
            id: None,
            user_id,
            username: format!("user{}", user_id),
            email: format!("user{}@example.com", user_id),
            is_admin: false,
            created_at: Utc::now(),
        }
    }

    fn test_course(course_id: i64) -> Course {
        Course {
            id: None,
            course_id,
            full_name: "Intro to Rust".to_string(),
            short_name: "RUST101".to_string(),
            teacher_id: None,
        }
    }

    fn test_instance(instance_id: i64, course_id: i64, enrol_period: i64) -> EnrolInstance {
        EnrolInstance {
            id: None,
            instance_id,
            course_id,
            method: "duitku".to_string(),
            status: 0,
            role_id: 5,
            enrol_period,
            cost: 150_000,
        }
    }

    fn pending_order(key: &OrderKey, merchant_order_id: &str) -> EnrolmentOrder {
        EnrolmentOrder {
            id: None,
            user_id: key.user_id,
            course_id: key.course_id,
            instance_id: key.instance_id,
            reference: key.reference.clone(),
            merchant_order_id: merchant_order_id.to_string(),
            amount: 150_000,
            payment_status: CHECK_STATUS_PENDING.to_string(),
            pending_reason: "awaiting payment".to_string(),
            time_updated: 0,
            created_at: Utc::now(),
        }
    }

    fn signed_callback(merchant_order_id: &str, amount: &str, result_code: &str) -> CallbackPayload {
        CallbackPayload {
            merchant_code: MERCHANT_CODE.to_string(),
            amount: amount.to_string(),
            merchant_order_id: merchant_order_id.to_string(),
            product_detail: "Intro to Rust".to_string(),
            additional_param: String::new(),
            payment_code: "VC".to_string(),
            result_code: result_code.to_string(),
            merchant_user_id: "user7".to_string(),
            reference: REFERENCE.to_string(),
            signature: signature::callback_signature(
                MERCHANT_CODE,
                amount,
                merchant_order_id,
                API_KEY,
            ),
        }
    }

    struct FakeGateway {
        status_code: String,
        check_calls: AtomicUsize,
    }

    impl FakeGateway {
        fn reporting(status_code: &str) -> Arc<Self> {
            Arc::new(Self {
                status_code: status_code.to_string(),
                check_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_invoice(
            &self,
            request: &CreateInvoiceRequest,
        ) -> Result<CreateInvoiceResponse> {
            Ok(CreateInvoiceResponse {
                reference: REFERENCE.to_string(),
                payment_url: format!(
                    "https://sandbox.duitku.com/payment/{}",
                    request.merchant_order_id
                ),
                status_code: CHECK_STATUS_SUCCESS.to_string(),
                status_message: None,
            })
        }

        async fn check_transaction(&self, merchant_order_id: &str) -> Result<TransactionStatus> {
            self.check_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TransactionStatus {
                merchant_order_id: Some(merchant_order_id.to_string()),
                reference: Some(REFERENCE.to_string()),
                amount: Some("150000".to_string()),
                status_code: self.status_code.clone(),
                status_message: None,
            })
        }
    }

    #[derive(Default)]
    struct FakeStore {
        user: Option<User>,
        course: Option<Course>,
        instance: Option<EnrolInstance>,
        teacher: Option<User>,
        admins: Vec<User>,
        orders: Mutex<Vec<EnrolmentOrder>>,
        enrol_calls: AtomicUsize,
        fail_next_enrol: AtomicUsize,
        last_window: Mutex<Option<(i64, i64)>>,
    }

    impl FakeStore {
        fn with_order(self, order: EnrolmentOrder) -> Self {
            self.orders.lock().unwrap().push(order);
            self
        }

        fn order_status(&self, reference: &str) -> Option<String> {
            self.orders
                .lock()
                .unwrap()
                .iter()
                .find(|o| o.reference == reference)
                .map(|o| o.payment_status.clone())
        }
    }

    #[async_trait]
    impl EnrolmentStore for FakeStore {
        async fn find_user(&self, user_id: i64) -> Result<Option<User>> {
            Ok(self.user.clone().filter(|u| u.user_id == user_id))
        }

        async fn find_course(&self, course_id: i64) -> Result<Option<Course>> {
            Ok(self.course.clone().filter(|c| c.course_id == course_id))
        }

        async fn find_active_instance(&self, instance_id: i64) -> Result<Option<EnrolInstance>> {
            Ok(self
                .instance
                .clone()
                .filter(|i| i.instance_id == instance_id))
        }

        async fn find_teacher(&self, _course: &Course) -> Result<Option<User>> {
            Ok(self.teacher.clone())
        }

        async fn list_admins(&self) -> Result<Vec<User>> {
            Ok(self.admins.clone())
        }

        async fn record_invoice(&self, order: EnrolmentOrder) -> Result<()> {
            self.orders.lock().unwrap().push(order);
            Ok(())
        }

        async fn claim_order_success(
            &self,
            key: &OrderKey,
            reason: &str,
            time_updated: i64,
        ) -> Result<OrderClaim> {
            let mut orders = self.orders.lock().unwrap();
            let Some(order) = orders.iter_mut().find(|o| {
                o.user_id == key.user_id
                    && o.course_id == key.course_id
                    && o.instance_id == key.instance_id
                    && o.reference == key.reference
            }) else {
                return Ok(OrderClaim::Missing);
            };
            if order.payment_status == CHECK_STATUS_SUCCESS {
                return Ok(OrderClaim::AlreadyCompleted);
            }
            order.payment_status = CHECK_STATUS_SUCCESS.to_string();
            order.pending_reason = reason.to_string();
            order.time_updated = time_updated;
            Ok(OrderClaim::Claimed(order.clone()))
        }

        async fn reopen_order(
            &self,
            key: &OrderKey,
            reason: &str,
            time_updated: i64,
        ) -> Result<()> {
            let mut orders = self.orders.lock().unwrap();
            if let Some(order) = orders.iter_mut().find(|o| o.reference == key.reference) {
                order.payment_status = CHECK_STATUS_PENDING.to_string();
                order.pending_reason = reason.to_string();
                order.time_updated = time_updated;
            }
            Ok(())
        }

        async fn enrol_user(
            &self,
            _instance: &EnrolInstance,
            _user_id: i64,
            time_start: i64,
            time_end: i64,
        ) -> Result<()> {
            if self.fail_next_enrol.load(Ordering::SeqCst) > 0 {
                self.fail_next_enrol.fetch_sub(1, Ordering::SeqCst);
                return Err(AppError::invalid_request("enrolment backend down"));
            }
            self.enrol_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_window.lock().unwrap() = Some((time_start, time_end));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMailer {
        fail: bool,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for FakeMailer {
        async fn send(
            &self,
            recipient: &str,
            template: &str,
            _data: &EnrolmentMailData,
        ) -> Result<()> {
            if self.fail {
                return Err(AppError::external_api("mail backend down"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), template.to_string()));
            Ok(())
        }
    }

    fn seeded_store(enrol_period: i64) -> FakeStore {
        let key = OrderKey {
            user_id: 7,
            course_id: 3,
            instance_id: 19,
            reference: REFERENCE.to_string(),
        };
        FakeStore {
            user: Some(test_user(7)),
            course: Some(test_course(3)),
            instance: Some(test_instance(19, 3, enrol_period)),
            ..Default::default()
        }
        .with_order(pending_order(&key, "42-7-3-19"))
    }

    fn service(
        config: AppConfig,
        gateway: Arc<FakeGateway>,
        store: Arc<FakeStore>,
        mailer: Arc<FakeMailer>,
    ) -> ReconcileService {
        ReconcileService::new(config, gateway, store, mailer)
    }

    #[tokio::test]
    async fn valid_callback_enrols_exactly_once() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(seeded_store(604_800));
        let engine = service(
            test_config(),
            gateway.clone(),
            store.clone(),
            Arc::new(FakeMailer::default()),
        );

        let before = Utc::now().timestamp();
        let outcome = engine
            .process_callback(&signed_callback("42-7-3-19", "150000", CHECK_STATUS_SUCCESS))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Enrolled {
                user_id: 7,
                course_id: 3,
                instance_id: 19,
            }
        );
        assert_eq!(store.enrol_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.order_status(REFERENCE).as_deref(),
            Some(CHECK_STATUS_SUCCESS)
        );

        let (time_start, time_end) = store.last_window.lock().unwrap().unwrap();
        assert!(time_start >= before);
        assert_eq!(time_end, time_start + 604_800);
    }

    #[tokio::test]
    async fn tampered_signature_rejected_before_gateway_call() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(seeded_store(0));
        let engine = service(
            test_config(),
            gateway.clone(),
            store.clone(),
            Arc::new(FakeMailer::default()),
        );

        let mut callback = signed_callback("42-7-3-19", "150000", CHECK_STATUS_SUCCESS);
        let flipped = if callback.signature.ends_with('0') { '1' } else { '0' };
        callback.signature.pop();
        callback.signature.push(flipped);

        let err = engine.process_callback(&callback).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidSignature));
        assert_eq!(gateway.check_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.enrol_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.order_status(REFERENCE).as_deref(),
            Some(CHECK_STATUS_PENDING)
        );
    }

    #[tokio::test]
    async fn foreign_merchant_code_is_rejected() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(seeded_store(0));
        let engine = service(
            test_config(),
            gateway.clone(),
            store.clone(),
            Arc::new(FakeMailer::default()),
        );

        let mut callback = signed_callback("42-7-3-19", "150000", CHECK_STATUS_SUCCESS);
        callback.merchant_code = "D9999".to_string();

        let err = engine.process_callback(&callback).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidSignature));
        assert_eq!(gateway.check_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pending_recheck_blocks_enrolment() {
        // Valid inline signature, but Duitku itself still says pending.
        let gateway = FakeGateway::reporting(CHECK_STATUS_PENDING);
        let store = Arc::new(seeded_store(0));
        let engine = service(
            test_config(),
            gateway.clone(),
            store.clone(),
            Arc::new(FakeMailer::default()),
        );

        let err = engine
            .process_callback(&signed_callback("42-7-3-19", "150000", CHECK_STATUS_SUCCESS))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UnconfirmedPayment(code) if code == CHECK_STATUS_PENDING));
        assert_eq!(gateway.check_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.enrol_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.order_status(REFERENCE).as_deref(),
            Some(CHECK_STATUS_PENDING)
        );
    }

    #[tokio::test]
    async fn duplicate_callback_is_a_noop() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(seeded_store(0));
        let engine = service(
            test_config(),
            gateway.clone(),
            store.clone(),
            Arc::new(FakeMailer::default()),
        );
        let callback = signed_callback("42-7-3-19", "150000", CHECK_STATUS_SUCCESS);

        let first = engine.process_callback(&callback).await.unwrap();
        let second = engine.process_callback(&callback).await.unwrap();

        assert!(matches!(first, ReconcileOutcome::Enrolled { .. }));
        assert_eq!(second, ReconcileOutcome::AlreadyProcessed);
        assert_eq!(store.enrol_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_order_reference_rejected_before_any_network_call() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(seeded_store(0));
        let engine = service(
            test_config(),
            gateway.clone(),
            store.clone(),
            Arc::new(FakeMailer::default()),
        );

        // Three segments only.
        let err = engine
            .process_callback(&signed_callback("7-3-19", "150000", CHECK_STATUS_SUCCESS))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(gateway.check_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.enrol_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_declared_result_code_rejected_before_gateway_call() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(seeded_store(0));
        let engine = service(
            test_config(),
            gateway.clone(),
            store.clone(),
            Arc::new(FakeMailer::default()),
        );

        let err = engine
            .process_callback(&signed_callback("42-7-3-19", "150000", CHECK_STATUS_CANCELED))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(gateway.check_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_user_is_unprocessable() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(FakeStore {
            course: Some(test_course(3)),
            instance: Some(test_instance(19, 3, 0)),
            ..Default::default()
        });
        let engine = service(
            test_config(),
            gateway,
            store.clone(),
            Arc::new(FakeMailer::default()),
        );

        let err = engine
            .process_callback(&signed_callback("42-7-3-19", "150000", CHECK_STATUS_SUCCESS))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound("user")));
        assert_eq!(store.enrol_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn callback_without_recorded_order_is_not_found() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(FakeStore {
            user: Some(test_user(7)),
            course: Some(test_course(3)),
            instance: Some(test_instance(19, 3, 0)),
            ..Default::default()
        });
        let engine = service(
            test_config(),
            gateway,
            store.clone(),
            Arc::new(FakeMailer::default()),
        );

        let err = engine
            .process_callback(&signed_callback("42-7-3-19", "150000", CHECK_STATUS_SUCCESS))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound("enrolment order")));
        assert_eq!(store.enrol_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn enrolment_failure_reopens_order_for_retry() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(seeded_store(0));
        store.fail_next_enrol.store(1, Ordering::SeqCst);
        let engine = service(
            test_config(),
            gateway,
            store.clone(),
            Arc::new(FakeMailer::default()),
        );
        let callback = signed_callback("42-7-3-19", "150000", CHECK_STATUS_SUCCESS);

        assert!(engine.process_callback(&callback).await.is_err());
        assert_eq!(
            store.order_status(REFERENCE).as_deref(),
            Some(CHECK_STATUS_PENDING)
        );

        // The provider retries; this time the enrolment backend is healthy.
        let outcome = engine.process_callback(&callback).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Enrolled { .. }));
        assert_eq!(store.enrol_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mail_failure_does_not_unwind_enrolment() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(seeded_store(0));
        let mut config = test_config();
        config.mail_students = true;
        let engine = service(
            config,
            gateway,
            store.clone(),
            Arc::new(FakeMailer {
                fail: true,
                ..Default::default()
            }),
        );

        let outcome = engine
            .process_callback(&signed_callback("42-7-3-19", "150000", CHECK_STATUS_SUCCESS))
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Enrolled { .. }));
        assert_eq!(store.enrol_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.order_status(REFERENCE).as_deref(),
            Some(CHECK_STATUS_SUCCESS)
        );
    }

    #[tokio::test]
    async fn missing_teacher_falls_back_to_support_and_admins_fan_out() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let mut admin_one = test_user(100);
        admin_one.is_admin = true;
        let mut admin_two = test_user(101);
        admin_two.is_admin = true;
        let key = OrderKey {
            user_id: 7,
            course_id: 3,
            instance_id: 19,
            reference: REFERENCE.to_string(),
        };
        let store = Arc::new(
            FakeStore {
                user: Some(test_user(7)),
                course: Some(test_course(3)),
                instance: Some(test_instance(19, 3, 0)),
                teacher: None,
                admins: vec![admin_one, admin_two],
                ..Default::default()
            }
            .with_order(pending_order(&key, "42-7-3-19")),
        );
        let mailer = Arc::new(FakeMailer::default());
        let mut config = test_config();
        config.mail_students = true;
        config.mail_teachers = true;
        config.mail_admins = true;
        let engine = service(config, gateway, store, mailer.clone());

        engine
            .process_callback(&signed_callback("42-7-3-19", "150000", CHECK_STATUS_SUCCESS))
            .await
            .unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![
                ("user7@example.com".to_string(), STUDENT_TEMPLATE.to_string()),
                (
                    "support@lms.example.com".to_string(),
                    TEACHER_TEMPLATE.to_string()
                ),
                ("user100@example.com".to_string(), ADMIN_TEMPLATE.to_string()),
                ("user101@example.com".to_string(), ADMIN_TEMPLATE.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn unlimited_window_when_instance_has_no_period() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(seeded_store(0));
        let engine = service(
            test_config(),
            gateway,
            store.clone(),
            Arc::new(FakeMailer::default()),
        );

        engine
            .process_callback(&signed_callback("42-7-3-19", "150000", CHECK_STATUS_SUCCESS))
            .await
            .unwrap();

        assert_eq!(*store.last_window.lock().unwrap(), Some((0, 0)));
    }

    #[tokio::test]
    async fn initiate_purchase_records_pending_order() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(FakeStore {
            user: Some(test_user(7)),
            course: Some(test_course(3)),
            instance: Some(test_instance(19, 3, 604_800)),
            ..Default::default()
        });
        let engine = service(
            test_config(),
            gateway,
            store.clone(),
            Arc::new(FakeMailer::default()),
        );

        let initiated = engine.initiate_purchase(7, 3, 19).await.unwrap();

        assert_eq!(initiated.reference, REFERENCE);
        assert!(initiated.payment_url.contains(&initiated.merchant_order_id));
        let decoded = OrderRef::decode(&initiated.merchant_order_id).unwrap();
        assert_eq!((decoded.user_id, decoded.course_id, decoded.instance_id), (7, 3, 19));

        let orders = store.orders.lock().unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].payment_status, CHECK_STATUS_PENDING);
        assert_eq!(orders[0].amount, 150_000);
    }

    #[tokio::test]
    async fn initiate_purchase_rejects_unknown_instance() {
        let gateway = FakeGateway::reporting(CHECK_STATUS_SUCCESS);
        let store = Arc::new(FakeStore {
            user: Some(test_user(7)),
            course: Some(test_course(3)),
            ..Default::default()
        });
        let engine = service(
            test_config(),
            gateway,
            store,
            Arc::new(FakeMailer::default()),
        );

        let err = engine.initiate_purchase(7, 3, 19).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("enrolment instance")));
    }
}
