// services/mail_service.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::AppConfig;
use crate::errors::{AppError, Result};

pub const STUDENT_TEMPLATE: &str = "duitku_mail_for_students";
pub const TEACHER_TEMPLATE: &str = "duitku_mail_for_teachers";
pub const ADMIN_TEMPLATE: &str = "duitku_mail_for_admins";

/// Placeholder values substituted into the enrolment mail templates.
#[derive(Debug, Clone, Serialize)]
pub struct EnrolmentMailData {
    #[serde(rename = "courseFullName")]
    pub course_full_name: String,
    #[serde(rename = "courseShortName")]
    pub course_short_name: String,
    #[serde(rename = "amount")]
    pub amount: String,
    #[serde(rename = "studentUsername")]
    pub student_username: String,
    #[serde(rename = "teacherName")]
    pub teacher_name: String,
    #[serde(rename = "adminUsername")]
    pub admin_username: String,
}

/// Template rendering and delivery live behind this seam; the engine only
/// fires it after an enrolment has committed and never rolls back on
/// failure.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, template: &str, data: &EnrolmentMailData) -> Result<()>;
}

#[derive(Clone)]
pub struct MailApiNotifier {
    api_url: String,
    api_key: String,
    from: String,
    client: Client,
}

impl MailApiNotifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            api_url: config.mail_api_url.clone(),
            api_key: config.mail_api_key.clone(),
            from: config.mail_from.clone(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for MailApiNotifier {
    async fn send(&self, recipient: &str, template: &str, data: &EnrolmentMailData) -> Result<()> {
        let response = self
            .client
            .post(&self.api_url)
            .header("apiKey", &self.api_key)
            .header("Accept", "application/json")
            .json(&serde_json::json!({
                "to": recipient,
                "from": self.from,
                "template": template,
                "data": data,
            }))
            .send()
            .await
            .map_err(|e| AppError::external_api(format!("Mail API error: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::external_api(format!(
                "Mail sending failed with status: {}",
                response.status()
            )))
        }
    }
}
