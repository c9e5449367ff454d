// config.rs
use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub duitku_merchant_code: String,
    pub duitku_api_key: String,
    pub duitku_environment: String,
    pub duitku_callback_url: String,
    pub duitku_return_url: String,
    pub mail_students: bool,
    pub mail_teachers: bool,
    pub mail_admins: bool,
    pub mail_api_url: String,
    pub mail_api_key: String,
    pub mail_from: String,
    pub support_name: String,
    pub support_email: String,
    pub database_url: String,
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenv().ok();

        let duitku_environment = env::var("DUITKU_ENVIRONMENT")
            .unwrap_or_else(|_| "sandbox".to_string());

        AppConfig {
            duitku_merchant_code: env::var("DUITKU_MERCHANT_CODE")
                .expect("DUITKU_MERCHANT_CODE must be set"),
            duitku_api_key: env::var("DUITKU_API_KEY")
                .expect("DUITKU_API_KEY must be set"),
            duitku_callback_url: env::var("DUITKU_CALLBACK_URL")
                .expect("DUITKU_CALLBACK_URL must be set"),
            duitku_return_url: env::var("DUITKU_RETURN_URL")
                .expect("DUITKU_RETURN_URL must be set"),
            duitku_environment,
            mail_students: env_flag("MAIL_STUDENTS"),
            mail_teachers: env_flag("MAIL_TEACHERS"),
            mail_admins: env_flag("MAIL_ADMINS"),
            mail_api_url: env::var("MAIL_API_URL").unwrap_or_default(),
            mail_api_key: env::var("MAIL_API_KEY").unwrap_or_default(),
            mail_from: env::var("MAIL_FROM")
                .unwrap_or_else(|_| "noreply@enrolpay.local".to_string()),
            support_name: env::var("SUPPORT_NAME")
                .unwrap_or_else(|_| "Support".to_string()),
            support_email: env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@enrolpay.local".to_string()),
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("PORT must be a number"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        }
    }

    pub fn duitku_base_url(&self) -> &'static str {
        if self.is_production() {
            "https://api-prod.duitku.com/api/merchant"
        } else {
            "https://api-sandbox.duitku.com/api/merchant"
        }
    }

    pub fn is_production(&self) -> bool {
        self.duitku_environment == "production"
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
