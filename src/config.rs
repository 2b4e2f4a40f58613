// config.rs
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub port: u16,
    // Payment provider configurations
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub paystack_secret_key: String,
    // Email service configuration (Resend)
    pub resend_api_key: String,
    pub mail_from: String,
    // Optional Redis cache
    pub redis_url: Option<String>,
}

impl Config {
    pub fn init() -> Config {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let jwt_secret = std::env::var("JWT_SECRET_KEY").expect("JWT_SECRET_KEY must be set");

        // Payment provider configurations (with defaults for local runs)
        let stripe_secret_key = std::env::var("STRIPE_SECRET_KEY")
            .unwrap_or_else(|_| "sk_test_secret_key".to_string());
        let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .unwrap_or_else(|_| "whsec_test_secret".to_string());
        let paystack_secret_key = std::env::var("PAYSTACK_SECRET_KEY")
            .unwrap_or_else(|_| "test_secret_key".to_string());

        let resend_api_key = std::env::var("RESEND_API_KEY").unwrap_or_default();
        let mail_from = std::env::var("MAIL_FROM")
            .unwrap_or_else(|_| "Cars.na <billing@cars.na>".to_string());

        let redis_url = std::env::var("REDIS_URL").ok();

        Config {
            database_url,
            jwt_secret,
            port: 8000,
            stripe_secret_key,
            stripe_webhook_secret,
            paystack_secret_key,
            resend_api_key,
            mail_from,
            redis_url,
        }
    }
}
