use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub gateway: GatewayConfig,
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
}

/// Payment gateway credentials. `key_secret` signs payment verification
/// payloads; `webhook_secret` is a separate key used only for webhook
/// authenticity.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub currency: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);

        let gateway = GatewayConfig {
            base_url: env::var("PAYMENT_GATEWAY_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
            key_id: env::var("PAYMENT_KEY_ID").unwrap_or_default(),
            key_secret: env::var("PAYMENT_KEY_SECRET").unwrap_or_default(),
            webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            currency: env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "INR".to_string()),
        };

        let mail_relay_url = env::var("MAIL_RELAY_URL").ok().filter(|s| !s.is_empty());
        let mail_from =
            env::var("MAIL_FROM").unwrap_or_else(|_| "no-reply@example.com".to_string());

        Ok(Self {
            database_url,
            host,
            port,
            gateway,
            mail_relay_url,
            mail_from,
        })
    }
}
