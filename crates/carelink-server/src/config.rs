use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Server configuration, read once at startup from `CARELINK_*` environment
/// variables. Unset optional URLs disable the corresponding side channel.
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub admin_token: String,
    pub search_url: Option<String>,
    pub email_webhook: Option<String>,
    pub sms_webhook: Option<String>,
    pub whatsapp_webhook: Option<String>,
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub worker_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = var_or("CARELINK_HOST", "0.0.0.0");
        let port: u16 = var_or("CARELINK_PORT", "3000")
            .parse()
            .context("CARELINK_PORT must be a port number")?;
        let db_path = PathBuf::from(var_or("CARELINK_DB_PATH", "carelink.db"));
        let jwt_secret = var_or("CARELINK_JWT_SECRET", "dev-secret-change-me");
        // empty means the admin surface is unreachable
        let admin_token = var_or("CARELINK_ADMIN_TOKEN", "");

        let rate_limit: u32 = var_or("CARELINK_RATE_LIMIT", "120")
            .parse()
            .context("CARELINK_RATE_LIMIT must be a number")?;
        let rate_window = Duration::from_secs(
            var_or("CARELINK_RATE_WINDOW_SECS", "60")
                .parse()
                .context("CARELINK_RATE_WINDOW_SECS must be a number")?,
        );
        let worker_interval = Duration::from_secs(
            var_or("CARELINK_WORKER_INTERVAL_SECS", "30")
                .parse()
                .context("CARELINK_WORKER_INTERVAL_SECS must be a number")?,
        );

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            admin_token,
            search_url: std::env::var("CARELINK_SEARCH_URL").ok(),
            email_webhook: std::env::var("CARELINK_EMAIL_WEBHOOK").ok(),
            sms_webhook: std::env::var("CARELINK_SMS_WEBHOOK").ok(),
            whatsapp_webhook: std::env::var("CARELINK_WHATSAPP_WEBHOOK").ok(),
            rate_limit,
            rate_window,
            worker_interval,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}
