//! Environment-driven configuration, validated once at boot. Missing or
//! malformed required variables fail fast rather than surfacing later as
//! a confusing runtime error.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub node_env: String,
    pub port: u16,

    pub lease_timeout: Duration,
    pub stale_threshold: Duration,
    pub recovery_interval: Duration,
    pub vendor_response_timeout: Duration,
    pub external_timeout: Duration,
    pub max_vendor_attempts: u32,
    pub max_active_orders: u32,
    pub max_pending_orders: u32,
    pub max_webhook_attempts: u32,
    pub notify_max_attempts: u32,
    pub ledger_retries: u32,
    pub gateway_concurrency: usize,
    pub monopoly_threshold_pct: u8,
    pub stalled_threshold: Duration,
    pub snapshot_ttl: Duration,
}

impl AppConfig {
    /// Loads and validates configuration from the process environment.
    /// Returns an error describing exactly what is missing/malformed; the
    /// caller (`main`) logs it and exits 1 rather than starting degraded.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = require_env("DATABASE_URL")?;
        if !database_url.starts_with("postgresql://") && !database_url.starts_with("postgres://") {
            anyhow::bail!("DATABASE_URL must be a postgresql:// connection string");
        }

        let redis_url = match env::var("REDIS_URL") {
            Ok(v) if v.is_empty() => None,
            Ok(v) => {
                if !v.starts_with("redis://") && !v.starts_with("rediss://") {
                    anyhow::bail!("REDIS_URL must start with redis:// or rediss://");
                }
                Some(v)
            }
            Err(_) => None,
        };

        let jwt_secret = require_env("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters");
        }

        let node_env = require_env("NODE_ENV")?;
        let port: u16 = require_env("PORT")?
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid u16"))?;

        Ok(Self {
            database_url,
            redis_url,
            jwt_secret,
            node_env,
            port,
            lease_timeout: Duration::from_secs(5 * 60),
            stale_threshold: Duration::from_secs(2 * 60),
            recovery_interval: Duration::from_secs(2 * 60),
            vendor_response_timeout: Duration::from_secs(2 * 60 * 60),
            external_timeout: Duration::from_secs(30),
            max_vendor_attempts: 5,
            max_active_orders: 10,
            max_pending_orders: 5,
            max_webhook_attempts: 3,
            notify_max_attempts: 5,
            ledger_retries: 5,
            gateway_concurrency: 10,
            monopoly_threshold_pct: 40,
            stalled_threshold: Duration::from_secs(24 * 60 * 60),
            snapshot_ttl: Duration::from_secs(60 * 60),
        })
    }

    /// Whether outbound messaging credentials are configured. When absent,
    /// the notifier degrades to a no-op rather than failing orders.
    #[must_use]
    pub fn messaging_enabled(&self) -> bool {
        env::var("WHATSAPP_GATEWAY_TOKEN").is_ok()
    }

    /// Base URL of the messaging gateway's send endpoint, when configured.
    #[must_use]
    pub fn messaging_gateway_url(&self) -> Option<String> {
        env::var("WHATSAPP_GATEWAY_URL").ok().filter(|v| !v.is_empty())
    }

    /// Endpoint of the external image OCR + LLM extraction pipeline, when
    /// configured. Absent in degraded/local setups — the image-upload path
    /// then fails fast with a clear error instead of silently losing the
    /// upload.
    #[must_use]
    pub fn image_extraction_url(&self) -> Option<String> {
        env::var("IMAGE_EXTRACTION_URL").ok().filter(|v| !v.is_empty())
    }

    #[must_use]
    pub const fn snapshot_ttl(&self) -> Duration {
        self.snapshot_ttl
    }
}

fn require_env(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("missing required environment variable {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn rejects_short_jwt_secret() {
        let _guard = ENV_LOCK.lock().unwrap();
        // SAFETY: guarded by ENV_LOCK, no concurrent env access in this test process.
        unsafe {
            env::set_var("DATABASE_URL", "postgresql://localhost/db");
            env::set_var("JWT_SECRET", "too-short");
            env::set_var("NODE_ENV", "test");
            env::set_var("PORT", "8080");
            env::remove_var("REDIS_URL");
        }
        let result = AppConfig::from_env();
        assert!(result.is_err());
        // SAFETY: guarded by ENV_LOCK.
        unsafe {
            env::remove_var("DATABASE_URL");
            env::remove_var("JWT_SECRET");
            env::remove_var("NODE_ENV");
            env::remove_var("PORT");
        }
    }
}
