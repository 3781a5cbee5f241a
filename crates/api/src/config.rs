//! API server configuration.

use careplan_billing::RetryPolicy;

/// Runtime configuration loaded from environment variables.
///
/// Stripe configuration (secret key, webhook secret, price ids) is loaded
/// separately by the billing crate.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Explicit CORS origin allowlist.
    pub allowed_origins: Vec<String>,
    /// Polling budget for the post-signup profile wait.
    pub profile_poll: RetryPolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_url,
            bind_address,
            allowed_origins,
            profile_poll: RetryPolicy::from_env(),
        })
    }
}
