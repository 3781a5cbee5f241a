//! Stripe client wrapper and configuration.

use crate::error::{BillingError, BillingResult};

/// Price identifiers, one per plan plus the clinic base fee.
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub basic: String,
    pub standard: String,
    pub premium: String,
    pub clinic_base_fee: String,
}

impl PriceIds {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            basic: require_env("PRICE_ID_BASIC")?,
            standard: require_env("PRICE_ID_STANDARD")?,
            premium: require_env("PRICE_ID_PREMIUM")?,
            clinic_base_fee: require_env("PRICE_ID_CLINIC_BASE_FEE")?,
        })
    }
}

/// Stripe configuration consumed by checkout and the webhook reconciler.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_ids: PriceIds,
    /// Where the hosted checkout page redirects after payment.
    pub success_url: String,
    pub cancel_url: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: require_env("STRIPE_SECRET_KEY")?,
            webhook_secret: require_env("STRIPE_WEBHOOK_SECRET")?,
            price_ids: PriceIds::from_env()?,
            success_url: std::env::var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|_| "http://localhost:3000/billing/success".to_string()),
            cancel_url: std::env::var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| "http://localhost:3000/billing/cancel".to_string()),
        })
    }
}

fn require_env(name: &str) -> BillingResult<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(BillingError::Config(format!("{} must be set", name))),
    }
}

/// Thin wrapper owning the Stripe API client together with its config.
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self { inner, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
