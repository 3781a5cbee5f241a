//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    /// Billing service (None when Stripe env vars are not configured)
    pub billing: Option<Arc<careplan_billing::BillingService>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let billing = match careplan_billing::BillingService::from_env(pool.clone()) {
            Ok(svc) => {
                tracing::info!("Stripe billing service initialized");
                Some(Arc::new(svc))
            }
            Err(e) => {
                tracing::warn!("Stripe billing not configured: {}", e);
                None
            }
        };

        Self {
            pool,
            config,
            billing,
        }
    }

    /// Get billing service reference
    pub fn billing_service(&self) -> Option<&Arc<careplan_billing::BillingService>> {
        self.billing.as_ref()
    }
}
