// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! CarePlan Billing Module
//!
//! Handles Stripe integration for care plan subscriptions and clinic base
//! fees, plus the webhook reconciliation that keeps internal records
//! consistent with the payment provider.
//!
//! ## Features
//!
//! - **Plan Catalog**: subscription tiers with clinic commission splits
//! - **Checkout**: hosted checkout sessions for plans and the clinic base fee
//! - **Webhooks**: signature-verified event reconciliation with idempotent,
//!   order-tolerant state transitions
//! - **Activity Feed**: append-only audit trail for dashboards
//! - **Profile Polling**: bounded read-after-write wait for profile documents
//! - **Invariants**: executable consistency checks over billing state

pub mod catalog;
pub mod checkout;
pub mod client;
pub mod error;
pub mod events;
pub mod invariants;
pub mod profile;
pub mod store;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod testutil;


// Catalog
pub use catalog::{Plan, PlanCatalog, PlanSnapshot};

// Checkout
pub use checkout::{CheckoutResponse, CheckoutService, PlanCheckoutRequest};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{ActivityEntry, ActivityFeedWriter};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Profile polling
pub use profile::{ProfileService, RetryPolicy};

// Store
pub use store::{
    BillingStore, ClinicRecord, EventClaim, EventOutcome, NewSubscription, PgBillingStore,
    Profile, SubscriptionRecord,
};

// Webhooks
pub use webhooks::{verify_signature, EventPayload, ProviderEvent, WebhookReconciler};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub catalog: PlanCatalog,
    pub checkout: CheckoutService,
    pub profiles: ProfileService,
    pub activity: ActivityFeedWriter,
    pub reconciler: WebhookReconciler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        let store: Arc<dyn BillingStore> = Arc::new(PgBillingStore::new(pool));
        Ok(Self::new(stripe, store))
    }

    /// Create a new billing service with an explicit client and store
    pub fn new(stripe: StripeClient, store: Arc<dyn BillingStore>) -> Self {
        let catalog = PlanCatalog::with_price_ids(&stripe.config().price_ids);
        let webhook_secret = stripe.config().webhook_secret.clone();

        Self {
            catalog: catalog.clone(),
            checkout: CheckoutService::new(stripe),
            profiles: ProfileService::new(store.clone()),
            activity: ActivityFeedWriter::new(store.clone()),
            reconciler: WebhookReconciler::new(store, catalog, webhook_secret),
        }
    }
}
