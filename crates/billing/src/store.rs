//! Datastore seam.
//!
//! The reconciler, profile poller, and HTTP handlers all go through the
//! [`BillingStore`] trait so tests can substitute an in-memory fake. The
//! production implementation is [`PgBillingStore`].

mod postgres;

pub use postgres::PgBillingStore;

use async_trait::async_trait;
use careplan_shared::{AccountRole, BaseFeeStatus, SubscriptionStatus};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::PlanSnapshot;
use crate::error::BillingResult;
use crate::events::ActivityEntry;

/// Per-account profile document, materialized by a backend trigger some
/// time after account creation.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub uid: String,
    pub email: String,
    pub role: AccountRole,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ClinicRecord {
    pub clinic_id: String,
    pub clinic_name: String,
    pub email: String,
    pub base_fee_status: BaseFeeStatus,
    pub base_fee_subscription_id: Option<String>,
    pub base_fee_customer_id: Option<String>,
    /// Running commission total; equals the sum of the commission ledger.
    pub commission_earned: i64,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub patient_id: String,
    pub clinic_id: String,
    pub plan_id: String,
    pub plan_snapshot: PlanSnapshot,
    pub status: SubscriptionStatus,
    pub provider_subscription_id: String,
    pub provider_customer_id: Option<String>,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields for a subscription created by the reconciler on first successful
/// checkout.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub patient_id: String,
    pub clinic_id: String,
    pub plan_snapshot: PlanSnapshot,
    pub provider_subscription_id: String,
    pub provider_customer_id: Option<String>,
}

/// Outcome of attempting to claim a webhook event id for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClaim {
    /// Exclusive processing rights acquired.
    Claimed,
    /// Already processed (or currently in flight); skip.
    Duplicate,
}

/// Final processing state recorded on a claimed event.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Success,
    Error(String),
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Success => "success",
            EventOutcome::Error(_) => "error",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            EventOutcome::Success => None,
            EventOutcome::Error(msg) => Some(msg),
        }
    }
}

/// Storage operations needed by the billing core.
///
/// Mutations are idempotent set-to-target operations keyed by correlation
/// id; the one additive mutation (`accrue_commission`) dedupes by provider
/// event id.
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Atomically claim a webhook event id. Claims finished with an error,
    /// or stuck in processing past the recovery timeout, may be reclaimed
    /// so provider redelivery can make progress.
    async fn claim_event(&self, event_id: &str, event_type: &str) -> BillingResult<EventClaim>;

    /// Record the processing outcome on a claimed event.
    async fn finish_event(&self, event_id: &str, outcome: &EventOutcome) -> BillingResult<()>;

    async fn find_clinic(&self, clinic_id: &str) -> BillingResult<Option<ClinicRecord>>;

    /// Set a clinic's base fee to active and store the provider ids.
    /// Idempotent: re-applying with the same ids is a no-op.
    async fn activate_clinic_base_fee(
        &self,
        clinic_id: &str,
        provider_subscription_id: &str,
        provider_customer_id: Option<&str>,
    ) -> BillingResult<()>;

    async fn find_subscription_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>>;

    async fn insert_subscription(&self, sub: NewSubscription) -> BillingResult<SubscriptionRecord>;

    /// Transition a subscription to a target status. `ended_at` is only
    /// recorded the first time it is supplied. Returns the updated record,
    /// or `None` when no subscription matches the correlation id.
    async fn transition_subscription(
        &self,
        provider_subscription_id: &str,
        status: SubscriptionStatus,
        ended_at: Option<OffsetDateTime>,
    ) -> BillingResult<Option<SubscriptionRecord>>;

    /// Add `amount` to a clinic's commission total, keyed by provider
    /// event id. Returns `false` when this event was already accrued.
    async fn accrue_commission(
        &self,
        clinic_id: &str,
        amount: i64,
        event_id: &str,
    ) -> BillingResult<bool>;

    async fn append_activity(&self, entry: ActivityEntry) -> BillingResult<()>;

    async fn recent_activity(
        &self,
        clinic_id: Option<&str>,
        limit: i64,
    ) -> BillingResult<Vec<ActivityEntry>>;

    async fn find_profile(&self, account_id: &str) -> BillingResult<Option<Profile>>;
}
