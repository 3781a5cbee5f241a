//! Payment provider webhook reconciliation.
//!
//! Single entry point for asynchronous billing events: verify the
//! signature against the raw body, decode into a closed event union,
//! claim the event id, then apply the matching state transition plus its
//! activity feed entry. Transitions are idempotent set-to-target
//! operations keyed by correlation id, so out-of-order and at-least-once
//! delivery are safe.

use std::collections::HashMap;
use std::sync::Arc;

use careplan_shared::{ActivityType, BaseFeeStatus, SubscriptionStatus, UNASSIGNED_CLINIC};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::catalog::PlanCatalog;
use crate::checkout::{
    META_ACCOUNT_ID, META_CLINIC_ID, META_PATIENT_ID, META_PRICE_ID, META_PURPOSE,
    PURPOSE_CLINIC_BASE_FEE,
};
use crate::error::{BillingError, BillingResult};
use crate::events::{ActivityEntry, ActivityFeedWriter};
use crate::store::{BillingStore, EventClaim, EventOutcome, NewSubscription};

type HmacSha256 = Hmac<Sha256>;

/// Signature timestamps older than this are rejected.
const SIGNATURE_TOLERANCE_SECONDS: i64 = 300;

/// Verify a provider webhook signature against the raw body.
///
/// Header format: `t=<unix timestamp>,v1=<hex hmac>`; the signed payload
/// is `"{t}.{body}"`. Runs before any body parsing so a forged event
/// never reaches the dispatch logic.
pub fn verify_signature(
    payload: &str,
    signature_header: &str,
    webhook_secret: &str,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in signature_header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = v.trim().parse().ok(),
            (Some("v1"), Some(v)) => v1_signature = Some(v.trim()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;
    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::warn!("Missing v1 signature in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| BillingError::WebhookSignatureInvalid)?
        .as_secs() as i64;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECONDS {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    // The secret's "whsec_" prefix is not part of the key material.
    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if subtle::ConstantTimeEq::ct_eq(computed.as_bytes(), v1_signature.as_bytes()).into() {
        Ok(())
    } else {
        tracing::warn!("Webhook signature mismatch");
        Err(BillingError::WebhookSignatureInvalid)
    }
}

/// A verified, decoded provider event.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub id: String,
    pub created: i64,
    pub payload: EventPayload,
}

/// Closed union of recognized event types. Anything else decodes to
/// `Unknown` and is acknowledged without action, so the provider's event
/// catalog can grow without breaking this consumer.
#[derive(Debug, Clone)]
pub enum EventPayload {
    CheckoutCompleted(CheckoutSessionPayload),
    InvoicePaymentFailed(InvoicePayload),
    SubscriptionDeleted(SubscriptionPayload),
    Unknown { event_type: String },
}

impl EventPayload {
    pub fn type_str(&self) -> &str {
        match self {
            EventPayload::CheckoutCompleted(_) => "checkout.session.completed",
            EventPayload::InvoicePaymentFailed(_) => "invoice.payment_failed",
            EventPayload::SubscriptionDeleted(_) => "customer.subscription.deleted",
            EventPayload::Unknown { event_type } => event_type,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionPayload {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub subscription: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicePayload {
    pub id: String,
    #[serde(default, deserialize_with = "expandable_id")]
    pub subscription: Option<String>,
    #[serde(default)]
    pub amount_due: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionPayload {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Provider references arrive either as a bare id string or as an
/// expanded object carrying an `id` field. Normalize both to the id.
fn expandable_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Expandable {
        Id(String),
        Object { id: String },
    }

    let value: Option<Expandable> = Option::deserialize(deserializer)?;
    Ok(value.map(|e| match e {
        Expandable::Id(id) => id,
        Expandable::Object { id } => id,
    }))
}

impl ProviderEvent {
    /// Decode a verified raw body into the event union.
    pub fn decode(payload: &str) -> BillingResult<Self> {
        #[derive(Deserialize)]
        struct RawEvent {
            id: String,
            #[serde(rename = "type")]
            event_type: String,
            #[serde(default)]
            created: i64,
            data: RawEventData,
        }

        #[derive(Deserialize)]
        struct RawEventData {
            object: serde_json::Value,
        }

        let raw: RawEvent = serde_json::from_str(payload)
            .map_err(|e| BillingError::WebhookPayloadInvalid(e.to_string()))?;

        fn decode_object<T: serde::de::DeserializeOwned>(
            object: serde_json::Value,
            event_type: &str,
        ) -> BillingResult<T> {
            serde_json::from_value(object).map_err(|e| {
                BillingError::WebhookPayloadInvalid(format!("{} object: {}", event_type, e))
            })
        }

        let payload = match raw.event_type.as_str() {
            "checkout.session.completed" => EventPayload::CheckoutCompleted(decode_object(
                raw.data.object,
                &raw.event_type,
            )?),
            "invoice.payment_failed" => {
                EventPayload::InvoicePaymentFailed(decode_object(raw.data.object, &raw.event_type)?)
            }
            "customer.subscription.deleted" => {
                EventPayload::SubscriptionDeleted(decode_object(raw.data.object, &raw.event_type)?)
            }
            _ => EventPayload::Unknown {
                event_type: raw.event_type,
            },
        };

        Ok(ProviderEvent {
            id: raw.id,
            created: raw.created,
            payload,
        })
    }
}

/// Webhook handler: authenticates, dispatches, and applies transitions.
pub struct WebhookReconciler {
    store: Arc<dyn BillingStore>,
    catalog: PlanCatalog,
    activity: ActivityFeedWriter,
    webhook_secret: String,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        catalog: PlanCatalog,
        webhook_secret: impl Into<String>,
    ) -> Self {
        let activity = ActivityFeedWriter::new(store.clone());
        Self {
            store,
            catalog,
            activity,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify and decode a webhook delivery. Signature first; a bad
    /// signature performs no parsing and no state mutation.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<ProviderEvent> {
        verify_signature(payload, signature, &self.webhook_secret)?;
        ProviderEvent::decode(payload)
    }

    /// Handle a verified event.
    ///
    /// Safe to invoke more than once for the same event id: the claim on
    /// `webhook_events` suppresses duplicates, and each handler checks the
    /// correlation id before creating state. Correlation misses are logged
    /// and acknowledged; transient store failures propagate as retryable
    /// errors so the provider redelivers.
    pub async fn handle_event(&self, event: ProviderEvent) -> BillingResult<()> {
        let event_type = event.payload.type_str().to_string();

        match self.store.claim_event(&event.id, &event_type).await? {
            EventClaim::Duplicate => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event_type,
                    "Duplicate webhook event, already processed or in flight"
                );
                return Ok(());
            }
            EventClaim::Claimed => {}
        }

        tracing::info!(
            event_id = %event.id,
            event_type = %event_type,
            "Processing webhook event"
        );

        let result = self.process_event(&event).await;

        let outcome = match &result {
            Ok(()) => EventOutcome::Success,
            Err(e) => EventOutcome::Error(e.to_string()),
        };
        if let Err(e) = self.store.finish_event(&event.id, &outcome).await {
            // The claim row stays in 'processing' and becomes reclaimable
            // after the recovery timeout, so redelivery can still land.
            tracing::error!(
                event_id = %event.id,
                error = %e,
                "Failed to record webhook processing outcome"
            );
        }

        result
    }

    async fn process_event(&self, event: &ProviderEvent) -> BillingResult<()> {
        match &event.payload {
            EventPayload::CheckoutCompleted(session) => {
                self.handle_checkout_completed(event, session).await
            }
            EventPayload::InvoicePaymentFailed(invoice) => {
                self.handle_invoice_payment_failed(event, invoice).await
            }
            EventPayload::SubscriptionDeleted(subscription) => {
                self.handle_subscription_deleted(event, subscription).await
            }
            EventPayload::Unknown { event_type } => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event_type,
                    "Unhandled webhook event type, acknowledging without action"
                );
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(
        &self,
        event: &ProviderEvent,
        session: &CheckoutSessionPayload,
    ) -> BillingResult<()> {
        // The purpose tag set at checkout creation is the only signal that
        // distinguishes a clinic base fee from a patient plan.
        if session.metadata.get(META_PURPOSE).map(String::as_str)
            == Some(PURPOSE_CLINIC_BASE_FEE)
        {
            self.handle_base_fee_completed(event, session).await
        } else {
            self.handle_plan_completed(event, session).await
        }
    }

    async fn handle_base_fee_completed(
        &self,
        event: &ProviderEvent,
        session: &CheckoutSessionPayload,
    ) -> BillingResult<()> {
        let Some(account_id) = session.metadata.get(META_ACCOUNT_ID) else {
            tracing::warn!(
                event_id = %event.id,
                session_id = %session.id,
                "Base fee checkout completed without account_id metadata, skipping"
            );
            return Ok(());
        };

        let Some(provider_subscription_id) = session.subscription.as_deref() else {
            tracing::warn!(
                event_id = %event.id,
                session_id = %session.id,
                account_id = %account_id,
                "Base fee checkout completed without a subscription, skipping"
            );
            return Ok(());
        };

        let Some(clinic) = self.store.find_clinic(account_id).await? else {
            tracing::warn!(
                event_id = %event.id,
                account_id = %account_id,
                "No clinic matches base fee checkout, skipping"
            );
            return Ok(());
        };

        if clinic.base_fee_status == BaseFeeStatus::Active
            && clinic.base_fee_subscription_id.as_deref() == Some(provider_subscription_id)
        {
            tracing::info!(
                event_id = %event.id,
                clinic_id = %clinic.clinic_id,
                "Base fee already active for this correlation id, skipping"
            );
            return Ok(());
        }

        self.store
            .activate_clinic_base_fee(
                &clinic.clinic_id,
                provider_subscription_id,
                session.customer.as_deref(),
            )
            .await?;

        self.activity
            .append(
                ActivityEntry::new(ActivityType::BaseFeePaid, &clinic.clinic_id)
                    .clinic(&clinic.clinic_id)
                    .message(format!("{} paid the clinic base fee", clinic.clinic_name))
                    .details(serde_json::json!({
                        "clinicName": clinic.clinic_name,
                        "amount": session.amount_total,
                    }))
                    .source_event(&event.id),
            )
            .await?;

        tracing::info!(
            event_id = %event.id,
            clinic_id = %clinic.clinic_id,
            provider_subscription_id = %provider_subscription_id,
            "Clinic base fee activated"
        );

        Ok(())
    }

    async fn handle_plan_completed(
        &self,
        event: &ProviderEvent,
        session: &CheckoutSessionPayload,
    ) -> BillingResult<()> {
        let Some(provider_subscription_id) = session.subscription.as_deref() else {
            tracing::warn!(
                event_id = %event.id,
                session_id = %session.id,
                "Plan checkout completed without a subscription, skipping"
            );
            return Ok(());
        };

        let Some(price_id) = session.metadata.get(META_PRICE_ID) else {
            tracing::warn!(
                event_id = %event.id,
                session_id = %session.id,
                "Plan checkout completed without price_id metadata, skipping"
            );
            return Ok(());
        };

        let Some(plan) = self.catalog.find_by_provider_price_id(price_id) else {
            tracing::warn!(
                event_id = %event.id,
                price_id = %price_id,
                "Plan checkout completed for unknown price id, skipping"
            );
            return Ok(());
        };

        let Some(patient_id) = session.metadata.get(META_PATIENT_ID) else {
            tracing::warn!(
                event_id = %event.id,
                session_id = %session.id,
                "Plan checkout completed without patient_id metadata, skipping"
            );
            return Ok(());
        };

        let clinic_id = session
            .metadata
            .get(META_CLINIC_ID)
            .cloned()
            .unwrap_or_else(|| UNASSIGNED_CLINIC.to_string());

        // An existing record for this correlation id means either a
        // redelivery or a stale completion racing a later cancellation;
        // both must leave the record untouched.
        if let Some(existing) = self
            .store
            .find_subscription_by_provider_id(provider_subscription_id)
            .await?
        {
            tracing::info!(
                event_id = %event.id,
                subscription_id = %existing.id,
                status = %existing.status,
                "Subscription already exists for this correlation id, skipping"
            );
            return Ok(());
        }

        let record = self
            .store
            .insert_subscription(NewSubscription {
                patient_id: patient_id.clone(),
                clinic_id,
                plan_snapshot: plan.snapshot(),
                provider_subscription_id: provider_subscription_id.to_string(),
                provider_customer_id: session.customer.clone(),
            })
            .await?;

        if record.clinic_id != UNASSIGNED_CLINIC {
            let accrued = self
                .store
                .accrue_commission(&record.clinic_id, plan.commission, &event.id)
                .await?;
            if !accrued {
                tracing::info!(
                    event_id = %event.id,
                    clinic_id = %record.clinic_id,
                    "Commission already accrued for this event id"
                );
            }
        }

        self.activity
            .append(
                ActivityEntry::new(ActivityType::NewSignup, &record.patient_id)
                    .clinic(&record.clinic_id)
                    .message(format!("New {} subscription", plan.name))
                    .details(serde_json::json!({
                        "plan": plan.name,
                        "amount": plan.price,
                    }))
                    .source_event(&event.id),
            )
            .await?;

        tracing::info!(
            event_id = %event.id,
            subscription_id = %record.id,
            patient_id = %record.patient_id,
            clinic_id = %record.clinic_id,
            plan_id = %record.plan_id,
            "Subscription created from completed checkout"
        );

        Ok(())
    }

    async fn handle_invoice_payment_failed(
        &self,
        event: &ProviderEvent,
        invoice: &InvoicePayload,
    ) -> BillingResult<()> {
        let Some(provider_subscription_id) = invoice.subscription.as_deref() else {
            tracing::warn!(
                event_id = %event.id,
                invoice_id = %invoice.id,
                "Payment failure without a subscription reference, skipping"
            );
            return Ok(());
        };

        let Some(existing) = self
            .store
            .find_subscription_by_provider_id(provider_subscription_id)
            .await?
        else {
            tracing::warn!(
                event_id = %event.id,
                provider_subscription_id = %provider_subscription_id,
                "No subscription matches failed invoice, skipping"
            );
            return Ok(());
        };

        if existing.status == SubscriptionStatus::Cancelled {
            tracing::info!(
                event_id = %event.id,
                subscription_id = %existing.id,
                "Ignoring payment failure for already-cancelled subscription"
            );
            return Ok(());
        }

        let Some(sub) = self
            .store
            .transition_subscription(
                provider_subscription_id,
                SubscriptionStatus::PastDue,
                None,
            )
            .await?
        else {
            return Ok(());
        };

        self.activity
            .append(
                ActivityEntry::new(ActivityType::PaymentFailed, &sub.patient_id)
                    .clinic(&sub.clinic_id)
                    .message(format!(
                        "Payment failed for {} subscription",
                        sub.plan_snapshot.name
                    ))
                    .details(serde_json::json!({
                        "plan": sub.plan_snapshot.name,
                        "amount": invoice.amount_due,
                        "providerSubscriptionId": provider_subscription_id,
                    }))
                    .source_event(&event.id),
            )
            .await?;

        tracing::warn!(
            event_id = %event.id,
            subscription_id = %sub.id,
            patient_id = %sub.patient_id,
            "Subscription marked past due after payment failure"
        );

        Ok(())
    }

    async fn handle_subscription_deleted(
        &self,
        event: &ProviderEvent,
        subscription: &SubscriptionPayload,
    ) -> BillingResult<()> {
        let Some(existing) = self
            .store
            .find_subscription_by_provider_id(&subscription.id)
            .await?
        else {
            tracing::warn!(
                event_id = %event.id,
                provider_subscription_id = %subscription.id,
                "No subscription matches cancellation event, skipping"
            );
            return Ok(());
        };

        if existing.status == SubscriptionStatus::Cancelled {
            tracing::info!(
                event_id = %event.id,
                subscription_id = %existing.id,
                "Subscription already cancelled, skipping"
            );
            return Ok(());
        }

        let Some(sub) = self
            .store
            .transition_subscription(
                &subscription.id,
                SubscriptionStatus::Cancelled,
                Some(OffsetDateTime::now_utc()),
            )
            .await?
        else {
            return Ok(());
        };

        self.activity
            .append(
                ActivityEntry::new(ActivityType::SubscriptionCancelled, &sub.patient_id)
                    .clinic(&sub.clinic_id)
                    .message(format!(
                        "{} subscription cancelled",
                        sub.plan_snapshot.name
                    ))
                    .details(serde_json::json!({
                        "plan": sub.plan_snapshot.name,
                        "providerSubscriptionId": subscription.id,
                    }))
                    .source_event(&event.id),
            )
            .await?;

        tracing::info!(
            event_id = %event.id,
            subscription_id = %sub.id,
            "Subscription cancelled"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
        let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        )
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[test]
    fn test_verify_signature_valid() {
        let secret = "whsec_test_secret";
        let payload = r#"{"type":"test"}"#;
        let header = sign(payload, secret, now());
        assert!(verify_signature(payload, &header, secret).is_ok());
    }

    #[test]
    fn test_verify_signature_rejects_wrong_secret() {
        let payload = r#"{"type":"test"}"#;
        let header = sign(payload, "whsec_secret_a", now());
        assert!(matches!(
            verify_signature(payload, &header, "whsec_secret_b"),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_verify_signature_rejects_tampered_body() {
        let secret = "whsec_test_secret";
        let header = sign(r#"{"amount":100}"#, secret, now());
        assert!(matches!(
            verify_signature(r#"{"amount":99999}"#, &header, secret),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_verify_signature_rejects_stale_timestamp() {
        let secret = "whsec_test_secret";
        let payload = r#"{"type":"test"}"#;
        let header = sign(payload, secret, now() - SIGNATURE_TOLERANCE_SECONDS - 1);
        assert!(matches!(
            verify_signature(payload, &header, secret),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_verify_signature_rejects_malformed_header() {
        let result = verify_signature(r#"{}"#, "not-a-signature-header", "whsec_x");
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn test_decode_checkout_completed() {
        let body = r#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1700000000,
            "data": {"object": {
                "id": "cs_1",
                "metadata": {"purpose": "plan_subscription", "patient_id": "p1"},
                "subscription": "sub_1",
                "customer": "cus_1",
                "amount_total": 3000
            }}
        }"#;
        let event = ProviderEvent::decode(body).unwrap();
        assert_eq!(event.id, "evt_1");
        match event.payload {
            EventPayload::CheckoutCompleted(session) => {
                assert_eq!(session.subscription.as_deref(), Some("sub_1"));
                assert_eq!(session.amount_total, Some(3000));
                assert_eq!(
                    session.metadata.get("patient_id").map(String::as_str),
                    Some("p1")
                );
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_decode_expanded_object_references() {
        let body = r#"{
            "id": "evt_2",
            "type": "invoice.payment_failed",
            "data": {"object": {
                "id": "in_1",
                "subscription": {"id": "sub_9", "status": "past_due"},
                "amount_due": 5000
            }}
        }"#;
        let event = ProviderEvent::decode(body).unwrap();
        match event.payload {
            EventPayload::InvoicePaymentFailed(invoice) => {
                assert_eq!(invoice.subscription.as_deref(), Some("sub_9"));
                assert_eq!(invoice.amount_due, Some(5000));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_event_type() {
        let body = r#"{
            "id": "evt_3",
            "type": "customer.tax_id.created",
            "data": {"object": {"id": "txi_1"}}
        }"#;
        let event = ProviderEvent::decode(body).unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::Unknown { ref event_type } if event_type == "customer.tax_id.created"
        ));
    }

    #[test]
    fn test_decode_rejects_malformed_body() {
        assert!(matches!(
            ProviderEvent::decode("not json"),
            Err(BillingError::WebhookPayloadInvalid(_))
        ));
        assert!(matches!(
            ProviderEvent::decode(r#"{"id": "evt", "type": "checkout.session.completed"}"#),
            Err(BillingError::WebhookPayloadInvalid(_))
        ));
    }
}
