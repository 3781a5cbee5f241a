//! Hosted checkout session creation.
//!
//! Two flows share the same shape: a patient subscribing to a care plan,
//! and a clinic paying its recurring base fee. Both return a redirect URL
//! for the caller's UI and tag the session with the metadata the webhook
//! reconciler later branches on.

use std::collections::HashMap;

use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Metadata keys carried on checkout sessions. The reconciler reads these
/// back verbatim at settlement time; they are the only correlation channel
/// between checkout and webhook delivery.
pub const META_PURPOSE: &str = "purpose";
pub const META_ACCOUNT_ID: &str = "account_id";
pub const META_PATIENT_ID: &str = "patient_id";
pub const META_CLINIC_ID: &str = "clinic_id";
pub const META_PRICE_ID: &str = "price_id";

pub const PURPOSE_PLAN_SUBSCRIPTION: &str = "plan_subscription";
pub const PURPOSE_CLINIC_BASE_FEE: &str = "clinic_base_fee";

/// Request to start a patient plan checkout.
#[derive(Debug, Clone)]
pub struct PlanCheckoutRequest {
    pub price_id: String,
    pub payer_email: String,
    pub patient_id: String,
    /// The patient's registered clinic, threaded through metadata so the
    /// reconciler creates the subscription against the right clinic.
    pub clinic_id: String,
}

/// Redirect URL for the hosted checkout page.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Clone)]
pub struct CheckoutService {
    stripe: StripeClient,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Create a hosted checkout session for a patient plan subscription.
    ///
    /// Not retried on provider failure: checkout creation is not safe to
    /// blindly retry without provider-side deduplication.
    pub async fn create_plan_checkout(
        &self,
        req: PlanCheckoutRequest,
    ) -> BillingResult<CheckoutResponse> {
        require_field("priceId", &req.price_id)?;
        require_field("email", &req.payer_email)?;
        require_field("patientId", &req.patient_id)?;
        require_field("clinicId", &req.clinic_id)?;

        let metadata = HashMap::from([
            (META_PURPOSE.to_string(), PURPOSE_PLAN_SUBSCRIPTION.to_string()),
            (META_PATIENT_ID.to_string(), req.patient_id.clone()),
            (META_CLINIC_ID.to_string(), req.clinic_id.clone()),
            (META_PRICE_ID.to_string(), req.price_id.clone()),
        ]);

        let url = self
            .create_session(&req.price_id, &req.payer_email, metadata)
            .await?;

        tracing::info!(
            patient_id = %req.patient_id,
            clinic_id = %req.clinic_id,
            price_id = %req.price_id,
            "Plan checkout session created"
        );

        Ok(CheckoutResponse { url })
    }

    /// Create a hosted checkout session for the flat recurring clinic base
    /// fee. The `clinic_base_fee` purpose tag is the reconciler's only
    /// signal to distinguish this from a patient plan at settlement time.
    pub async fn create_base_fee_checkout(
        &self,
        account_email: &str,
        account_id: &str,
    ) -> BillingResult<CheckoutResponse> {
        require_field("email", account_email)?;
        require_field("userId", account_id)?;

        let price_id = self.stripe.config().price_ids.clinic_base_fee.clone();
        let metadata = HashMap::from([
            (META_PURPOSE.to_string(), PURPOSE_CLINIC_BASE_FEE.to_string()),
            (META_ACCOUNT_ID.to_string(), account_id.to_string()),
        ]);

        let url = self
            .create_session(&price_id, account_email, metadata)
            .await?;

        tracing::info!(account_id = %account_id, "Base fee checkout session created");

        Ok(CheckoutResponse { url })
    }

    async fn create_session(
        &self,
        price_id: &str,
        email: &str,
        metadata: HashMap<String, String>,
    ) -> BillingResult<String> {
        let config = self.stripe.config();

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer_email = Some(email);
        params.success_url = Some(&config.success_url);
        params.cancel_url = Some(&config.cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(metadata);

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        session
            .url
            .ok_or_else(|| BillingError::Provider("checkout session returned no URL".to_string()))
    }
}

fn require_field(name: &str, value: &str) -> BillingResult<()> {
    if value.trim().is_empty() {
        return Err(BillingError::InvalidInput(format!("{} is required", name)));
    }
    Ok(())
}
