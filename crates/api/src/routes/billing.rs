//! Billing routes: checkout initiation, plan listing, and the payment
//! provider webhook endpoint.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use careplan_billing::PlanCheckoutRequest;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Request to create a plan checkout session.
///
/// Fields default to empty so missing-field validation happens in one
/// place and answers 400 rather than a serde rejection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    pub price_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub patient_id: String,
    #[serde(default)]
    pub clinic_id: String,
}

/// Request to create a clinic base fee checkout session.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBaseFeeCheckoutRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub user_id: String,
}

/// Response from creating a checkout session.
#[derive(Debug, Serialize)]
pub struct CheckoutUrlResponse {
    pub url: String,
}

/// Webhook acknowledgement body.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Catalog entry as shown on the pricing page.
#[derive(Debug, Serialize)]
pub struct PlanInfo {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub features: Vec<String>,
}

/// Create a hosted checkout session for a patient plan subscription
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutUrlResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let response = billing
        .checkout
        .create_plan_checkout(PlanCheckoutRequest {
            price_id: req.price_id,
            payer_email: req.email,
            patient_id: req.patient_id,
            clinic_id: req.clinic_id,
        })
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Plan checkout creation failed");
            ApiError::from(e)
        })?;

    Ok(Json(CheckoutUrlResponse { url: response.url }))
}

/// Create a hosted checkout session for the clinic base fee
pub async fn create_base_fee_checkout(
    State(state): State<AppState>,
    Json(req): Json<CreateBaseFeeCheckoutRequest>,
) -> Result<Json<CheckoutUrlResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let response = billing
        .checkout
        .create_base_fee_checkout(&req.email, &req.user_id)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Base fee checkout creation failed");
            ApiError::from(e)
        })?;

    Ok(Json(CheckoutUrlResponse { url: response.url }))
}

/// List plans currently offered for new signups
pub async fn list_plans(
    State(state): State<AppState>,
) -> Result<Json<Vec<PlanInfo>>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let plans = billing
        .catalog
        .active_plans()
        .map(|p| PlanInfo {
            id: p.id.clone(),
            name: p.name.clone(),
            price: p.price,
            features: p.features.clone(),
        })
        .collect();

    Ok(Json(plans))
}

/// Handle payment provider webhook events
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, ApiError> {
    tracing::info!(body_len = body.len(), "Payment webhook received");

    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Payment webhook missing signature header");
            ApiError::BadRequest("Missing signature header".to_string())
        })?;

    // Signature check happens before any body parsing; a forged event
    // never reaches the reconciler.
    let event = billing.reconciler.verify_event(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Payment webhook rejected at verification");
        ApiError::from(e)
    })?;

    billing.reconciler.handle_event(event).await.map_err(|e| {
        if e.is_retryable() {
            // 5xx asks the provider to redeliver.
            tracing::error!(error = %e, "Transient webhook failure, requesting redelivery");
            ApiError::ServiceUnavailable
        } else {
            tracing::error!(error = %e, "Webhook handling error");
            ApiError::from(e)
        }
    })?;

    Ok(Json(WebhookAck { received: true }))
}
