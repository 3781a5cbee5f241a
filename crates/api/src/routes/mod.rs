//! HTTP route definitions.

pub mod accounts;
pub mod admin;
pub mod billing;

use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/billing/checkout", post(billing::create_checkout))
        .route(
            "/billing/base-fee/checkout",
            post(billing::create_base_fee_checkout),
        )
        .route("/billing/plans", get(billing::list_plans))
        .route("/webhooks/payments", post(billing::webhook))
        .route(
            "/accounts/{account_id}/profile",
            get(accounts::await_profile),
        )
        .route("/activity", get(accounts::recent_activity))
        .route("/admin/invariants", get(admin::run_invariant_checks))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
