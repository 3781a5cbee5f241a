//! Admin operations: billing consistency checks.

use axum::extract::State;
use axum::Json;
use careplan_billing::{InvariantCheckSummary, InvariantChecker};

use crate::error::ApiError;
use crate::state::AppState;

/// Run all billing invariant checks and report violations.
///
/// Read-only; safe to run after any webhook replay or admin edit.
pub async fn run_invariant_checks(
    State(state): State<AppState>,
) -> Result<Json<InvariantCheckSummary>, ApiError> {
    let checker = InvariantChecker::new(state.pool.clone());
    let mut summary = checker.run_all_checks().await.map_err(|e| {
        tracing::error!(error = %e, "Invariant checks failed to run");
        ApiError::from(e)
    })?;

    // The catalog check is pure and needs no database.
    if let Some(billing) = state.billing.as_ref() {
        let catalog_violations = InvariantChecker::check_catalog(&billing.catalog);
        summary.checks_run += 1;
        if catalog_violations.is_empty() {
            summary.checks_passed += 1;
        } else {
            summary.checks_failed += 1;
            summary.violations.extend(catalog_violations);
            summary.healthy = false;
        }
    }

    Ok(Json(summary))
}
