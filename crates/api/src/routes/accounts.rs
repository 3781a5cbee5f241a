//! Account routes: post-signup profile polling and the activity feed.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub uid: String,
    pub email: String,
    pub role: String,
    pub created_at: String,
}

/// Wait for an account's profile document to materialize.
///
/// Account creation triggers an asynchronous backend process; this
/// endpoint polls with the configured budget so the UI can learn the
/// account's role right after signup.
pub async fn await_profile(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let profile = billing
        .profiles
        .await_profile(&account_id, state.config.profile_poll)
        .await
        .map_err(|e| {
            tracing::warn!(account_id = %account_id, error = %e, "Profile wait failed");
            ApiError::from(e)
        })?;

    Ok(Json(ProfileResponse {
        uid: profile.uid,
        email: profile.email,
        role: profile.role.to_string(),
        created_at: profile
            .created_at
            .format(&Rfc3339)
            .unwrap_or_default(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuery {
    pub clinic_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntryResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub user_id: String,
    pub clinic_id: Option<String>,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp: String,
}

/// Recent activity feed entries for dashboard views, newest first
pub async fn recent_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityEntryResponse>>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let entries = billing
        .activity
        .recent(query.clinic_id.as_deref(), limit)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Activity feed query failed");
            ApiError::from(e)
        })?;

    Ok(Json(
        entries
            .into_iter()
            .map(|e| ActivityEntryResponse {
                id: e.id.to_string(),
                activity_type: e.activity_type.to_string(),
                user_id: e.user_id,
                clinic_id: e.clinic_id,
                message: e.message,
                details: e.details,
                timestamp: e.created_at.format(&Rfc3339).unwrap_or_default(),
            })
            .collect(),
    ))
}
