//! Activity feed: append-only audit entries for account and billing
//! lifecycle events, consumed by realtime dashboards.

use std::sync::Arc;

use careplan_shared::ActivityType;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::BillingStore;

/// One audit record. Entries are never mutated or deleted.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub activity_type: ActivityType,
    pub user_id: String,
    pub clinic_id: Option<String>,
    /// Human-readable, display-only. Opaque to the core logic.
    pub message: String,
    pub details: serde_json::Value,
    /// Provider event id that produced this entry. Dedupes appends when
    /// the provider redelivers an event mid-processing.
    pub source_event_id: Option<String>,
    pub created_at: OffsetDateTime,
}

impl ActivityEntry {
    pub fn new(activity_type: ActivityType, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            activity_type,
            user_id: user_id.into(),
            clinic_id: None,
            message: String::new(),
            details: serde_json::json!({}),
            source_event_id: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn clinic(mut self, clinic_id: impl Into<String>) -> Self {
        self.clinic_id = Some(clinic_id.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn source_event(mut self, event_id: impl Into<String>) -> Self {
        self.source_event_id = Some(event_id.into());
        self
    }
}

/// Appends activity entries through the store.
///
/// The reconciler appends exactly one entry per applied transition and
/// none for a skipped one.
#[derive(Clone)]
pub struct ActivityFeedWriter {
    store: Arc<dyn BillingStore>,
}

impl ActivityFeedWriter {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn append(&self, entry: ActivityEntry) -> BillingResult<()> {
        tracing::debug!(
            activity_type = %entry.activity_type,
            user_id = %entry.user_id,
            "Appending activity feed entry"
        );
        self.store.append_activity(entry).await
    }

    /// Recent entries for dashboard views, newest first.
    pub async fn recent(
        &self,
        clinic_id: Option<&str>,
        limit: i64,
    ) -> BillingResult<Vec<ActivityEntry>> {
        self.store.recent_activity(clinic_id, limit).await
    }
}
