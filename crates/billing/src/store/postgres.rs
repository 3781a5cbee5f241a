//! Postgres implementation of the billing store.

use async_trait::async_trait;
use careplan_shared::{AccountRole, ActivityType, BaseFeeStatus, SubscriptionStatus};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::PlanSnapshot;
use crate::error::{BillingError, BillingResult};
use crate::events::ActivityEntry;
use crate::store::{
    BillingStore, ClinicRecord, EventClaim, EventOutcome, NewSubscription, Profile,
    SubscriptionRecord,
};

/// Claims stuck in `processing` longer than this are considered abandoned
/// and may be reclaimed by a redelivery.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ClinicRow {
    clinic_id: String,
    clinic_name: String,
    email: String,
    base_fee_status: String,
    base_fee_subscription_id: Option<String>,
    base_fee_customer_id: Option<String>,
    commission_earned: i64,
    created_at: OffsetDateTime,
}

impl ClinicRow {
    fn into_record(self) -> BillingResult<ClinicRecord> {
        let base_fee_status = BaseFeeStatus::parse(&self.base_fee_status).ok_or_else(|| {
            BillingError::Database(format!(
                "unknown base fee status '{}' for clinic {}",
                self.base_fee_status, self.clinic_id
            ))
        })?;
        Ok(ClinicRecord {
            clinic_id: self.clinic_id,
            clinic_name: self.clinic_name,
            email: self.email,
            base_fee_status,
            base_fee_subscription_id: self.base_fee_subscription_id,
            base_fee_customer_id: self.base_fee_customer_id,
            commission_earned: self.commission_earned,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    patient_id: String,
    clinic_id: String,
    plan_id: String,
    plan_snapshot: serde_json::Value,
    status: String,
    provider_subscription_id: String,
    provider_customer_id: Option<String>,
    started_at: OffsetDateTime,
    ended_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl SubscriptionRow {
    fn into_record(self) -> BillingResult<SubscriptionRecord> {
        let status = SubscriptionStatus::parse(&self.status).ok_or_else(|| {
            BillingError::Database(format!(
                "unknown subscription status '{}' for {}",
                self.status, self.id
            ))
        })?;
        let plan_snapshot: PlanSnapshot =
            serde_json::from_value(self.plan_snapshot).map_err(|e| {
                BillingError::Database(format!("corrupt plan snapshot for {}: {}", self.id, e))
            })?;
        Ok(SubscriptionRecord {
            id: self.id,
            patient_id: self.patient_id,
            clinic_id: self.clinic_id,
            plan_id: self.plan_id,
            plan_snapshot,
            status,
            provider_subscription_id: self.provider_subscription_id,
            provider_customer_id: self.provider_customer_id,
            started_at: self.started_at,
            ended_at: self.ended_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    activity_type: String,
    user_id: String,
    clinic_id: Option<String>,
    message: String,
    details: serde_json::Value,
    source_event_id: Option<String>,
    created_at: OffsetDateTime,
}

impl ActivityRow {
    fn into_entry(self) -> BillingResult<ActivityEntry> {
        let activity_type = ActivityType::parse(&self.activity_type).ok_or_else(|| {
            BillingError::Database(format!(
                "unknown activity type '{}' for {}",
                self.activity_type, self.id
            ))
        })?;
        Ok(ActivityEntry {
            id: self.id,
            activity_type,
            user_id: self.user_id,
            clinic_id: self.clinic_id,
            message: self.message,
            details: self.details,
            source_event_id: self.source_event_id,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn claim_event(&self, event_id: &str, event_type: &str) -> BillingResult<EventClaim> {
        // INSERT...ON CONFLICT...RETURNING so only one concurrent delivery
        // can claim processing rights. Errored and timed-out claims are
        // reclaimable: redelivery after a transient failure must be able
        // to finish the work.
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events
                (provider_event_id, event_type, processing_result, processing_started_at)
            VALUES ($1, $2, 'processing', NOW())
            ON CONFLICT (provider_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = NULL
            WHERE webhook_events.processing_result = 'error'
               OR (webhook_events.processing_result = 'processing'
                   AND webhook_events.processing_started_at < NOW() - ($3 || ' minutes')::INTERVAL)
            RETURNING provider_event_id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        Ok(if claimed.is_some() {
            EventClaim::Claimed
        } else {
            EventClaim::Duplicate
        })
    }

    async fn finish_event(&self, event_id: &str, outcome: &EventOutcome) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processing_result = $1, error_message = $2
            WHERE provider_event_id = $3
            "#,
        )
        .bind(outcome.as_str())
        .bind(outcome.error_message())
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_clinic(&self, clinic_id: &str) -> BillingResult<Option<ClinicRecord>> {
        let row: Option<ClinicRow> = sqlx::query_as(
            r#"
            SELECT clinic_id, clinic_name, email, base_fee_status,
                   base_fee_subscription_id, base_fee_customer_id,
                   commission_earned, created_at
            FROM clinics
            WHERE clinic_id = $1
            "#,
        )
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ClinicRow::into_record).transpose()
    }

    async fn activate_clinic_base_fee(
        &self,
        clinic_id: &str,
        provider_subscription_id: &str,
        provider_customer_id: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE clinics
            SET base_fee_status = 'active',
                base_fee_subscription_id = $2,
                base_fee_customer_id = $3
            WHERE clinic_id = $1
            "#,
        )
        .bind(clinic_id)
        .bind(provider_subscription_id)
        .bind(provider_customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_subscription_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT id, patient_id, clinic_id, plan_id, plan_snapshot, status,
                   provider_subscription_id, provider_customer_id,
                   started_at, ended_at, created_at, updated_at
            FROM subscriptions
            WHERE provider_subscription_id = $1
            "#,
        )
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubscriptionRow::into_record).transpose()
    }

    async fn insert_subscription(&self, sub: NewSubscription) -> BillingResult<SubscriptionRecord> {
        let now = OffsetDateTime::now_utc();
        let record = SubscriptionRecord {
            id: Uuid::new_v4(),
            patient_id: sub.patient_id,
            clinic_id: sub.clinic_id,
            plan_id: sub.plan_snapshot.plan_id.clone(),
            plan_snapshot: sub.plan_snapshot,
            status: SubscriptionStatus::Active,
            provider_subscription_id: sub.provider_subscription_id,
            provider_customer_id: sub.provider_customer_id,
            started_at: now,
            ended_at: None,
            created_at: now,
            updated_at: now,
        };

        let snapshot = serde_json::to_value(&record.plan_snapshot).map_err(|e| {
            BillingError::Database(format!("failed to serialize plan snapshot: {}", e))
        })?;

        // Unique provider_subscription_id makes concurrent settlement of
        // the same checkout a no-op rather than a duplicate row.
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, patient_id, clinic_id, plan_id, plan_snapshot, status,
                provider_subscription_id, provider_customer_id,
                started_at, ended_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL, $10, $10)
            ON CONFLICT (provider_subscription_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.patient_id)
        .bind(&record.clinic_id)
        .bind(&record.plan_id)
        .bind(&snapshot)
        .bind(record.status.as_str())
        .bind(&record.provider_subscription_id)
        .bind(&record.provider_customer_id)
        .bind(record.started_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn transition_subscription(
        &self,
        provider_subscription_id: &str,
        status: SubscriptionStatus,
        ended_at: Option<OffsetDateTime>,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        // Absolute set-to-target keyed by correlation id; ended_at keeps
        // its first value under redelivery.
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = $2,
                ended_at = COALESCE(subscriptions.ended_at, $3),
                updated_at = NOW()
            WHERE provider_subscription_id = $1
            RETURNING id, patient_id, clinic_id, plan_id, plan_snapshot, status,
                      provider_subscription_id, provider_customer_id,
                      started_at, ended_at, created_at, updated_at
            "#,
        )
        .bind(provider_subscription_id)
        .bind(status.as_str())
        .bind(ended_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubscriptionRow::into_record).transpose()
    }

    async fn accrue_commission(
        &self,
        clinic_id: &str,
        amount: i64,
        event_id: &str,
    ) -> BillingResult<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO commission_ledger (provider_event_id, clinic_id, amount)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider_event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(clinic_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            // Already accrued for this event id.
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE clinics
            SET commission_earned = commission_earned + $2
            WHERE clinic_id = $1
            "#,
        )
        .bind(clinic_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn append_activity(&self, entry: ActivityEntry) -> BillingResult<()> {
        // source_event_id is unique (NULLs exempt); replaying an event that
        // already appended its entry is a no-op.
        sqlx::query(
            r#"
            INSERT INTO activity_feed (
                id, activity_type, user_id, clinic_id, message, details,
                source_event_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source_event_id) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.activity_type.as_str())
        .bind(&entry.user_id)
        .bind(&entry.clinic_id)
        .bind(&entry.message)
        .bind(&entry.details)
        .bind(&entry.source_event_id)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_activity(
        &self,
        clinic_id: Option<&str>,
        limit: i64,
    ) -> BillingResult<Vec<ActivityEntry>> {
        let rows: Vec<ActivityRow> = sqlx::query_as(
            r#"
            SELECT id, activity_type, user_id, clinic_id, message, details,
                   source_event_id, created_at
            FROM activity_feed
            WHERE $1::TEXT IS NULL OR clinic_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(clinic_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ActivityRow::into_entry).collect()
    }

    async fn find_profile(&self, account_id: &str) -> BillingResult<Option<Profile>> {
        let row: Option<(String, String, String, OffsetDateTime)> = sqlx::query_as(
            r#"
            SELECT uid, email, role, created_at
            FROM profiles
            WHERE uid = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(uid, email, role, created_at)| {
            let role = AccountRole::parse(&role).ok_or_else(|| {
                BillingError::Database(format!("unknown role '{}' for profile {}", role, uid))
            })?;
            Ok(Profile {
                uid,
                email,
                role,
                created_at,
            })
        })
        .transpose()
    }
}
