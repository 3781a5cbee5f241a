//! Billing Invariants Module
//!
//! Provides runnable consistency checks for the billing system.
//! These invariants can be run after any mutation or webhook replay to
//! ensure the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::PlanCatalog;
use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Record(s) affected (patient, clinic, or subscription ids)
    pub subject_ids: Vec<String>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - money may be attributed incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Row type for multiple active subscriptions violation
#[derive(Debug, sqlx::FromRow)]
struct MultipleSubsRow {
    patient_id: String,
    sub_count: i64,
}

/// Row type for cancelled-without-end-date violation
#[derive(Debug, sqlx::FromRow)]
struct CancelledNoEndDateRow {
    sub_id: Uuid,
    patient_id: String,
    status: String,
}

/// Row type for snapshot economics violation
#[derive(Debug, sqlx::FromRow)]
struct SnapshotEconomicsRow {
    sub_id: Uuid,
    patient_id: String,
    price: i64,
    commission: i64,
    company_cut: i64,
}

/// Row type for commission/ledger mismatch violation
#[derive(Debug, sqlx::FromRow)]
struct CommissionMismatchRow {
    clinic_id: String,
    clinic_name: String,
    commission_earned: i64,
    ledger_total: i64,
}

/// Row type for active base fee missing provider ids violation
#[derive(Debug, sqlx::FromRow)]
struct BaseFeeNoProviderRow {
    clinic_id: String,
    clinic_name: String,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_active_subscription().await?);
        violations.extend(self.check_cancelled_has_end_date().await?);
        violations.extend(self.check_snapshot_economics().await?);
        violations.extend(self.check_commission_matches_ledger().await?);
        violations.extend(self.check_active_base_fee_has_provider_ids().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most 1 active subscription per patient
    ///
    /// Dashboards assume a patient has a single active enrollment; two
    /// would double-bill and confuse commission attribution.
    async fn check_single_active_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleSubsRow> = sqlx::query_as(
            r#"
            SELECT patient_id, COUNT(*) as sub_count
            FROM subscriptions
            WHERE status IN ('active', 'past_due')
            GROUP BY patient_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_subscription".to_string(),
                subject_ids: vec![row.patient_id.clone()],
                description: format!(
                    "Patient has {} active subscriptions (expected 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "patient_id": row.patient_id,
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Cancelled subscriptions have an end date
    ///
    /// A cancelled subscription without `ended_at` cannot be placed in
    /// billing history.
    async fn check_cancelled_has_end_date(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CancelledNoEndDateRow> = sqlx::query_as(
            r#"
            SELECT id as sub_id, patient_id, status
            FROM subscriptions
            WHERE status = 'cancelled'
              AND ended_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "cancelled_has_end_date".to_string(),
                subject_ids: vec![row.sub_id.to_string()],
                description: "Cancelled subscription has no end date".to_string(),
                context: serde_json::json!({
                    "subscription_id": row.sub_id,
                    "patient_id": row.patient_id,
                    "status": row.status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: Stored plan snapshots have consistent economics
    ///
    /// `commission + company_cut == price` holds by construction in the
    /// catalog; a stored snapshot violating it means corrupted data.
    async fn check_snapshot_economics(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<SnapshotEconomicsRow> = sqlx::query_as(
            r#"
            SELECT
                id as sub_id,
                patient_id,
                (plan_snapshot->>'price')::BIGINT as price,
                (plan_snapshot->>'commission')::BIGINT as commission,
                (plan_snapshot->>'company_cut')::BIGINT as company_cut
            FROM subscriptions
            WHERE (plan_snapshot->>'commission')::BIGINT
                  + (plan_snapshot->>'company_cut')::BIGINT
                  != (plan_snapshot->>'price')::BIGINT
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "snapshot_economics".to_string(),
                subject_ids: vec![row.sub_id.to_string()],
                description: format!(
                    "Plan snapshot economics do not sum: {} + {} != {}",
                    row.commission, row.company_cut, row.price
                ),
                context: serde_json::json!({
                    "subscription_id": row.sub_id,
                    "patient_id": row.patient_id,
                    "price": row.price,
                    "commission": row.commission,
                    "company_cut": row.company_cut,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 4: Clinic commission totals match the ledger
    ///
    /// `commission_earned` is only incremented through the event-keyed
    /// ledger; a mismatch means an accrual bypassed deduplication.
    async fn check_commission_matches_ledger(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CommissionMismatchRow> = sqlx::query_as(
            r#"
            SELECT
                c.clinic_id,
                c.clinic_name,
                c.commission_earned,
                COALESCE(l.total, 0) as ledger_total
            FROM clinics c
            LEFT JOIN (
                SELECT clinic_id, SUM(amount) as total
                FROM commission_ledger
                GROUP BY clinic_id
            ) l ON l.clinic_id = c.clinic_id
            WHERE c.commission_earned != COALESCE(l.total, 0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "commission_matches_ledger".to_string(),
                subject_ids: vec![row.clinic_id.clone()],
                description: format!(
                    "Clinic '{}' commission total {} does not match ledger sum {}",
                    row.clinic_name, row.commission_earned, row.ledger_total
                ),
                context: serde_json::json!({
                    "clinic_id": row.clinic_id,
                    "commission_earned": row.commission_earned,
                    "ledger_total": row.ledger_total,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 5: Active base fees carry provider ids
    ///
    /// An active base fee without its provider subscription id cannot be
    /// correlated with future invoice events.
    async fn check_active_base_fee_has_provider_ids(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<BaseFeeNoProviderRow> = sqlx::query_as(
            r#"
            SELECT clinic_id, clinic_name
            FROM clinics
            WHERE base_fee_status = 'active'
              AND base_fee_subscription_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_base_fee_has_provider_ids".to_string(),
                subject_ids: vec![row.clinic_id.clone()],
                description: format!(
                    "Clinic '{}' has an active base fee with no provider subscription id",
                    row.clinic_name
                ),
                context: serde_json::json!({
                    "clinic_id": row.clinic_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_active_subscription" => self.check_single_active_subscription().await,
            "cancelled_has_end_date" => self.check_cancelled_has_end_date().await,
            "snapshot_economics" => self.check_snapshot_economics().await,
            "commission_matches_ledger" => self.check_commission_matches_ledger().await,
            "active_base_fee_has_provider_ids" => {
                self.check_active_base_fee_has_provider_ids().await
            }
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_active_subscription",
            "cancelled_has_end_date",
            "snapshot_economics",
            "commission_matches_ledger",
            "active_base_fee_has_provider_ids",
        ]
    }

    /// Pure catalog check: every plan's economics must sum to its price.
    /// Needs no database; runs against the in-memory catalog.
    pub fn check_catalog(catalog: &PlanCatalog) -> Vec<InvariantViolation> {
        catalog
            .all_plans()
            .iter()
            .filter(|p| p.commission + p.company_cut != p.price)
            .map(|p| InvariantViolation {
                invariant: "catalog_economics".to_string(),
                subject_ids: vec![p.id.clone()],
                description: format!(
                    "Plan '{}' economics do not sum: {} + {} != {}",
                    p.id, p.commission, p.company_cut, p.price
                ),
                context: serde_json::json!({
                    "plan_id": p.id,
                    "price": p.price,
                    "commission": p.commission,
                    "company_cut": p.company_cut,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect()
    }
}
