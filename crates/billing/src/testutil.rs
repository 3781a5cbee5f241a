//! In-memory `BillingStore` fake shared by the test modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use careplan_shared::{AccountRole, ActivityType, BaseFeeStatus, SubscriptionStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::ActivityEntry;
use crate::store::{
    BillingStore, ClinicRecord, EventClaim, EventOutcome, NewSubscription, Profile,
    SubscriptionRecord,
};

/// Fake store with seed helpers and counters for asserting "zero
/// mutations" style properties.
#[derive(Default)]
pub(crate) struct MemoryStore {
    profiles: Mutex<HashMap<String, Profile>>,
    clinics: Mutex<HashMap<String, ClinicRecord>>,
    subscriptions: Mutex<Vec<SubscriptionRecord>>,
    activity: Mutex<Vec<ActivityEntry>>,
    claims: Mutex<HashMap<String, String>>,
    ledger: Mutex<HashMap<String, (String, i64)>>,
    profile_reads: AtomicU32,
    profile_visible_after: AtomicU32,
    failing_profile_reads: AtomicU32,
    mutations: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_profile(&self, uid: &str, email: &str, role: AccountRole) {
        self.profiles.lock().unwrap().insert(
            uid.to_string(),
            Profile {
                uid: uid.to_string(),
                email: email.to_string(),
                role,
                created_at: OffsetDateTime::now_utc(),
            },
        );
    }

    /// The profile only becomes visible on the Nth read, simulating the
    /// backend trigger lag the poller exists for.
    pub fn set_profile_visible_after_reads(&self, reads: u32) {
        self.profile_visible_after.store(reads, Ordering::SeqCst);
    }

    /// Fail the next N profile reads with a transient error.
    pub fn fail_profile_reads(&self, count: u32) {
        self.failing_profile_reads.store(count, Ordering::SeqCst);
    }

    pub fn profile_reads(&self) -> u32 {
        self.profile_reads.load(Ordering::SeqCst)
    }

    pub fn seed_clinic(&self, clinic_id: &str, clinic_name: &str) {
        self.clinics.lock().unwrap().insert(
            clinic_id.to_string(),
            ClinicRecord {
                clinic_id: clinic_id.to_string(),
                clinic_name: clinic_name.to_string(),
                email: format!("{}@example.com", clinic_id),
                base_fee_status: BaseFeeStatus::Pending,
                base_fee_subscription_id: None,
                base_fee_customer_id: None,
                commission_earned: 0,
                created_at: OffsetDateTime::now_utc(),
            },
        );
    }

    pub fn clinic(&self, clinic_id: &str) -> ClinicRecord {
        self.clinics
            .lock()
            .unwrap()
            .get(clinic_id)
            .cloned()
            .unwrap_or_else(|| panic!("clinic {} not seeded", clinic_id))
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionRecord> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn activity_entries(&self) -> Vec<ActivityEntry> {
        self.activity.lock().unwrap().clone()
    }

    pub fn entries_of_type(&self, activity_type: ActivityType) -> Vec<ActivityEntry> {
        self.activity
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.activity_type == activity_type)
            .cloned()
            .collect()
    }

    /// Domain-record mutations applied (claims and activity excluded).
    pub fn mutation_count(&self) -> u32 {
        self.mutations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn claim_event(&self, event_id: &str, _event_type: &str) -> BillingResult<EventClaim> {
        let mut claims = self.claims.lock().unwrap();
        match claims.get(event_id).map(String::as_str) {
            None | Some("error") => {
                claims.insert(event_id.to_string(), "processing".to_string());
                Ok(EventClaim::Claimed)
            }
            Some(_) => Ok(EventClaim::Duplicate),
        }
    }

    async fn finish_event(&self, event_id: &str, outcome: &EventOutcome) -> BillingResult<()> {
        self.claims
            .lock()
            .unwrap()
            .insert(event_id.to_string(), outcome.as_str().to_string());
        Ok(())
    }

    async fn find_clinic(&self, clinic_id: &str) -> BillingResult<Option<ClinicRecord>> {
        Ok(self.clinics.lock().unwrap().get(clinic_id).cloned())
    }

    async fn activate_clinic_base_fee(
        &self,
        clinic_id: &str,
        provider_subscription_id: &str,
        provider_customer_id: Option<&str>,
    ) -> BillingResult<()> {
        if let Some(clinic) = self.clinics.lock().unwrap().get_mut(clinic_id) {
            clinic.base_fee_status = BaseFeeStatus::Active;
            clinic.base_fee_subscription_id = Some(provider_subscription_id.to_string());
            clinic.base_fee_customer_id = provider_customer_id.map(|s| s.to_string());
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn find_subscription_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.provider_subscription_id == provider_subscription_id)
            .cloned())
    }

    async fn insert_subscription(&self, sub: NewSubscription) -> BillingResult<SubscriptionRecord> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if let Some(existing) = subscriptions
            .iter()
            .find(|s| s.provider_subscription_id == sub.provider_subscription_id)
        {
            return Ok(existing.clone());
        }

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
        subscriptions.push(record.clone());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn transition_subscription(
        &self,
        provider_subscription_id: &str,
        status: SubscriptionStatus,
        ended_at: Option<OffsetDateTime>,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let Some(sub) = subscriptions
            .iter_mut()
            .find(|s| s.provider_subscription_id == provider_subscription_id)
        else {
            return Ok(None);
        };
        sub.status = status;
        sub.ended_at = sub.ended_at.or(ended_at);
        sub.updated_at = OffsetDateTime::now_utc();
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(Some(sub.clone()))
    }

    async fn accrue_commission(
        &self,
        clinic_id: &str,
        amount: i64,
        event_id: &str,
    ) -> BillingResult<bool> {
        let mut ledger = self.ledger.lock().unwrap();
        if ledger.contains_key(event_id) {
            return Ok(false);
        }
        ledger.insert(event_id.to_string(), (clinic_id.to_string(), amount));
        if let Some(clinic) = self.clinics.lock().unwrap().get_mut(clinic_id) {
            clinic.commission_earned += amount;
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn append_activity(&self, entry: ActivityEntry) -> BillingResult<()> {
        let mut activity = self.activity.lock().unwrap();
        if let Some(source) = &entry.source_event_id {
            if activity
                .iter()
                .any(|e| e.source_event_id.as_deref() == Some(source))
            {
                return Ok(());
            }
        }
        activity.push(entry);
        Ok(())
    }

    async fn recent_activity(
        &self,
        clinic_id: Option<&str>,
        limit: i64,
    ) -> BillingResult<Vec<ActivityEntry>> {
        let mut entries: Vec<ActivityEntry> = self
            .activity
            .lock()
            .unwrap()
            .iter()
            .filter(|e| clinic_id.is_none() || e.clinic_id.as_deref() == clinic_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn find_profile(&self, account_id: &str) -> BillingResult<Option<Profile>> {
        let failing = self.failing_profile_reads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_profile_reads
                .store(failing.saturating_sub(1), Ordering::SeqCst);
            return Err(BillingError::Database("injected read failure".to_string()));
        }

        let reads = self.profile_reads.fetch_add(1, Ordering::SeqCst) + 1;
        if reads < self.profile_visible_after.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.profiles.lock().unwrap().get(account_id).cloned())
    }
}
