//! Profile read-after-write polling.
//!
//! Account creation triggers an asynchronous backend process that
//! materializes the profile document; callers cannot proceed (role lookup,
//! post-signup redirect) until it exists. This module polls with a bounded,
//! injectable retry policy instead of assuming read-after-write
//! consistency.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, Profile};

/// Bounded fixed-interval retry policy. Injectable so tests run with
/// near-zero delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Read `PROFILE_POLL_ATTEMPTS` / `PROFILE_POLL_DELAY_MS`, falling
    /// back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_attempts = std::env::var("PROFILE_POLL_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_attempts);
        let delay = std::env::var("PROFILE_POLL_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.delay);
        Self {
            max_attempts,
            delay,
        }
    }
}

enum PollError {
    Missing,
    Read(BillingError),
}

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn BillingStore>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Wait for an account's profile document to appear.
    ///
    /// Individual read errors are logged and retried so one transient
    /// failure does not abort the whole wait. Exhausting the budget with
    /// the profile still missing yields `ProfileNotFoundAfterRetries`;
    /// exhausting it on a read error yields that error instead, so callers
    /// can tell "not materialized yet" apart from "datastore down".
    pub async fn await_profile(
        &self,
        account_id: &str,
        policy: RetryPolicy,
    ) -> BillingResult<Profile> {
        let max_attempts = policy.max_attempts.max(1);
        let strategy = FixedInterval::new(policy.delay).take(max_attempts as usize - 1);
        let attempts = AtomicU32::new(0);

        let result = Retry::spawn(strategy, || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                match self.store.find_profile(account_id).await {
                    Ok(Some(profile)) => Ok(profile),
                    Ok(None) => {
                        tracing::debug!(
                            account_id = %account_id,
                            attempt = attempt,
                            max_attempts = max_attempts,
                            "Profile not materialized yet"
                        );
                        Err(PollError::Missing)
                    }
                    Err(e) => {
                        tracing::warn!(
                            account_id = %account_id,
                            attempt = attempt,
                            error = %e,
                            "Profile read failed, will retry"
                        );
                        Err(PollError::Read(e))
                    }
                }
            }
        })
        .await;

        match result {
            Ok(profile) => {
                tracing::debug!(
                    account_id = %account_id,
                    attempts = attempts.load(Ordering::Relaxed),
                    "Profile found"
                );
                Ok(profile)
            }
            Err(PollError::Missing) => Err(BillingError::ProfileNotFoundAfterRetries {
                account_id: account_id.to_string(),
                attempts: attempts.load(Ordering::Relaxed),
            }),
            Err(PollError::Read(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryStore;
    use careplan_shared::AccountRole;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(10))
    }

    // =========================================================================
    // Profile appears only on the 3rd read - must not fail on attempts 1-2
    // =========================================================================
    #[tokio::test]
    async fn test_await_profile_succeeds_on_third_read() {
        let store = Arc::new(MemoryStore::new());
        store.seed_profile("u1", "u1@example.com", AccountRole::Patient);
        store.set_profile_visible_after_reads(3);

        let service = ProfileService::new(store.clone());
        let profile = service.await_profile("u1", fast(3)).await.unwrap();

        assert_eq!(profile.uid, "u1");
        assert_eq!(store.profile_reads(), 3);
    }

    // =========================================================================
    // Profile never appears - distinct error after exactly max_attempts reads
    // =========================================================================
    #[tokio::test]
    async fn test_await_profile_fails_after_exact_attempts() {
        let store = Arc::new(MemoryStore::new());

        let service = ProfileService::new(store.clone());
        let result = service.await_profile("u2", fast(2)).await;

        match result {
            Err(BillingError::ProfileNotFoundAfterRetries {
                account_id,
                attempts,
            }) => {
                assert_eq!(account_id, "u2");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected ProfileNotFoundAfterRetries, got {:?}", other.err()),
        }
        assert_eq!(store.profile_reads(), 2);
    }

    // =========================================================================
    // A transient read error mid-poll is retried, not fatal
    // =========================================================================
    #[tokio::test]
    async fn test_await_profile_retries_past_read_errors() {
        let store = Arc::new(MemoryStore::new());
        store.seed_profile("u3", "u3@example.com", AccountRole::Clinic);
        store.fail_profile_reads(1);

        let service = ProfileService::new(store.clone());
        let profile = service.await_profile("u3", fast(3)).await.unwrap();

        assert_eq!(profile.role, AccountRole::Clinic);
    }

    // =========================================================================
    // Exhaustion on a read error surfaces the transient error, not NotFound
    // =========================================================================
    #[tokio::test]
    async fn test_await_profile_surfaces_persistent_read_failure() {
        let store = Arc::new(MemoryStore::new());
        store.fail_profile_reads(u32::MAX);

        let service = ProfileService::new(store.clone());
        let result = service.await_profile("u4", fast(2)).await;

        assert!(matches!(result, Err(BillingError::Database(_))));
    }
}
