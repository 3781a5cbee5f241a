//! Billing error taxonomy.
//!
//! The split that matters operationally is permanent vs transient:
//! permanent failures (bad signature, bad input, correlation misses) must
//! be acknowledged so the provider stops redelivering, while transient
//! failures (datastore, provider API) must surface as retryable so the
//! provider's retry machinery or the user tries again.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Webhook signature did not verify against the raw body. The event
    /// never reaches the dispatch logic.
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// Body passed signature verification but could not be decoded.
    #[error("malformed webhook payload: {0}")]
    WebhookPayloadInvalid(String),

    /// Caller-supplied field missing or empty.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Profile document never appeared within the polling budget. Distinct
    /// from a plain miss or a read error: the caller should retry later.
    #[error("profile for account {account_id} not found after {attempts} attempts")]
    ProfileNotFoundAfterRetries { account_id: String, attempts: u32 },

    /// Payment provider API failure. Transient from the caller's view.
    #[error("payment provider error: {0}")]
    Provider(String),

    /// Datastore failure. Transient; webhook deliveries should be retried.
    #[error("database error: {0}")]
    Database(String),

    /// Missing or malformed environment configuration. Startup only.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// Whether the provider (or a user) should retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Database(_) | BillingError::Provider(_))
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::Provider(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_split() {
        assert!(BillingError::Database("down".into()).is_retryable());
        assert!(!BillingError::WebhookSignatureInvalid.is_retryable());
        assert!(!BillingError::InvalidInput("email".into()).is_retryable());
        assert!(!BillingError::ProfileNotFoundAfterRetries {
            account_id: "u1".into(),
            attempts: 5
        }
        .is_retryable());
    }
}
