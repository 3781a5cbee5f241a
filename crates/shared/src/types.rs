//! Closed domain enums, stored as TEXT columns.
//!
//! Every enum round-trips through `as_str`/`parse` so database values stay
//! human-readable and new variants are an explicit schema decision.

use serde::{Deserialize, Serialize};

/// Role of an account principal. Exactly one per account, immutable after
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Patient,
    Clinic,
    Admin,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Patient => "patient",
            AccountRole::Clinic => "clinic",
            AccountRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "patient" => Some(AccountRole::Patient),
            "clinic" => Some(AccountRole::Clinic),
            "admin" => Some(AccountRole::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a patient's plan enrollment. Rows are never deleted;
/// cancellation is a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Clinic base-fee billing state. Mutated only by the webhook reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseFeeStatus {
    Pending,
    Active,
    Unpaid,
    Suspended,
}

impl BaseFeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseFeeStatus::Pending => "pending",
            BaseFeeStatus::Active => "active",
            BaseFeeStatus::Unpaid => "unpaid",
            BaseFeeStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BaseFeeStatus::Pending),
            "active" => Some(BaseFeeStatus::Active),
            "unpaid" => Some(BaseFeeStatus::Unpaid),
            "suspended" => Some(BaseFeeStatus::Suspended),
            _ => None,
        }
    }
}

impl std::fmt::Display for BaseFeeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Catalog entries are never deleted, only deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Inactive,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Inactive => "inactive",
        }
    }
}

/// Activity feed entry kinds. The feed is append-only; dashboards consume
/// it in timestamp order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    NewSignup,
    PaymentSuccess,
    PaymentFailed,
    BaseFeePaid,
    SubscriptionCancelled,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::NewSignup => "new_signup",
            ActivityType::PaymentSuccess => "payment_success",
            ActivityType::PaymentFailed => "payment_failed",
            ActivityType::BaseFeePaid => "base_fee_paid",
            ActivityType::SubscriptionCancelled => "subscription_cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new_signup" => Some(ActivityType::NewSignup),
            "payment_success" => Some(ActivityType::PaymentSuccess),
            "payment_failed" => Some(ActivityType::PaymentFailed),
            "base_fee_paid" => Some(ActivityType::BaseFeePaid),
            "subscription_cancelled" => Some(ActivityType::SubscriptionCancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_status_round_trip() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Cancelled,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SubscriptionStatus::parse("canceled"), None);
    }

    #[test]
    fn test_base_fee_status_round_trip() {
        for status in [
            BaseFeeStatus::Pending,
            BaseFeeStatus::Active,
            BaseFeeStatus::Unpaid,
            BaseFeeStatus::Suspended,
        ] {
            assert_eq!(BaseFeeStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_activity_type_round_trip() {
        for ty in [
            ActivityType::NewSignup,
            ActivityType::PaymentSuccess,
            ActivityType::PaymentFailed,
            ActivityType::BaseFeePaid,
            ActivityType::SubscriptionCancelled,
        ] {
            assert_eq!(ActivityType::parse(ty.as_str()), Some(ty));
        }
    }

    #[test]
    fn test_role_parse_rejects_unknown() {
        assert_eq!(AccountRole::parse("superuser"), None);
        assert_eq!(AccountRole::parse("clinic"), Some(AccountRole::Clinic));
    }
}
