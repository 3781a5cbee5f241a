//! Care plan catalog.
//!
//! The catalog is immutable at runtime; plan edits happen in admin tooling
//! and roll out as a configuration change. The webhook reconciler resolves
//! completed checkouts against it by provider price id.

use careplan_shared::PlanStatus;
use serde::{Deserialize, Serialize};

use crate::client::PriceIds;

/// A subscription tier as sold to patients.
///
/// `commission` is the amount routed to the clinic; the platform keeps
/// `company_cut`. The constructor derives `company_cut` from `price`, so
/// `commission + company_cut == price` holds for every plan ever built.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    /// Amount in the smallest currency unit.
    pub price: i64,
    pub commission: i64,
    pub company_cut: i64,
    pub provider_price_id: String,
    pub features: Vec<String>,
    pub status: PlanStatus,
}

impl Plan {
    fn new(
        id: &str,
        name: &str,
        price: i64,
        commission: i64,
        provider_price_id: &str,
        features: &[&str],
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            price,
            commission,
            company_cut: price - commission,
            provider_price_id: provider_price_id.to_string(),
            features: features.iter().map(|f| f.to_string()).collect(),
            status: PlanStatus::Active,
        }
    }

    /// Basic plan: monthly checkup review and chat consultations.
    pub fn basic(price_id: &str) -> Self {
        Plan::new(
            "basic",
            "Basic Care",
            3_000,
            2_000,
            price_id,
            &["Monthly checkup review", "Chat consultations"],
        )
    }

    /// Standard plan: adds video consultations and a quarterly care review.
    pub fn standard(price_id: &str) -> Self {
        Plan::new(
            "standard",
            "Standard Care",
            5_000,
            3_500,
            price_id,
            &[
                "Monthly checkup review",
                "Chat consultations",
                "Video consultations",
                "Quarterly care review",
            ],
        )
    }

    /// Premium plan: priority scheduling and a dedicated care coordinator.
    pub fn premium(price_id: &str) -> Self {
        Plan::new(
            "premium",
            "Premium Care",
            8_000,
            6_000,
            price_id,
            &[
                "Monthly checkup review",
                "Chat consultations",
                "Video consultations",
                "Quarterly care review",
                "Priority scheduling",
                "Dedicated care coordinator",
            ],
        )
    }

    /// Capture the economics of this plan for a new subscription.
    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            plan_id: self.id.clone(),
            name: self.name.clone(),
            price: self.price,
            commission: self.commission,
            company_cut: self.company_cut,
        }
    }
}

/// Denormalized copy of a plan's economics, captured when a subscription is
/// created. Historical commission math stays correct regardless of later
/// catalog edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub plan_id: String,
    pub name: String,
    pub price: i64,
    pub commission: i64,
    pub company_cut: i64,
}

/// The full plan catalog.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self { plans }
    }

    /// Standard three-tier catalog with price ids from configuration.
    pub fn with_price_ids(price_ids: &PriceIds) -> Self {
        Self::new(vec![
            Plan::basic(&price_ids.basic),
            Plan::standard(&price_ids.standard),
            Plan::premium(&price_ids.premium),
        ])
    }

    /// Resolve which plan a completed checkout corresponds to.
    ///
    /// Matches inactive plans too: a checkout started before a plan was
    /// deactivated must still settle.
    pub fn find_by_provider_price_id(&self, price_id: &str) -> Option<&Plan> {
        self.plans
            .iter()
            .find(|p| p.provider_price_id == price_id)
    }

    pub fn find_by_id(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    /// Plans currently offered for new signups.
    pub fn active_plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans
            .iter()
            .filter(|p| p.status == PlanStatus::Active)
    }

    pub fn all_plans(&self) -> &[Plan] {
        &self.plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_price_ids() -> PriceIds {
        PriceIds {
            basic: "price_basic".into(),
            standard: "price_standard".into(),
            premium: "price_premium".into(),
            clinic_base_fee: "price_base_fee".into(),
        }
    }

    // =========================================================================
    // For all plans P: P.commission + P.company_cut == P.price
    // =========================================================================
    #[test]
    fn test_plan_economics_sum_to_price() {
        let catalog = PlanCatalog::with_price_ids(&test_price_ids());
        for plan in catalog.all_plans() {
            assert_eq!(
                plan.commission + plan.company_cut,
                plan.price,
                "plan {} economics must sum to price",
                plan.id
            );
        }
    }

    #[test]
    fn test_snapshot_preserves_economics() {
        let plan = Plan::basic("price_basic");
        let snap = plan.snapshot();
        assert_eq!(snap.price, 3_000);
        assert_eq!(snap.commission, 2_000);
        assert_eq!(snap.company_cut, 1_000);
        assert_eq!(snap.plan_id, "basic");
    }

    #[test]
    fn test_find_by_provider_price_id() {
        let catalog = PlanCatalog::with_price_ids(&test_price_ids());
        let plan = catalog.find_by_provider_price_id("price_standard");
        assert_eq!(plan.map(|p| p.id.as_str()), Some("standard"));
        assert!(catalog.find_by_provider_price_id("price_unknown").is_none());
    }

    #[test]
    fn test_inactive_plans_still_resolve_but_are_not_listed() {
        let mut plan = Plan::basic("price_basic");
        plan.status = PlanStatus::Inactive;
        let catalog = PlanCatalog::new(vec![plan]);

        assert!(catalog.find_by_provider_price_id("price_basic").is_some());
        assert_eq!(catalog.active_plans().count(), 0);
    }
}
