//! Usage sync between group state and the billing processor.

use super::{find_subscription_item, BillingError, BillingProvider};
use crate::types::{SubscriptionItem, SubscriptionStatus, UsageKind};

/// How a usage change maps onto the processor-side quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageAction {
    /// Report the quantity as-is.
    Create,
    /// Add the quantity on top of the last reported value.
    Update,
    /// Subtract the quantity, clamped at zero. A no-op when nothing has
    /// been reported yet.
    Delete,
}

impl UsageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageAction::Create => "create",
            UsageAction::Update => "update",
            UsageAction::Delete => "delete",
        }
    }
}

/// One usage change to report against a subscriber's items.
#[derive(Debug, Clone)]
pub struct UsageReport<'a> {
    pub tier_id: &'a str,
    pub subscription_status: SubscriptionStatus,
    pub subscription_items: &'a [SubscriptionItem],
    pub kind: UsageKind,
    pub action: UsageAction,
    /// Caller-chosen key, typically the id of the document that changed.
    pub idempotency_key: &'a str,
    pub quantity: i64,
}

/// Report a usage change. Free-tier subscribers and subscriptions that are
/// not currently active are skipped entirely.
pub async fn report_usage(
    billing: &dyn BillingProvider,
    free_tier_id: &str,
    report: UsageReport<'_>,
) -> Result<(), BillingError> {
    if report.tier_id == free_tier_id
        || report.subscription_status != SubscriptionStatus::Active
    {
        return Ok(());
    }
    let item = find_subscription_item(report.subscription_items, report.kind)?;
    let key = format!("{}_{}{}", report.action.as_str(), item.item_id, report.idempotency_key);

    let quantity = match report.action {
        UsageAction::Create => report.quantity,
        UsageAction::Update => billing.last_usage(&item.item_id).await? + report.quantity,
        UsageAction::Delete => {
            let last = billing.last_usage(&item.item_id).await?;
            if last == 0 {
                return Ok(());
            }
            (last - report.quantity).max(0)
        }
    };
    billing.set_usage(&item.item_id, quantity, &key).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::RecordingBilling;

    fn items() -> Vec<SubscriptionItem> {
        vec![SubscriptionItem {
            item_id: "si_section".to_string(),
            price_id: "price_section".to_string(),
            kind: Some(UsageKind::Section),
        }]
    }

    fn report<'a>(
        items: &'a [SubscriptionItem],
        action: UsageAction,
        quantity: i64,
    ) -> UsageReport<'a> {
        UsageReport {
            tier_id: "pro",
            subscription_status: SubscriptionStatus::Active,
            subscription_items: items,
            kind: UsageKind::Section,
            action,
            idempotency_key: "doc1",
            quantity,
        }
    }

    #[tokio::test]
    async fn update_adds_on_top_of_last_usage() {
        let billing = RecordingBilling::new();
        let items = items();
        report_usage(&billing, "free", report(&items, UsageAction::Create, 3)).await.unwrap();
        report_usage(&billing, "free", report(&items, UsageAction::Update, 2)).await.unwrap();
        assert_eq!(billing.usage_total("si_section").await, 5);
    }

    #[tokio::test]
    async fn delete_clamps_at_zero_and_skips_untouched_items() {
        let billing = RecordingBilling::new();
        let items = items();
        // nothing reported yet: delete must not write a record
        report_usage(&billing, "free", report(&items, UsageAction::Delete, 4)).await.unwrap();
        assert_eq!(billing.usage_events("si_section").await, 0);

        report_usage(&billing, "free", report(&items, UsageAction::Create, 2)).await.unwrap();
        report_usage(&billing, "free", report(&items, UsageAction::Delete, 5)).await.unwrap();
        assert_eq!(billing.usage_total("si_section").await, 0);
    }

    #[tokio::test]
    async fn free_tier_and_inactive_subscriptions_are_skipped() {
        let billing = RecordingBilling::new();
        let items = items();

        let mut free = report(&items, UsageAction::Create, 1);
        free.tier_id = "free";
        report_usage(&billing, "free", free).await.unwrap();

        let mut lapsed = report(&items, UsageAction::Create, 1);
        lapsed.subscription_status = SubscriptionStatus::Canceled;
        report_usage(&billing, "free", lapsed).await.unwrap();

        assert_eq!(billing.usage_events("si_section").await, 0);
    }

    #[tokio::test]
    async fn repeated_idempotency_key_writes_once() {
        let billing = RecordingBilling::new();
        let items = items();
        report_usage(&billing, "free", report(&items, UsageAction::Create, 3)).await.unwrap();
        report_usage(&billing, "free", report(&items, UsageAction::Create, 3)).await.unwrap();
        assert_eq!(billing.usage_events("si_section").await, 1);
    }
}
