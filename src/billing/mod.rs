//! Billing processor seam.
//!
//! Metered subscriptions: each tier resource maps to a subscription item
//! whose quantity is kept in sync with actual usage. Usage writes are
//! absolute (`set`) and carry an idempotency key, so a retried cascade never
//! double-bills.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{SubscriptionItem, SubscriptionStatus, UsageKind};

pub mod recording;
pub mod stripe;
pub mod usage;

pub use recording::RecordingBilling;
pub use stripe::StripeBilling;
pub use usage::{report_usage, UsageAction, UsageReport};

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// The subscription carries no item for the requested usage kind.
    #[error("subscription item not found for {0}")]
    MissingItem(&'static str),
    #[error("billing api error: {0}")]
    Api(String),
    #[error("billing transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Customer {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentMethod {
    pub id: String,
    pub brand: String,
    pub last4: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionInfo {
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    pub items: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceLine {
    pub description: String,
    pub amount: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoicePreview {
    pub amount_due: i64,
    pub currency: String,
    pub lines: Vec<InvoiceLine>,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn create_customer(
        &self,
        uid: &str,
        email: &str,
        phone: &str,
    ) -> Result<Customer, BillingError>;

    /// Attach a payment method and make it the customer's default.
    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<PaymentMethod, BillingError>;

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<(), BillingError>;

    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PaymentMethod>, BillingError>;

    /// Small authorization charge used to verify a card.
    async fn create_payment_intent(&self, customer_id: &str)
        -> Result<PaymentIntent, BillingError>;

    async fn refund_payment_intent(&self, intent_id: &str) -> Result<(), BillingError>;

    /// Open a metered subscription with one item per priced usage kind.
    async fn create_subscription(
        &self,
        customer_id: &str,
        prices: &[(UsageKind, String)],
    ) -> Result<SubscriptionInfo, BillingError>;

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), BillingError>;

    async fn upcoming_invoice(&self, customer_id: &str) -> Result<InvoicePreview, BillingError>;

    /// Set the absolute quantity on a subscription item.
    async fn set_usage(
        &self,
        item_id: &str,
        quantity: i64,
        idempotency_key: &str,
    ) -> Result<(), BillingError>;

    /// The most recently reported quantity for a subscription item, zero
    /// when nothing has been reported yet.
    async fn last_usage(&self, item_id: &str) -> Result<i64, BillingError>;
}

/// Locate the subscription item carrying a usage kind.
pub fn find_subscription_item(
    items: &[SubscriptionItem],
    kind: UsageKind,
) -> Result<&SubscriptionItem, BillingError> {
    items
        .iter()
        .find(|item| item.kind == Some(kind))
        .ok_or(BillingError::MissingItem(kind.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_subscription_item_matches_kind() {
        let items = vec![
            SubscriptionItem {
                item_id: "si_user".to_string(),
                price_id: "price_user".to_string(),
                kind: Some(UsageKind::User),
            },
            SubscriptionItem {
                item_id: "si_storage".to_string(),
                price_id: "price_storage".to_string(),
                kind: Some(UsageKind::Storage),
            },
        ];
        let item = find_subscription_item(&items, UsageKind::Storage).unwrap();
        assert_eq!(item.item_id, "si_storage");
        assert!(matches!(
            find_subscription_item(&items, UsageKind::Section),
            Err(BillingError::MissingItem("section"))
        ));
    }
}
