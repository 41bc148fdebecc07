//! In-memory billing fake used by tests and local development.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    BillingError, BillingProvider, Customer, InvoicePreview, PaymentIntent, PaymentMethod,
    SubscriptionInfo,
};
use crate::types::{SubscriptionItem, SubscriptionStatus, UsageKind};

#[derive(Default)]
struct State {
    customers: u64,
    subscriptions: u64,
    intents: u64,
    /// item id -> last reported absolute quantity
    usage: HashMap<String, i64>,
    /// item id -> number of accepted usage writes
    writes: HashMap<String, i64>,
    seen_keys: HashSet<String>,
    attached: HashMap<String, Vec<PaymentMethod>>,
    canceled: Vec<String>,
}

/// Accepts every call and records it, honoring idempotency keys the way a
/// real processor does.
#[derive(Default)]
pub struct RecordingBilling {
    state: Mutex<State>,
}

impl RecordingBilling {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn usage_total(&self, item_id: &str) -> i64 {
        self.state.lock().await.usage.get(item_id).copied().unwrap_or(0)
    }

    /// Number of usage writes that were not deduplicated away.
    pub async fn usage_events(&self, item_id: &str) -> i64 {
        self.state.lock().await.writes.get(item_id).copied().unwrap_or(0)
    }

    pub async fn canceled_subscriptions(&self) -> Vec<String> {
        self.state.lock().await.canceled.clone()
    }
}

#[async_trait]
impl BillingProvider for RecordingBilling {
    async fn create_customer(
        &self,
        _uid: &str,
        _email: &str,
        _phone: &str,
    ) -> Result<Customer, BillingError> {
        let mut state = self.state.lock().await;
        state.customers += 1;
        Ok(Customer { id: format!("cus_{}", state.customers) })
    }

    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<PaymentMethod, BillingError> {
        let method = PaymentMethod {
            id: payment_method_id.to_string(),
            brand: "visa".to_string(),
            last4: "4242".to_string(),
        };
        let mut state = self.state.lock().await;
        state.attached.entry(customer_id.to_string()).or_default().push(method.clone());
        Ok(method)
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<(), BillingError> {
        let mut state = self.state.lock().await;
        for methods in state.attached.values_mut() {
            methods.retain(|m| m.id != payment_method_id);
        }
        Ok(())
    }

    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PaymentMethod>, BillingError> {
        let state = self.state.lock().await;
        Ok(state.attached.get(customer_id).cloned().unwrap_or_default())
    }

    async fn create_payment_intent(
        &self,
        _customer_id: &str,
    ) -> Result<PaymentIntent, BillingError> {
        let mut state = self.state.lock().await;
        state.intents += 1;
        Ok(PaymentIntent {
            id: format!("pi_{}", state.intents),
            client_secret: format!("pi_{}_secret", state.intents),
            amount: 100,
            currency: "inr".to_string(),
        })
    }

    async fn refund_payment_intent(&self, _intent_id: &str) -> Result<(), BillingError> {
        Ok(())
    }

    async fn create_subscription(
        &self,
        _customer_id: &str,
        prices: &[(UsageKind, String)],
    ) -> Result<SubscriptionInfo, BillingError> {
        let mut state = self.state.lock().await;
        state.subscriptions += 1;
        let subscription_id = format!("sub_{}", state.subscriptions);
        let items = prices
            .iter()
            .enumerate()
            .map(|(i, (kind, price_id))| SubscriptionItem {
                item_id: format!("si_{}_{}", state.subscriptions, i),
                price_id: price_id.clone(),
                kind: Some(*kind),
            })
            .collect();
        Ok(SubscriptionInfo {
            subscription_id,
            status: SubscriptionStatus::Active,
            items,
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), BillingError> {
        self.state.lock().await.canceled.push(subscription_id.to_string());
        Ok(())
    }

    async fn upcoming_invoice(&self, _customer_id: &str) -> Result<InvoicePreview, BillingError> {
        Ok(InvoicePreview::default())
    }

    async fn set_usage(
        &self,
        item_id: &str,
        quantity: i64,
        idempotency_key: &str,
    ) -> Result<(), BillingError> {
        let mut state = self.state.lock().await;
        if !state.seen_keys.insert(idempotency_key.to_string()) {
            return Ok(());
        }
        state.usage.insert(item_id.to_string(), quantity);
        *state.writes.entry(item_id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn last_usage(&self, item_id: &str) -> Result<i64, BillingError> {
        Ok(self.usage_total(item_id).await)
    }
}
