//! Stripe-backed billing provider.
//!
//! Talks to the REST API directly with form-encoded requests. Usage writes
//! send `action=set` with the caller's idempotency key so retries collapse
//! into one record.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{
    BillingError, BillingProvider, Customer, InvoicePreview, PaymentIntent, PaymentMethod,
    SubscriptionInfo, InvoiceLine,
};
use crate::types::{now_millis, SubscriptionItem, SubscriptionStatus, UsageKind};

pub struct StripeBilling {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CardInfo {
    #[serde(default)]
    brand: String,
    #[serde(default)]
    last4: String,
}

#[derive(Debug, Deserialize)]
struct PaymentMethodBody {
    id: String,
    card: Option<CardInfo>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentBody {
    id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    currency: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItemBody {
    id: String,
    price: PriceBody,
}

#[derive(Debug, Deserialize)]
struct PriceBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionBody {
    id: String,
    status: SubscriptionStatus,
    items: List<SubscriptionItemBody>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLineBody {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct InvoiceBody {
    #[serde(default)]
    amount_due: i64,
    #[serde(default)]
    currency: String,
    lines: List<InvoiceLineBody>,
}

#[derive(Debug, Deserialize)]
struct UsageSummaryBody {
    #[serde(default)]
    total_usage: i64,
}

impl StripeBilling {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self { client: Client::new(), api_key, base_url }
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BillingError> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| BillingError::Transport(e.to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| format!("http status {status}"));
            return Err(BillingError::Api(message));
        }
        serde_json::from_slice(&body).map_err(|e| BillingError::Api(e.to_string()))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T, BillingError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let response =
            request.send().await.map_err(|e| BillingError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BillingError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| BillingError::Transport(e.to_string()))?;
        Self::decode(response).await
    }
}

fn form(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn payment_method(body: PaymentMethodBody) -> PaymentMethod {
    let card = body.card.unwrap_or(CardInfo { brand: String::new(), last4: String::new() });
    PaymentMethod { id: body.id, brand: card.brand, last4: card.last4 }
}

#[async_trait]
impl BillingProvider for StripeBilling {
    async fn create_customer(
        &self,
        uid: &str,
        email: &str,
        phone: &str,
    ) -> Result<Customer, BillingError> {
        self.post(
            "/v1/customers",
            &form(&[("email", email), ("phone", phone), ("metadata[uid]", uid)]),
            None,
        )
        .await
    }

    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<PaymentMethod, BillingError> {
        let attached: PaymentMethodBody = self
            .post(
                &format!("/v1/payment_methods/{payment_method_id}/attach"),
                &form(&[("customer", customer_id)]),
                None,
            )
            .await?;
        let _: serde_json::Value = self
            .post(
                &format!("/v1/customers/{customer_id}"),
                &form(&[("invoice_settings[default_payment_method]", &attached.id)]),
                None,
            )
            .await?;
        Ok(payment_method(attached))
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<(), BillingError> {
        let _: serde_json::Value = self
            .post(&format!("/v1/payment_methods/{payment_method_id}/detach"), &[], None)
            .await?;
        Ok(())
    }

    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PaymentMethod>, BillingError> {
        let list: List<PaymentMethodBody> = self
            .get("/v1/payment_methods", &[("customer", customer_id), ("type", "card")])
            .await?;
        Ok(list.data.into_iter().map(payment_method).collect())
    }

    async fn create_payment_intent(
        &self,
        customer_id: &str,
    ) -> Result<PaymentIntent, BillingError> {
        let body: PaymentIntentBody = self
            .post(
                "/v1/payment_intents",
                &form(&[("amount", "100"), ("currency", "inr"), ("customer", customer_id)]),
                None,
            )
            .await?;
        Ok(PaymentIntent {
            id: body.id,
            client_secret: body.client_secret,
            amount: body.amount,
            currency: body.currency,
        })
    }

    async fn refund_payment_intent(&self, intent_id: &str) -> Result<(), BillingError> {
        let _: serde_json::Value = self
            .post("/v1/refunds", &form(&[("payment_intent", intent_id)]), None)
            .await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        prices: &[(UsageKind, String)],
    ) -> Result<SubscriptionInfo, BillingError> {
        let mut fields = vec![("customer".to_string(), customer_id.to_string())];
        for (i, (_, price_id)) in prices.iter().enumerate() {
            fields.push((format!("items[{i}][price]"), price_id.clone()));
        }
        let body: SubscriptionBody = self.post("/v1/subscriptions", &fields, None).await?;

        // map items back to their usage kinds by price id
        let items = body
            .items
            .data
            .into_iter()
            .map(|item| SubscriptionItem {
                kind: prices
                    .iter()
                    .find(|(_, price_id)| *price_id == item.price.id)
                    .map(|(kind, _)| *kind),
                item_id: item.id,
                price_id: item.price.id,
            })
            .collect();
        Ok(SubscriptionInfo { subscription_id: body.id, status: body.status, items })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), BillingError> {
        let response = self
            .client
            .delete(format!("{}/v1/subscriptions/{subscription_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BillingError::Transport(e.to_string()))?;
        let _: serde_json::Value = Self::decode(response).await?;
        Ok(())
    }

    async fn upcoming_invoice(&self, customer_id: &str) -> Result<InvoicePreview, BillingError> {
        let body: InvoiceBody =
            self.get("/v1/invoices/upcoming", &[("customer", customer_id)]).await?;
        Ok(InvoicePreview {
            amount_due: body.amount_due,
            currency: body.currency,
            lines: body
                .lines
                .data
                .into_iter()
                .map(|line| InvoiceLine {
                    description: line.description.unwrap_or_default(),
                    amount: line.amount,
                    quantity: line.quantity.unwrap_or(0),
                })
                .collect(),
        })
    }

    async fn set_usage(
        &self,
        item_id: &str,
        quantity: i64,
        idempotency_key: &str,
    ) -> Result<(), BillingError> {
        let timestamp = (now_millis() / 1000).to_string();
        let quantity = quantity.to_string();
        let _: serde_json::Value = self
            .post(
                &format!("/v1/subscription_items/{item_id}/usage_records"),
                &form(&[
                    ("quantity", quantity.as_str()),
                    ("timestamp", timestamp.as_str()),
                    ("action", "set"),
                ]),
                Some(idempotency_key),
            )
            .await?;
        Ok(())
    }

    async fn last_usage(&self, item_id: &str) -> Result<i64, BillingError> {
        let list: List<UsageSummaryBody> = self
            .get(
                &format!("/v1/subscription_items/{item_id}/usage_record_summaries"),
                &[("limit", "1")],
            )
            .await?;
        Ok(list.data.first().map(|s| s.total_usage).unwrap_or(0))
    }
}
