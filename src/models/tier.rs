use serde::{Deserialize, Serialize};

use crate::store::{self, DocStore, StoreError, TIERS};
use crate::types::UsageKind;

/// Quota and pricing for one resource kind. `allowed = -1` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Limit {
    pub price_id: String,
    pub allowed: i64,
    pub amount: i64,
}

impl Default for Limit {
    fn default() -> Self {
        Self { price_id: String::new(), allowed: -1, amount: 0 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Tier {
    pub tier_id: String,
    pub product_id: String,
    pub name: String,
    pub user: Limit,
    pub group: Limit,
    pub section: Limit,
    pub subject: Limit,
    pub entity: Limit,
    pub storage: Limit,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Tier {
    pub fn limit(&self, kind: UsageKind) -> &Limit {
        match kind {
            UsageKind::Group => &self.group,
            UsageKind::User => &self.user,
            UsageKind::Section => &self.section,
            UsageKind::Subject => &self.subject,
            UsageKind::Storage => &self.storage,
        }
    }

    /// Usage kinds this tier prices, with their price ids.
    pub fn priced_kinds(&self) -> Vec<(UsageKind, String)> {
        UsageKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let limit = self.limit(kind);
                if limit.price_id.is_empty() {
                    None
                } else {
                    Some((kind, limit.price_id.clone()))
                }
            })
            .collect()
    }
}

pub async fn get(store: &dyn DocStore, tier_id: &str) -> Result<Tier, StoreError> {
    store::fetch(store, TIERS, tier_id).await
}

pub async fn save(store: &dyn DocStore, tier: &Tier) -> Result<(), StoreError> {
    store::save(store, TIERS, &tier.tier_id, tier).await
}
