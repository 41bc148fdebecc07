use serde::{Deserialize, Serialize};

/// Role a user can hold within a group, section or subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Provider,
    Learner,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Provider, Role::Learner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Provider => "provider",
            Role::Learner => "learner",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "admin" => Some(Role::Admin),
            "provider" => Some(Role::Provider),
            "learner" => Some(Role::Learner),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription lifecycle states as reported by the billing processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    PastDue,
    Trialing,
    Incomplete,
    IncompleteExpired,
    Canceled,
    Unpaid,
}

impl SubscriptionStatus {
    /// `past_due` is a grace period: resource creation is still allowed.
    pub fn in_good_standing(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::PastDue)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
        }
    }
}

/// Content kinds an entity can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Document,
    Video,
    #[default]
    Image,
}

/// Resource kinds metered against tier limits and billing usage items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Group,
    User,
    Section,
    Subject,
    Storage,
}

impl UsageKind {
    pub const ALL: [UsageKind; 5] = [
        UsageKind::Group,
        UsageKind::User,
        UsageKind::Section,
        UsageKind::Subject,
        UsageKind::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::Group => "group",
            UsageKind::User => "user",
            UsageKind::Section => "section",
            UsageKind::Subject => "subject",
            UsageKind::Storage => "storage",
        }
    }
}

/// One line of a metered subscription, mapping a usage kind to the
/// processor-side subscription item that carries its quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionItem {
    pub item_id: String,
    pub price_id: String,
    pub kind: Option<UsageKind>,
}

/// Current resource counts for one group, recomputed from authoritative
/// list lengths rather than accumulated deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub group: i64,
    pub user: i64,
    pub section: i64,
    pub subject: i64,
    pub storage: i64,
}

impl Usage {
    pub fn get(&self, kind: UsageKind) -> i64 {
        match kind {
            UsageKind::Group => self.group,
            UsageKind::User => self.user,
            UsageKind::Section => self.section,
            UsageKind::Subject => self.subject,
            UsageKind::Storage => self.storage,
        }
    }
}

/// Millisecond UNIX timestamp, the wire format for all document times.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
