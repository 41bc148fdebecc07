//! Tier quota enforcement.
//!
//! A limit of `-1` means unlimited. Counted resources are refused once the
//! group has used up its allowance; storage is compared in decimal
//! gigabytes against the projected total after the upload.

use crate::error::ApiError;
use crate::models::group::Group;
use crate::models::tier::Tier;
use crate::types::UsageKind;

const BYTES_PER_GB: f64 = 1_000_000_000.0;

pub fn bytes_to_gb(bytes: i64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Reject mutations while the subscription is lapsed. `past_due` still
/// passes; the processor is given time to retry the charge.
pub fn ensure_active(group: &Group) -> Result<(), ApiError> {
    if group.subscription_status.in_good_standing() {
        Ok(())
    } else {
        Err(ApiError::TierExpired(group.subscription_status))
    }
}

/// Counted-resource check for sections, subjects and groups.
pub fn ensure_count_within(tier: &Tier, kind: UsageKind, used: i64) -> Result<(), ApiError> {
    let allowed = tier.limit(kind).allowed;
    if allowed >= 0 && used >= allowed {
        return Err(ApiError::LimitExceeded);
    }
    Ok(())
}

/// Seat check for adding users. Unlike the other counters this treats an
/// explicit zero allowance as unlimited, which keeps invite-only free
/// groups working.
pub fn ensure_user_count_within(tier: &Tier, used: i64) -> Result<(), ApiError> {
    let allowed = tier.limit(UsageKind::User).allowed;
    if allowed > 0 && used >= allowed {
        return Err(ApiError::LimitExceeded);
    }
    Ok(())
}

/// Storage check for uploads: projected total in GB must stay at or under
/// the allowance. A zero allowance is treated as unlimited, matching the
/// seat check.
pub fn ensure_storage_within(
    tier: &Tier,
    current_bytes: i64,
    new_bytes: i64,
) -> Result<(), ApiError> {
    let allowed = tier.limit(UsageKind::Storage).allowed;
    if allowed > 0 {
        let projected = bytes_to_gb(current_bytes) + bytes_to_gb(new_bytes);
        if projected > allowed as f64 {
            return Err(ApiError::LimitExceeded);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tier::Limit;
    use crate::types::SubscriptionStatus;

    fn tier_with(kind: UsageKind, allowed: i64) -> Tier {
        let mut tier = Tier { tier_id: "t".to_string(), ..Tier::default() };
        match kind {
            UsageKind::Section => tier.section = Limit { allowed, ..Limit::default() },
            UsageKind::User => tier.user = Limit { allowed, ..Limit::default() },
            UsageKind::Storage => tier.storage = Limit { allowed, ..Limit::default() },
            UsageKind::Subject => tier.subject = Limit { allowed, ..Limit::default() },
            UsageKind::Group => tier.group = Limit { allowed, ..Limit::default() },
        }
        tier
    }

    #[test]
    fn counted_resources_stop_at_the_allowance() {
        let tier = tier_with(UsageKind::Section, 2);
        assert!(ensure_count_within(&tier, UsageKind::Section, 1).is_ok());
        assert!(ensure_count_within(&tier, UsageKind::Section, 2).is_err());
    }

    #[test]
    fn negative_allowance_means_unlimited() {
        let tier = tier_with(UsageKind::Section, -1);
        assert!(ensure_count_within(&tier, UsageKind::Section, 10_000).is_ok());
    }

    #[test]
    fn zero_seat_allowance_is_not_enforced() {
        let tier = tier_with(UsageKind::User, 0);
        assert!(ensure_user_count_within(&tier, 50).is_ok());
        let capped = tier_with(UsageKind::User, 5);
        assert!(ensure_user_count_within(&capped, 5).is_err());
    }

    #[test]
    fn storage_compares_projected_total_in_gb() {
        let tier = tier_with(UsageKind::Storage, 1);
        assert!(ensure_storage_within(&tier, 400_000_000, 500_000_000).is_ok());
        assert!(ensure_storage_within(&tier, 800_000_000, 500_000_000).is_err());
    }

    #[test]
    fn lapsed_subscription_blocks_mutations() {
        let mut group = Group::default();
        group.subscription_status = SubscriptionStatus::Canceled;
        assert!(ensure_active(&group).is_err());
        group.subscription_status = SubscriptionStatus::PastDue;
        assert!(ensure_active(&group).is_ok());
    }
}
