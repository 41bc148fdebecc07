//! Engagement analytics.
//!
//! Two documents per entity: a per-user record keyed `{entityId}:{uid}`
//! carrying running totals and per-day counters, and an entity-level record
//! keyed by the entity id with one roster per role tracking who has not yet
//! viewed, downloaded or watched the content.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{self, DocStore, StoreError, ENTITY_ANALYTICS, USER_ANALYTICS};
use crate::types::{now_millis, ContentType, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Active,
    Inactive,
}

/// One day's engagement count. `date` is the UTC midnight of the day in
/// millis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DateCount {
    pub date: i64,
    pub count: i64,
}

/// What a user reported for one interaction with an entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Engagement {
    pub viewed: bool,
    pub watched: bool,
    pub downloaded: bool,
    /// Millis spent on the entity during this interaction.
    pub recent_time_spent: i64,
    /// Millis of playback during this interaction.
    pub recent_watch_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserAnalytics {
    pub uid: String,
    pub role: Role,
    pub entity_id: String,
    pub group_id: String,
    pub section_ids: Vec<String>,
    pub subject_id: String,
    pub status: RecordStatus,
    pub last_seen: i64,
    pub recent_time_spent: i64,
    pub recent_watch_time: i64,
    pub total_time_spent: i64,
    pub total_watch_time: i64,
    pub total_downloads: i64,
    pub total_times_played: i64,
    pub total_times_viewed: i64,
    pub downloaded: bool,
    pub viewed: bool,
    pub watched: bool,
    pub avg_watch_time: f64,
    pub avg_time_spent: f64,
    pub date_viewed: Vec<DateCount>,
    pub date_played: Vec<DateCount>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Default for UserAnalytics {
    fn default() -> Self {
        Self {
            uid: String::new(),
            role: Role::Learner,
            entity_id: String::new(),
            group_id: String::new(),
            section_ids: Vec::new(),
            subject_id: String::new(),
            status: RecordStatus::Active,
            last_seen: 0,
            recent_time_spent: 0,
            recent_watch_time: 0,
            total_time_spent: 0,
            total_watch_time: 0,
            total_downloads: 0,
            total_times_played: 0,
            total_times_viewed: 0,
            downloaded: false,
            viewed: false,
            watched: false,
            avg_watch_time: 0.0,
            avg_time_spent: 0.0,
            date_viewed: Vec::new(),
            date_played: Vec::new(),
            created_at: 0,
            updated_at: 0,
        }
    }
}

/// Per-role engagement roster on the entity-level record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngagementRoster {
    /// Everyone who has interacted with the entity, most recent first.
    pub ids: Vec<String>,
    pub users_not_viewed: Vec<String>,
    pub users_not_downloaded: Vec<String>,
    pub users_not_watched: Vec<String>,
    pub last_seen_id: String,
    pub last_opened_time: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EntityAnalytics {
    pub entity_id: String,
    pub group_id: String,
    pub section_ids: Vec<String>,
    pub subject_id: String,
    pub admin: EngagementRoster,
    pub provider: EngagementRoster,
    pub learner: EngagementRoster,
    pub created_at: i64,
    pub updated_at: i64,
}

impl EntityAnalytics {
    /// Seed the rosters from a role membership snapshot. Pending-download
    /// lists only make sense for documents and pending-watch lists only for
    /// videos; everything starts unviewed.
    pub fn seed(
        entity_id: &str,
        group_id: &str,
        section_ids: &[String],
        subject_id: &str,
        content_type: ContentType,
        members: impl Fn(Role) -> Vec<String>,
    ) -> Self {
        let roster = |role: Role| {
            let users = members(role);
            EngagementRoster {
                users_not_downloaded: if content_type == ContentType::Document {
                    users.clone()
                } else {
                    Vec::new()
                },
                users_not_watched: if content_type == ContentType::Video {
                    users.clone()
                } else {
                    Vec::new()
                },
                users_not_viewed: users,
                ..EngagementRoster::default()
            }
        };
        EntityAnalytics {
            entity_id: entity_id.to_string(),
            group_id: group_id.to_string(),
            section_ids: section_ids.to_vec(),
            subject_id: subject_id.to_string(),
            admin: roster(Role::Admin),
            provider: roster(Role::Provider),
            learner: roster(Role::Learner),
            created_at: now_millis(),
            updated_at: now_millis(),
        }
    }

    pub fn roster_mut(&mut self, role: Role) -> &mut EngagementRoster {
        match role {
            Role::Admin => &mut self.admin,
            Role::Provider => &mut self.provider,
            Role::Learner => &mut self.learner,
        }
    }

    pub fn roster(&self, role: Role) -> &EngagementRoster {
        match role {
            Role::Admin => &self.admin,
            Role::Provider => &self.provider,
            Role::Learner => &self.learner,
        }
    }

    /// Fold one interaction into the role roster: the user moves off the
    /// pending lists they satisfied and becomes the last seen id.
    pub fn apply(&mut self, record: &UserAnalytics) {
        let uid = record.uid.clone();
        let roster = self.roster_mut(record.role);
        roster.last_seen_id = uid.clone();
        roster.last_opened_time = now_millis();
        if !roster.ids.iter().any(|u| u == &uid) {
            roster.ids.insert(0, uid.clone());
        }
        if record.viewed {
            roster.users_not_viewed.retain(|u| u != &uid);
        }
        if record.downloaded {
            roster.users_not_downloaded.retain(|u| u != &uid);
        }
        if record.watched {
            roster.users_not_watched.retain(|u| u != &uid);
        }
    }

    /// Drop a departing user from every list of their role roster.
    pub fn remove_user(&mut self, role: Role, uid: &str) {
        let roster = self.roster_mut(role);
        roster.ids.retain(|u| u != uid);
        roster.users_not_viewed.retain(|u| u != uid);
        roster.users_not_downloaded.retain(|u| u != uid);
        roster.users_not_watched.retain(|u| u != uid);
    }
}

/// UTC midnight of the current day, in millis.
fn today_bucket() -> i64 {
    let now = Utc::now().date_naive();
    Utc.from_utc_datetime(&now.and_hms_opt(0, 0, 0).unwrap_or_default())
        .timestamp_millis()
}

fn bump(buckets: &mut Vec<DateCount>, date: i64) {
    match buckets.iter_mut().find(|b| b.date == date) {
        Some(bucket) => bucket.count += 1,
        None => buckets.insert(0, DateCount { date, count: 1 }),
    }
}

pub fn user_key(entity_id: &str, uid: &str) -> String {
    format!("{entity_id}:{uid}")
}

pub async fn get_entity(
    store: &dyn DocStore,
    entity_id: &str,
) -> Result<EntityAnalytics, StoreError> {
    store::fetch(store, ENTITY_ANALYTICS, entity_id).await
}

pub async fn set_entity(
    store: &dyn DocStore,
    analytics: &mut EntityAnalytics,
) -> Result<(), StoreError> {
    if analytics.created_at == 0 {
        analytics.created_at = now_millis();
    }
    analytics.updated_at = now_millis();
    store::save(store, ENTITY_ANALYTICS, &analytics.entity_id.clone(), analytics).await
}

pub async fn get_user(
    store: &dyn DocStore,
    entity_id: &str,
    uid: &str,
) -> Result<Option<UserAnalytics>, StoreError> {
    store::fetch_opt(store, USER_ANALYTICS, &user_key(entity_id, uid)).await
}

/// Merge one interaction into the user's running record and return it.
///
/// Totals accumulate, per-day buckets grow on the UTC day of the call, and
/// averages are recomputed as total over event count.
pub async fn record_engagement(
    store: &dyn DocStore,
    mut record: UserAnalytics,
    engagement: &Engagement,
) -> Result<UserAnalytics, StoreError> {
    let today = today_bucket();
    record.viewed = engagement.viewed;
    record.watched = engagement.watched;
    record.downloaded = engagement.downloaded;
    record.last_seen = now_millis();

    if let Some(old) = get_user(store, &record.entity_id, &record.uid).await? {
        record.created_at = old.created_at;
        record.status = old.status;
        record.recent_time_spent = if engagement.recent_time_spent != 0 {
            engagement.recent_time_spent
        } else {
            old.recent_time_spent
        };
        record.recent_watch_time = if engagement.recent_watch_time != 0 {
            engagement.recent_watch_time
        } else {
            old.recent_watch_time
        };
        record.total_downloads = old.total_downloads + i64::from(engagement.downloaded);
        record.total_times_viewed = old.total_times_viewed + i64::from(engagement.viewed);
        record.total_times_played = old.total_times_played + i64::from(engagement.watched);
        record.total_time_spent = old.total_time_spent + engagement.recent_time_spent;
        record.total_watch_time = old.total_watch_time + engagement.recent_watch_time;
        record.date_viewed = old.date_viewed;
        record.date_played = old.date_played;
        record.avg_watch_time = old.avg_watch_time;
        record.avg_time_spent = old.avg_time_spent;
    } else {
        record.status = RecordStatus::Active;
        record.recent_time_spent = engagement.recent_time_spent;
        record.recent_watch_time = engagement.recent_watch_time;
        record.total_downloads = i64::from(engagement.downloaded);
        record.total_times_viewed = i64::from(engagement.viewed);
        record.total_times_played = i64::from(engagement.watched);
        record.total_time_spent = engagement.recent_time_spent;
        record.total_watch_time = engagement.recent_watch_time;
        record.created_at = now_millis();
    }

    if engagement.viewed {
        bump(&mut record.date_viewed, today);
    }
    if engagement.watched {
        bump(&mut record.date_played, today);
    }
    if record.total_times_played > 0 && record.total_watch_time > 0 {
        record.avg_watch_time = record.total_watch_time as f64 / record.total_times_played as f64;
    }
    if record.total_times_viewed > 0 && record.total_time_spent > 0 {
        record.avg_time_spent = record.total_time_spent as f64 / record.total_times_viewed as f64;
    }

    record.updated_at = now_millis();
    store::save(store, USER_ANALYTICS, &user_key(&record.entity_id, &record.uid), &record)
        .await?;
    Ok(record)
}

/// Re-stamp the role on a user's record after a role change, when one
/// exists.
pub async fn update_user_role(
    store: &dyn DocStore,
    entity_id: &str,
    uid: &str,
    role: Role,
) -> Result<(), StoreError> {
    let key = user_key(entity_id, uid);
    if let Some(mut record) = store::fetch_opt::<UserAnalytics>(store, USER_ANALYTICS, &key).await?
    {
        record.role = role;
        record.updated_at = now_millis();
        store::save(store, USER_ANALYTICS, &key, &record).await?;
    }
    Ok(())
}

/// Delete an entity's analytics record and every per-user record under it.
pub async fn remove_entity(store: &dyn DocStore, entity_id: &str) -> Result<(), StoreError> {
    let docs = store.find_eq(ENTITY_ANALYTICS, "entityId", &serde_json::json!(entity_id)).await?;
    for doc in docs {
        store.delete(ENTITY_ANALYTICS, &doc.id).await?;
    }
    let users = store.find_eq(USER_ANALYTICS, "entityId", &serde_json::json!(entity_id)).await?;
    for doc in users {
        store.delete(USER_ANALYTICS, &doc.id).await?;
    }
    Ok(())
}

pub async fn remove_entity_for_user(
    store: &dyn DocStore,
    entity_id: &str,
    uid: &str,
) -> Result<(), StoreError> {
    store.delete(USER_ANALYTICS, &user_key(entity_id, uid)).await
}

/// Best-effort purge of analytics for a batch of deleted entities. Failures
/// are logged so a cascade can finish.
pub async fn remove_entities_complete(
    store: &dyn DocStore,
    entity_ids: &[String],
    user_ids: &[String],
) {
    for entity_id in entity_ids {
        if let Err(err) = remove_entity(store, entity_id).await {
            tracing::warn!(%entity_id, %err, "entity analytics not removed");
        }
        for uid in user_ids {
            if let Err(err) = remove_entity_for_user(store, entity_id, uid).await {
                tracing::warn!(%entity_id, %uid, %err, "user analytics not removed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn record(uid: &str, role: Role) -> UserAnalytics {
        UserAnalytics {
            uid: uid.to_string(),
            role,
            entity_id: "e1".to_string(),
            group_id: "g1".to_string(),
            subject_id: "sub1".to_string(),
            ..UserAnalytics::default()
        }
    }

    #[tokio::test]
    async fn totals_accumulate_across_engagements() {
        let store = MemoryStore::new();
        let view = Engagement { viewed: true, recent_time_spent: 600, ..Engagement::default() };

        record_engagement(&store, record("u1", Role::Learner), &view).await.unwrap();
        let second =
            record_engagement(&store, record("u1", Role::Learner), &view).await.unwrap();

        assert_eq!(second.total_times_viewed, 2);
        assert_eq!(second.total_time_spent, 1200);
        assert!((second.avg_time_spent - 600.0).abs() < f64::EPSILON);
        assert_eq!(second.date_viewed.len(), 1);
        assert_eq!(second.date_viewed[0].count, 2);
    }

    #[tokio::test]
    async fn watch_time_average_tracks_play_count() {
        let store = MemoryStore::new();
        let short = Engagement { watched: true, recent_watch_time: 100, ..Engagement::default() };
        let long = Engagement { watched: true, recent_watch_time: 300, ..Engagement::default() };

        record_engagement(&store, record("u1", Role::Learner), &short).await.unwrap();
        let updated =
            record_engagement(&store, record("u1", Role::Learner), &long).await.unwrap();

        assert_eq!(updated.total_times_played, 2);
        assert!((updated.avg_watch_time - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn seeding_pending_lists_depends_on_content_type() {
        let members = |role: Role| match role {
            Role::Learner => vec!["l1".to_string(), "l2".to_string()],
            _ => Vec::new(),
        };
        let doc = EntityAnalytics::seed("e1", "g1", &[], "sub1", ContentType::Document, members);
        assert_eq!(doc.learner.users_not_downloaded.len(), 2);
        assert!(doc.learner.users_not_watched.is_empty());

        let vid = EntityAnalytics::seed("e1", "g1", &[], "sub1", ContentType::Video, members);
        assert!(vid.learner.users_not_downloaded.is_empty());
        assert_eq!(vid.learner.users_not_watched.len(), 2);
    }

    #[test]
    fn apply_moves_user_off_satisfied_lists() {
        let members = |role: Role| match role {
            Role::Learner => vec!["l1".to_string()],
            _ => Vec::new(),
        };
        let mut doc =
            EntityAnalytics::seed("e1", "g1", &[], "sub1", ContentType::Video, members);
        let mut rec = record("l1", Role::Learner);
        rec.viewed = true;
        rec.watched = true;
        doc.apply(&rec);

        assert_eq!(doc.learner.last_seen_id, "l1");
        assert_eq!(doc.learner.ids, vec!["l1"]);
        assert!(doc.learner.users_not_viewed.is_empty());
        assert!(doc.learner.users_not_watched.is_empty());
    }
}
