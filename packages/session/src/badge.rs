//! # Unread badge aggregation
//!
//! The app-icon badge is the sum of three unread counts for the signed-in
//! student, recomputed from scratch on every trigger:
//!
//! | Part | Source |
//! |------|--------|
//! | Notifications | active `notifications` addressed to the student, not expired, without the student in `read_by` |
//! | Direct messages | `messages` with no `read_at` sent by someone else |
//! | Group messages | `group_messages` in the student's most recently read group, created after `last_read_at` |
//!
//! Any failure publishes 0 rather than a stale number. Every query runs as
//! the student ([`BadgeOwner::access_token`]), never as another signed-in kind.
//!
//! ## Overlapping updates
//!
//! Realtime events can start several recomputations at once. Each one takes a
//! generation number when it starts; when it finishes, it publishes only if no
//! newer recomputation has started in the meantime. The last started run wins,
//! not the last finished one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use api::backend::decode_rows;
use api::models::{
    tables, ClubAffiliationRow, GroupParticipantRow, NotificationRow, RecipientType,
    UniversityAffiliationRow, AFFILIATION_ACTIVE,
};
use api::push::PushNotifier;
use api::{ApiError, Backend, Query};
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::Mutex;

/// The unread counts behind one badge value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnreadTally {
    pub notifications: u32,
    pub direct_messages: u32,
    pub group_messages: u32,
}

impl UnreadTally {
    pub fn total(&self) -> u32 {
        self.notifications
            .saturating_add(self.direct_messages)
            .saturating_add(self.group_messages)
    }
}

/// The signed-in student a badge is computed for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BadgeOwner {
    pub student_id: String,
    pub access_token: String,
    pub role: Option<String>,
}

/// What a notification can be addressed by.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Recipient {
    pub student_id: String,
    pub role: Option<String>,
    pub university_ids: HashSet<String>,
    pub club_ids: HashSet<String>,
}

pub fn is_addressed_to(notification: &NotificationRow, recipient: &Recipient) -> bool {
    match notification.recipient_type {
        RecipientType::All => true,
        RecipientType::Specific => notification.recipient_ids.contains(&recipient.student_id),
        RecipientType::Role => recipient
            .role
            .as_ref()
            .is_some_and(|role| notification.recipient_roles.contains(role)),
        RecipientType::University => notification
            .recipient_universities
            .iter()
            .any(|u| recipient.university_ids.contains(u)),
        RecipientType::Club => notification
            .recipient_club
            .as_ref()
            .is_some_and(|club| recipient.club_ids.contains(club)),
        RecipientType::Unknown => false,
    }
}

pub fn is_expired(notification: &NotificationRow, now: DateTime<Utc>) -> bool {
    notification.expires_at.is_some_and(|at| at < now)
}

/// Unread notifications for `recipient`. Each row counts at most once.
pub fn count_unread_notifications(
    notifications: &[NotificationRow],
    recipient: &Recipient,
    now: DateTime<Utc>,
) -> u32 {
    let unread = notifications
        .iter()
        .filter(|n| n.is_active)
        .filter(|n| is_addressed_to(n, recipient))
        .filter(|n| !is_expired(n, now))
        .filter(|n| !n.read_by.contains(&recipient.student_id))
        .count();
    u32::try_from(unread).unwrap_or(u32::MAX)
}

fn clamp(count: u64) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Computes the badge and publishes it through the push interface.
pub struct BadgeAggregator {
    backend: Arc<dyn Backend>,
    push: Arc<dyn PushNotifier>,
    generation: AtomicU64,
    publish: Mutex<()>,
}

impl BadgeAggregator {
    pub fn new(backend: Arc<dyn Backend>, push: Arc<dyn PushNotifier>) -> Self {
        Self {
            backend,
            push,
            generation: AtomicU64::new(0),
            publish: Mutex::new(()),
        }
    }

    /// Recompute and publish for the signed-in student, if any.
    ///
    /// Returns the published value, or `None` when a newer update superseded
    /// this one.
    pub async fn update(&self, owner: Option<BadgeOwner>) -> Option<u32> {
        let generation = self.begin();
        let count = match owner {
            None => 0,
            Some(owner) => match self.tally(&owner).await {
                Ok(tally) => {
                    tracing::debug!(?tally, "unread tally");
                    tally.total()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "badge computation failed, clearing badge");
                    0
                }
            },
        };
        self.publish(generation, count).await
    }

    pub(crate) fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) async fn publish(&self, generation: u64, count: u32) -> Option<u32> {
        let _guard = self.publish.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(generation, count, "badge update superseded");
            return None;
        }
        if let Err(e) = self.push.set_badge_count(count).await {
            tracing::warn!(error = %e, "failed to set badge count");
        }
        Some(count)
    }

    pub async fn tally(&self, owner: &BadgeOwner) -> Result<UnreadTally, ApiError> {
        let student_id = owner.student_id.as_str();
        let token = owner.access_token.as_str();
        let recipient = self.recipient(owner).await?;

        let active = Query::table(tables::NOTIFICATIONS)
            .eq("is_active", true)
            .as_user(token);
        let rows = self.backend.select(&active).await?;
        let notifications: Vec<NotificationRow> = decode_rows(tables::NOTIFICATIONS, rows)?;
        let notifications = count_unread_notifications(&notifications, &recipient, Utc::now());

        let direct = Query::table(tables::MESSAGES)
            .select("id")
            .is_null("read_at")
            .neq("sender_id", student_id)
            .as_user(token);
        let direct_messages = clamp(self.backend.count(&direct).await?);

        let group_messages = self.unread_group_messages(student_id, token).await?;

        Ok(UnreadTally {
            notifications,
            direct_messages,
            group_messages,
        })
    }

    async fn recipient(&self, owner: &BadgeOwner) -> Result<Recipient, ApiError> {
        let student_id = owner.student_id.as_str();
        let universities = Query::table(tables::APPLIED_UNIVERSITIES)
            .select("student_id,university_id,status")
            .eq("student_id", student_id)
            .eq("status", AFFILIATION_ACTIVE)
            .as_user(owner.access_token.as_str());
        let clubs = Query::table(tables::APPLIED_CLUBS)
            .select("student_id,club_id,status")
            .eq("student_id", student_id)
            .eq("status", AFFILIATION_ACTIVE)
            .as_user(owner.access_token.as_str());

        let universities: Vec<UniversityAffiliationRow> = decode_rows(
            tables::APPLIED_UNIVERSITIES,
            self.backend.select(&universities).await?,
        )?;
        let clubs: Vec<ClubAffiliationRow> =
            decode_rows(tables::APPLIED_CLUBS, self.backend.select(&clubs).await?)?;

        Ok(Recipient {
            student_id: student_id.to_string(),
            role: owner.role.clone(),
            university_ids: universities.into_iter().map(|a| a.university_id).collect(),
            club_ids: clubs.into_iter().map(|a| a.club_id).collect(),
        })
    }

    /// Only one participation row is read: the most recently read group.
    /// Groups never read sort after every read one.
    async fn unread_group_messages(&self, student_id: &str, token: &str) -> Result<u32, ApiError> {
        let participation = Query::table(tables::GROUP_PARTICIPANTS)
            .select("group_id,student_id,last_read_at")
            .eq("student_id", student_id)
            .order("last_read_at", false)
            .limit(1)
            .as_user(token);
        let rows = self.backend.select(&participation).await?;
        let Some(participant) = decode_rows::<GroupParticipantRow>(tables::GROUP_PARTICIPANTS, rows)?
            .into_iter()
            .next()
        else {
            return Ok(0);
        };

        let mut unread = Query::table(tables::GROUP_MESSAGES)
            .select("id")
            .eq("group_id", participant.group_id)
            .as_user(token);
        if let Some(last_read) = participant.last_read_at {
            unread = unread.gt(
                "created_at",
                last_read.to_rfc3339_opts(SecondsFormat::Micros, true),
            );
        }
        Ok(clamp(self.backend.count(&unread).await?))
    }
}
