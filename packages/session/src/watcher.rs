//! # Realtime badge watcher
//!
//! Keeps the badge fresh by recomputing it whenever a row changes in
//! `notifications`, `messages` or `group_messages`. Which row changed is
//! irrelevant: every event schedules a full recomputation.
//!
//! Events are debounced on the trailing edge: a burst of changes produces one
//! recomputation, `debounce` after the last event of the burst.
//!
//! Feeds are joined as the signed-in student (anonymously when there is none)
//! and joined again whenever the student's access token changes.

use std::time::Duration;

use api::models::tables;
use api::{Backend, ChangeEvent, Subscription};
use futures::future::select_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::{IdentitySession, SessionContext, SessionError, StudentProfile};

/// Relations whose changes affect the badge.
pub const WATCHED_TABLES: [&str; 3] = [
    tables::NOTIFICATIONS,
    tables::MESSAGES,
    tables::GROUP_MESSAGES,
];

/// Background task driving badge updates from change feeds. Dropping it stops
/// the task and unsubscribes.
#[derive(Debug)]
pub struct BadgeWatcher {
    task: JoinHandle<()>,
}

impl BadgeWatcher {
    pub async fn start(ctx: SessionContext, debounce: Duration) -> Result<Self, SessionError> {
        let mut student = ctx.watch::<StudentProfile>();
        let token = student_token(&mut student);
        let feeds = subscribe_all(ctx.backend().as_ref(), token.as_deref()).await?;
        tracing::info!(debounce_ms = debounce.as_millis() as u64, "badge watcher started");
        let task = tokio::spawn(run(ctx, feeds, student, token, debounce));
        Ok(Self { task })
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(self) {
        // Drop aborts
    }
}

impl Drop for BadgeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn student_token(
    student: &mut watch::Receiver<IdentitySession<StudentProfile>>,
) -> Option<String> {
    student.borrow_and_update().access_token().map(str::to_string)
}

async fn subscribe_all(
    backend: &dyn Backend,
    access_token: Option<&str>,
) -> Result<Vec<Subscription>, SessionError> {
    let mut feeds = Vec::with_capacity(WATCHED_TABLES.len());
    for table in WATCHED_TABLES {
        feeds.push(backend.subscribe(table, access_token).await?);
    }
    Ok(feeds)
}

async fn run(
    ctx: SessionContext,
    mut feeds: Vec<Subscription>,
    mut student: watch::Receiver<IdentitySession<StudentProfile>>,
    mut token: Option<String>,
    debounce: Duration,
) {
    loop {
        let first = tokio::select! {
            changed = student.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = student_token(&mut student);
                if current != token {
                    match subscribe_all(ctx.backend().as_ref(), current.as_deref()).await {
                        Ok(fresh) => {
                            feeds = fresh;
                            token = current;
                            tracing::debug!(signed_in = token.is_some(), "change feeds rejoined");
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to rejoin change feeds"),
                    }
                }
                continue;
            }
            event = next_event(&mut feeds) => match event {
                Some(event) => event,
                None => break,
            },
        };
        tracing::trace!(table = %first.table, kind = ?first.kind, "change received");

        let deadline = sleep(debounce);
        tokio::pin!(deadline);
        let mut coalesced = 0usize;
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = next_event(&mut feeds) => match event {
                    Some(_) => {
                        coalesced += 1;
                        deadline.as_mut().reset(Instant::now() + debounce);
                    }
                    None => break,
                },
            }
        }

        let badge = ctx.update_badge_count().await;
        tracing::debug!(coalesced, ?badge, "badge recomputed");
    }
    tracing::info!("all change feeds closed, badge watcher stopping");
}

/// Next event from any feed. Closed feeds are dropped; `None` once all are.
async fn next_event(feeds: &mut Vec<Subscription>) -> Option<ChangeEvent> {
    while !feeds.is_empty() {
        let (event, index) = {
            let pending = feeds.iter_mut().map(|feed| Box::pin(feed.recv()));
            let (event, index, _) = select_all(pending).await;
            (event, index)
        };
        match event {
            Some(event) => return Some(event),
            None => {
                let closed = feeds.remove(index);
                tracing::warn!(table = closed.table(), "change feed closed");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Credentials;
    use crate::profile::StudentProfile;
    use crate::testing::{eventually, Harness};
    use api::{AuthTokens, ChangeKind};
    use serde_json::json;

    async fn signed_in_student(harness: &Harness) {
        let credentials = Credentials::new(
            AuthTokens {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
            },
            "s-1",
        );
        harness
            .ctx
            .login(credentials, None, StudentProfile::default())
            .await
            .unwrap();
        let push = harness.push.clone();
        // Login publishes once on its own
        eventually(move || push.badge_writes() == 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced() {
        let harness = Harness::new();
        signed_in_student(&harness).await;
        let _watcher = BadgeWatcher::start(harness.ctx.clone(), Duration::from_millis(300))
            .await
            .unwrap();

        for i in 0..5 {
            harness.backend.seed(
                tables::MESSAGES,
                [json!({"id": i, "sender_id": "s-2", "read_at": null})],
            );
            sleep(Duration::from_millis(50)).await;
        }
        sleep(Duration::from_secs(1)).await;

        assert_eq!(harness.push.badge_writes(), 2);
        assert_eq!(harness.push.badge(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_each_update() {
        let harness = Harness::new();
        signed_in_student(&harness).await;
        let _watcher = BadgeWatcher::start(harness.ctx.clone(), Duration::from_millis(100))
            .await
            .unwrap();

        for table in WATCHED_TABLES {
            harness.backend.emit(table, ChangeKind::Update, None, None);
            sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(harness.push.badge_writes(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feeds_follow_the_student_token() {
        let harness = Harness::new();
        let _watcher = BadgeWatcher::start(harness.ctx.clone(), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(harness.backend.feed_bearers(tables::MESSAGES), vec![None]);

        signed_in_student(&harness).await;
        let backend = harness.backend.clone();
        eventually(move || backend.feed_bearers(tables::MESSAGES).len() == 2).await;
        for table in WATCHED_TABLES {
            assert_eq!(
                harness.backend.feed_bearers(table).last(),
                Some(&Some("a".to_string()))
            );
        }

        // Events arrive on the rejoined feeds
        harness.backend.seed(
            tables::MESSAGES,
            [json!({"id": 1, "sender_id": "s-2", "read_at": null})],
        );
        sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.push.badge(), 1);

        // A status change keeps the token, so nothing is rejoined
        harness
            .ctx
            .up_student_status(api::models::StudentStatus::Active)
            .unwrap()
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.backend.feed_bearers(tables::MESSAGES).len(), 2);

        harness.ctx.logout::<StudentProfile>().await.unwrap();
        let backend = harness.backend.clone();
        eventually(move || backend.feed_bearers(tables::MESSAGES).len() == 3).await;
        assert_eq!(
            harness.backend.feed_bearers(tables::MESSAGES).last(),
            Some(&None)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_watcher_stops_updates() {
        let harness = Harness::new();
        signed_in_student(&harness).await;
        let watcher = BadgeWatcher::start(harness.ctx.clone(), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(!watcher.is_finished());
        watcher.stop();

        harness
            .backend
            .emit(tables::NOTIFICATIONS, ChangeKind::Insert, None, None);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.push.badge_writes(), 1);
    }
}
