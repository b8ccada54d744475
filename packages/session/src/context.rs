//! # Session context
//!
//! [`SessionContext`] is the process-wide owner of the five identity sessions.
//! It is constructed once by the composition root and cloned into whatever
//! needs it (clones share state). Nothing outside this crate can mutate a
//! session; readers take snapshots or subscribe to changes.
//!
//! ## Persistence
//!
//! [`login`](SessionContext::login) and [`logout`](SessionContext::logout)
//! apply the in-memory transition first and return immediately. The secure
//! store writes run in a spawned task whose handle is returned; callers may
//! await it or drop it. Store failures are logged and never reach the caller,
//! so after a failed write the in-memory session stays authoritative until the
//! process exits.
//!
//! Write batches of one kind run in call order: each batch waits for the
//! previous batch of the same kind before it touches the store.

use std::sync::{Arc, Mutex, MutexGuard};

use api::models::{tables, StudentStatus};
use api::push::PushNotifier;
use api::{ApiError, Backend, Query};
use futures::future::join_all;
use serde_json::json;
use store::SecureStore;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::badge::{BadgeAggregator, BadgeOwner};
use crate::identity::{Credentials, IdentitySession, Slots};
use crate::kind::keys;
use crate::profile::{
    AdminProfile, ClubModeratorProfile, CompanyProfile, IdentityProfile, ModeratorProfile,
    StudentProfile,
};
use crate::{IdentityKind, SessionError};

#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    /// Push project the device token is requested for. Without one, student
    /// login skips push registration.
    pub push_project_id: Option<String>,
}

type WriteChain = Mutex<Option<oneshot::Receiver<()>>>;

struct Inner {
    slots: Slots,
    loading: watch::Sender<bool>,
    store: Arc<dyn SecureStore>,
    backend: Arc<dyn Backend>,
    push: Arc<dyn PushNotifier>,
    badge: BadgeAggregator,
    options: SessionOptions,
    writes: [WriteChain; 5],
}

#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SessionContext {
    pub fn new(
        store: Arc<dyn SecureStore>,
        backend: Arc<dyn Backend>,
        push: Arc<dyn PushNotifier>,
        options: SessionOptions,
    ) -> Self {
        let (loading, _) = watch::channel(true);
        let badge = BadgeAggregator::new(backend.clone(), push.clone());
        Self {
            inner: Arc::new(Inner {
                slots: Slots::default(),
                loading,
                store,
                backend,
                push,
                badge,
                options,
                writes: Default::default(),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub(crate) fn store(&self) -> &Arc<dyn SecureStore> {
        &self.inner.store
    }

    /// True until the first [`bootstrap`](Self::bootstrap) has settled.
    pub fn is_loading(&self) -> bool {
        *self.inner.loading.borrow()
    }

    pub fn watch_loading(&self) -> watch::Receiver<bool> {
        self.inner.loading.subscribe()
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        self.inner.loading.send_replace(loading);
    }

    /// Snapshot of one kind's session.
    pub fn session<E: IdentityProfile>(&self) -> IdentitySession<E> {
        E::slot(&self.inner.slots).current()
    }

    pub fn watch<E: IdentityProfile>(&self) -> watch::Receiver<IdentitySession<E>> {
        E::slot(&self.inner.slots).subscribe()
    }

    pub fn student(&self) -> IdentitySession<StudentProfile> {
        self.session()
    }

    pub fn admin(&self) -> IdentitySession<AdminProfile> {
        self.session()
    }

    pub fn moderator(&self) -> IdentitySession<ModeratorProfile> {
        self.session()
    }

    pub fn club_moderator(&self) -> IdentitySession<ClubModeratorProfile> {
        self.session()
    }

    pub fn company(&self) -> IdentitySession<CompanyProfile> {
        self.session()
    }

    pub fn is_authenticated(&self, kind: IdentityKind) -> bool {
        let slots = &self.inner.slots;
        match kind {
            IdentityKind::Student => slots.student.is_authenticated(),
            IdentityKind::Admin => slots.admin.is_authenticated(),
            IdentityKind::Moderator => slots.moderator.is_authenticated(),
            IdentityKind::ClubModerator => slots.club_moderator.is_authenticated(),
            IdentityKind::Company => slots.company.is_authenticated(),
        }
    }

    pub fn authenticated_kinds(&self) -> Vec<IdentityKind> {
        IdentityKind::ALL
            .into_iter()
            .filter(|kind| self.is_authenticated(*kind))
            .collect()
    }

    /// Authenticate `E`'s kind. The new session is visible as soon as this
    /// returns; the returned handle completes once it is persisted.
    ///
    /// Student login also registers the device for push and refreshes the
    /// badge, both in the background.
    pub fn login<E: IdentityProfile>(
        &self,
        credentials: Credentials,
        display_name: Option<String>,
        profile: E,
    ) -> JoinHandle<()> {
        let kind = E::KIND;
        let account_id = credentials.account_id.clone();
        let access_token = credentials.access_token.clone();
        let session = IdentitySession::authenticated(credentials, display_name, profile);
        let entries = session.persisted_entries();
        E::slot(&self.inner.slots).replace(session);
        tracing::info!(%kind, %account_id, "logged in");

        let persisted = self.persist(kind, entries);
        if kind == IdentityKind::Student {
            self.register_push(account_id, access_token);
            self.spawn_badge_update();
        }
        persisted
    }

    /// Return `E`'s kind to anonymous and erase its keys. Safe to repeat.
    pub fn logout<E: IdentityProfile>(&self) -> JoinHandle<()> {
        let kind = E::KIND;
        let previous = E::slot(&self.inner.slots).replace(IdentitySession::anonymous());
        if previous.is_authenticated() {
            tracing::info!(%kind, "logged out");
        }

        let persisted = self.persist(kind, IdentitySession::<E>::anonymous().persisted_entries());
        if kind == IdentityKind::Student {
            self.spawn_badge_update();
        }
        persisted
    }

    pub fn logout_kind(&self, kind: IdentityKind) -> JoinHandle<()> {
        match kind {
            IdentityKind::Student => self.logout::<StudentProfile>(),
            IdentityKind::Admin => self.logout::<AdminProfile>(),
            IdentityKind::Moderator => self.logout::<ModeratorProfile>(),
            IdentityKind::ClubModerator => self.logout::<ClubModeratorProfile>(),
            IdentityKind::Company => self.logout::<CompanyProfile>(),
        }
    }

    /// Change only the student's status. `None` when no student is signed in.
    pub fn up_student_status(&self, status: StudentStatus) -> Option<JoinHandle<()>> {
        let changed = self.inner.slots.student.modify(|session| {
            if !session.is_authenticated() {
                return false;
            }
            session.profile_mut().status = Some(status);
            true
        });
        if !changed {
            tracing::debug!(%status, "no student session, status not updated");
            return None;
        }
        let key = IdentityKind::Student.key(keys::STATUS);
        Some(self.persist(
            IdentityKind::Student,
            vec![(key, Some(status.to_string()))],
        ))
    }

    /// Password sign-in for `E`'s kind: authenticate, load the profile, check
    /// it may sign in, then [`login`](Self::login).
    pub async fn sign_in<E: IdentityProfile>(
        &self,
        email: &str,
        password: &str,
    ) -> Result<IdentitySession<E>, SessionError> {
        let auth = self
            .inner
            .backend
            .sign_in_with_password(email, password)
            .await?;
        let (display_name, profile) = E::fetch(
            self.inner.backend.as_ref(),
            &auth.user,
            &auth.tokens.access_token,
        )
        .await?;
        if let Err(e) = profile.admit() {
            let kind = E::KIND;
            tracing::info!(%kind, user = %auth.user.id, "sign-in refused");
            return Err(e);
        }
        // Persistence continues in the background
        drop(self.login(
            Credentials::new(auth.tokens, auth.user.id),
            display_name,
            profile,
        ));
        Ok(self.session())
    }

    /// Recompute the badge for the current student and publish it.
    pub async fn update_badge_count(&self) -> Option<u32> {
        let student = self.student();
        let owner = student.credentials().map(|credentials| BadgeOwner {
            student_id: credentials.account_id.clone(),
            access_token: credentials.access_token.clone(),
            role: student.profile().role.clone(),
        });
        self.inner.badge.update(owner).await
    }

    fn spawn_badge_update(&self) {
        let context = self.clone();
        tokio::spawn(async move {
            context.update_badge_count().await;
        });
    }

    fn register_push(&self, student_id: String, access_token: String) {
        let Some(project_id) = self.inner.options.push_project_id.clone() else {
            tracing::debug!("no push project configured, skipping push registration");
            return;
        };
        let backend = self.inner.backend.clone();
        let push = self.inner.push.clone();
        tokio::spawn(async move {
            let registered = register_push_token(
                backend.as_ref(),
                push.as_ref(),
                &project_id,
                &student_id,
                &access_token,
            )
            .await;
            if let Err(e) = registered {
                tracing::warn!(error = %e, "push registration failed");
            }
        });
    }

    /// Queue a write batch for `kind` behind the previous one.
    fn persist(&self, kind: IdentityKind, entries: Vec<(String, Option<String>)>) -> JoinHandle<()> {
        let (done, finished) = oneshot::channel();
        let previous = lock(&self.inner.writes[kind.index()]).replace(finished);
        let store = self.inner.store.clone();
        tokio::spawn(async move {
            if let Some(previous) = previous {
                // Err only means the previous batch was aborted
                let _ = previous.await;
            }
            write_entries(store.as_ref(), kind, entries).await;
            let _ = done.send(());
        })
    }
}

async fn register_push_token(
    backend: &dyn Backend,
    push: &dyn PushNotifier,
    project_id: &str,
    student_id: &str,
    access_token: &str,
) -> Result<(), ApiError> {
    if !push.request_permission().await? {
        tracing::info!("push permission denied");
        return Ok(());
    }
    let token = push.push_token(project_id).await?;
    backend
        .update(
            &Query::table(tables::STUDENTS)
                .eq("id", student_id)
                .as_user(access_token),
            json!({ "expo_push_token": token }),
        )
        .await?;
    tracing::debug!(%student_id, "push token registered");
    Ok(())
}

/// Apply one batch in parallel. `None` removes the key.
async fn write_entries(
    store: &dyn SecureStore,
    kind: IdentityKind,
    entries: Vec<(String, Option<String>)>,
) {
    let writes = entries.iter().map(|(key, value)| async move {
        let result = match value {
            Some(value) => store.set(key, value).await,
            None => store.remove(key).await,
        };
        (key, result)
    });
    for (key, result) in join_all(writes).await {
        if let Err(e) = result {
            tracing::warn!(%kind, %key, error = %e, "secure store write failed");
        }
    }
}
