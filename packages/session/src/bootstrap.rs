//! # Session bootstrap
//!
//! Runs once at startup and silently restores every identity kind that left
//! credentials behind. The five kinds are restored concurrently and
//! independently: one kind failing never affects another.
//!
//! Per kind:
//!
//! 1. read the persisted access and refresh tokens;
//! 2. if either is missing, log the kind out and stop (no refresh attempt);
//! 3. resolve the account id from the access token;
//! 4. fetch the kind's profile row;
//! 5. trade the refresh token for a new pair and log in with it.
//!
//! Any failure in steps 3–5 logs the kind out. There are no retries; the user
//! signs in again.

use crate::identity::Credentials;
use crate::kind::keys;
use crate::profile::{
    AdminProfile, ClubModeratorProfile, CompanyProfile, IdentityProfile, ModeratorProfile,
    StudentProfile,
};
use crate::{IdentityKind, SessionContext, SessionError};

/// Outcome of [`SessionContext::bootstrap`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Kinds whose session was restored, in [`IdentityKind::ALL`] order.
    pub restored: Vec<IdentityKind>,
}

impl SessionContext {
    /// Restore every kind from the secure store. The loading flag is raised
    /// for the duration and cleared once all five kinds have settled.
    pub async fn bootstrap(&self) -> BootstrapReport {
        self.set_loading(true);
        let (student, admin, moderator, club_moderator, company) = tokio::join!(
            self.restore::<StudentProfile>(),
            self.restore::<AdminProfile>(),
            self.restore::<ModeratorProfile>(),
            self.restore::<ClubModeratorProfile>(),
            self.restore::<CompanyProfile>(),
        );
        let restored = IdentityKind::ALL
            .into_iter()
            .zip([student, admin, moderator, club_moderator, company])
            .filter_map(|(kind, restored)| restored.then_some(kind))
            .collect::<Vec<_>>();
        self.set_loading(false);
        tracing::info!(?restored, "session bootstrap finished");
        BootstrapReport { restored }
    }

    async fn restore<E: IdentityProfile>(&self) -> bool {
        let kind = E::KIND;
        let access = self.read_key(kind, keys::ACCESS_TOKEN).await;
        let refresh = self.read_key(kind, keys::REFRESH_TOKEN).await;

        let (Some(access), Some(refresh)) = (access, refresh) else {
            tracing::debug!(%kind, "no persisted session");
            let _ = self.logout::<E>().await;
            return false;
        };

        match self.renew::<E>(&access, &refresh).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "session restore failed, logging out");
                let _ = self.logout::<E>().await;
                false
            }
        }
    }

    async fn renew<E: IdentityProfile>(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<(), SessionError> {
        let backend = self.backend();
        let user = backend
            .get_user(access_token)
            .await?
            .ok_or(SessionError::UnknownAccount)?;
        let (display_name, profile) = E::fetch(backend.as_ref(), &user, access_token).await?;
        let tokens = backend.refresh_session(refresh_token).await?;

        let persisted = self.login(Credentials::new(tokens, user.id), display_name, profile);
        let _ = persisted.await;
        Ok(())
    }

    /// Store errors read as "absent".
    async fn read_key(&self, kind: IdentityKind, suffix: &str) -> Option<String> {
        let key = kind.key(suffix);
        match self.store().get(&key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(%key, error = %e, "secure store read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use crate::IdentitySession;
    use api::models::{tables, StudentStatus};
    use serde_json::json;
    use store::SecureStore;

    fn seed_profiles(harness: &Harness) {
        harness.backend.seed(
            tables::STUDENTS,
            [json!({"id": "s-1", "name": "Ada", "role": "student", "status": "active", "language": "en"})],
        );
        harness.backend.seed(
            tables::MODERATORS,
            [json!({"id": "m-1", "name": "Grace", "university_id": "u-1"})],
        );
    }

    #[tokio::test]
    async fn test_loading_flag() {
        let harness = Harness::new();
        assert!(harness.ctx.is_loading());
        let report = harness.ctx.bootstrap().await;
        assert!(!harness.ctx.is_loading());
        assert!(report.restored.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_persisted_skips_refresh() {
        let harness = Harness::new();
        harness.ctx.bootstrap().await;

        assert!(harness.ctx.authenticated_kinds().is_empty());
        assert_eq!(harness.backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_logs_out() {
        let harness = Harness::new();
        seed_profiles(&harness);
        harness.persist_tokens(IdentityKind::Student, "s-1").await;
        harness.store.remove("studentUSRfTkn").await.unwrap();

        let report = harness.ctx.bootstrap().await;
        assert!(report.restored.is_empty());
        assert_eq!(harness.backend.refresh_calls(), 0);
        // The stray access token is erased too
        assert!(harness.stored("studentUSTkn").is_none());
    }

    #[tokio::test]
    async fn test_restores_student_with_rotated_tokens() {
        let harness = Harness::new();
        seed_profiles(&harness);
        let old = harness.persist_tokens(IdentityKind::Student, "s-1").await;

        let report = harness.ctx.bootstrap().await;
        assert_eq!(report.restored, vec![IdentityKind::Student]);

        let student = harness.ctx.student();
        assert_eq!(student.account_id(), Some("s-1"));
        assert_eq!(student.display_name(), Some("Ada"));
        assert_eq!(student.profile().status, Some(StudentStatus::Active));
        assert_ne!(student.refresh_token(), Some(old.refresh_token.as_str()));
        assert_eq!(
            harness.stored("studentUSRfTkn").as_deref(),
            student.refresh_token()
        );
        assert_eq!(harness.stored("studentUSLang").as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_rejected_refresh_logs_out() {
        let harness = Harness::new();
        seed_profiles(&harness);
        let tokens = harness.persist_tokens(IdentityKind::Student, "s-1").await;
        harness.backend.revoke_refresh_token(&tokens.refresh_token);

        let report = harness.ctx.bootstrap().await;
        assert!(report.restored.is_empty());
        assert_eq!(harness.backend.refresh_calls(), 1);
        assert_eq!(harness.ctx.student(), IdentitySession::anonymous());
        assert!(harness.store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_failing_kind_does_not_block_others() {
        let harness = Harness::new();
        seed_profiles(&harness);
        harness.persist_tokens(IdentityKind::Student, "s-1").await;
        let moderator = harness.persist_tokens(IdentityKind::Moderator, "m-1").await;
        harness.backend.poison_refresh_token(&moderator.refresh_token);

        let report = harness.ctx.bootstrap().await;
        assert_eq!(report.restored, vec![IdentityKind::Student]);
        assert!(harness.ctx.student().is_authenticated());
        assert!(!harness.ctx.moderator().is_authenticated());
        assert!(harness.stored("moderatorUSTkn").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_restores_keep_their_own_tokens() {
        let harness = Harness::new();
        seed_profiles(&harness);
        let student = harness.persist_tokens(IdentityKind::Student, "s-1").await;
        let moderator = harness.persist_tokens(IdentityKind::Moderator, "m-1").await;

        let report = harness.ctx.bootstrap().await;
        assert_eq!(
            report.restored,
            vec![IdentityKind::Student, IdentityKind::Moderator]
        );

        // Profiles are read with the persisted token of their own kind
        assert_eq!(
            harness.backend.bearers(tables::MODERATORS),
            vec![Some(moderator.access_token)]
        );
        assert_eq!(
            harness.backend.bearers(tables::STUDENTS)[0],
            Some(student.access_token)
        );
        let renewed = harness.ctx.student().access_token().map(str::to_string);
        assert!(harness
            .backend
            .bearers(tables::NOTIFICATIONS)
            .iter()
            .all(|b| *b == renewed));
    }

    #[tokio::test]
    async fn test_missing_profile_row_logs_out() {
        let harness = Harness::new();
        harness.persist_tokens(IdentityKind::ClubModerator, "c-1").await;

        let report = harness.ctx.bootstrap().await;
        assert!(report.restored.is_empty());
        // Profile is fetched before refreshing, so the token was never spent
        assert_eq!(harness.backend.refresh_calls(), 0);
        assert!(!harness.ctx.is_authenticated(IdentityKind::ClubModerator));
    }

    #[tokio::test]
    async fn test_unreadable_store_reads_as_logged_out() {
        let harness = Harness::new();
        harness.persist_tokens(IdentityKind::Admin, "a-1").await;
        harness.store.set_unavailable(true);

        let report = harness.ctx.bootstrap().await;
        assert!(report.restored.is_empty());
        assert!(!harness.ctx.is_loading());
    }
}
