use api::AuthTokens;
use tokio::sync::watch;

use crate::kind::keys;
use crate::profile::{
    AdminProfile, ClubModeratorProfile, CompanyProfile, IdentityProfile, ModeratorProfile,
    StudentProfile,
};

/// The three fields that are either all present or all absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub account_id: String,
}

impl Credentials {
    pub fn new(tokens: AuthTokens, account_id: impl Into<String>) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            account_id: account_id.into(),
        }
    }
}

/// One identity kind's session: credentials, display name and the
/// kind-specific profile fields.
///
/// Anonymous is `credentials == None` with every other field at its default;
/// the constructors below are the only way to build one, so a half-populated
/// session cannot exist.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdentitySession<E> {
    credentials: Option<Credentials>,
    display_name: Option<String>,
    profile: E,
}

impl<E: IdentityProfile> IdentitySession<E> {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(credentials: Credentials, display_name: Option<String>, profile: E) -> Self {
        Self {
            credentials: Some(credentials),
            display_name,
            profile,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.access_token.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.refresh_token.as_str())
    }

    pub fn account_id(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.account_id.as_str())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn profile(&self) -> &E {
        &self.profile
    }

    pub(crate) fn profile_mut(&mut self) -> &mut E {
        &mut self.profile
    }

    /// Every secure-storage key of this kind with the value it should hold.
    /// `None` means the key is removed, so an anonymous session maps to a
    /// full erase.
    pub fn persisted_entries(&self) -> Vec<(String, Option<String>)> {
        let kind = E::KIND;
        let credentials = self.credentials.as_ref();
        let mut entries = vec![
            (
                kind.key(keys::ACCESS_TOKEN),
                credentials.map(|c| c.access_token.clone()),
            ),
            (
                kind.key(keys::REFRESH_TOKEN),
                credentials.map(|c| c.refresh_token.clone()),
            ),
            (
                kind.key(keys::ACCOUNT_ID),
                credentials.map(|c| c.account_id.clone()),
            ),
            (kind.key(keys::NAME), self.display_name.clone()),
        ];
        entries.extend(
            self.profile
                .fields()
                .into_iter()
                .map(|(suffix, value)| (kind.key(suffix), value)),
        );
        entries
    }
}

/// Observable holder of one kind's session.
///
/// Every transition is a single `send_replace`/`send_if_modified`, so readers
/// never see a session between two field writes.
#[derive(Debug)]
pub struct IdentitySlot<E> {
    tx: watch::Sender<IdentitySession<E>>,
}

impl<E: IdentityProfile> Default for IdentitySlot<E> {
    fn default() -> Self {
        let (tx, _) = watch::channel(IdentitySession::anonymous());
        Self { tx }
    }
}

impl<E: IdentityProfile> IdentitySlot<E> {
    pub fn current(&self) -> IdentitySession<E> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<IdentitySession<E>> {
        self.tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_authenticated()
    }

    pub(crate) fn replace(&self, session: IdentitySession<E>) -> IdentitySession<E> {
        self.tx.send_replace(session)
    }

    pub(crate) fn modify(&self, f: impl FnOnce(&mut IdentitySession<E>) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }
}

/// The five slots, one per identity kind.
#[derive(Debug, Default)]
pub struct Slots {
    pub student: IdentitySlot<StudentProfile>,
    pub admin: IdentitySlot<AdminProfile>,
    pub moderator: IdentitySlot<ModeratorProfile>,
    pub club_moderator: IdentitySlot<ClubModeratorProfile>,
    pub company: IdentitySlot<CompanyProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::models::StudentStatus;

    fn credentials() -> Credentials {
        Credentials::new(
            AuthTokens {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
            },
            "s-1",
        )
    }

    #[test]
    fn test_anonymous_entries_erase_every_key() {
        let entries = IdentitySession::<StudentProfile>::anonymous().persisted_entries();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "studentUSTkn",
                "studentUSRfTkn",
                "studentUSId",
                "studentUSName",
                "studentUSRole",
                "studentUSStatus",
                "studentUSLang",
            ]
        );
        assert!(entries.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_authenticated_entries() {
        let profile = StudentProfile {
            role: Some("student".to_string()),
            status: Some(StudentStatus::Active),
            language: None,
        };
        let session = IdentitySession::authenticated(credentials(), Some("Ada".to_string()), profile);
        let entries = session.persisted_entries();
        assert!(entries.contains(&("studentUSTkn".to_string(), Some("a".to_string()))));
        assert!(entries.contains(&("studentUSStatus".to_string(), Some("active".to_string()))));
        assert!(entries.contains(&("studentUSLang".to_string(), None)));
    }

    #[test]
    fn test_slot_replace_notifies() {
        let slot = IdentitySlot::<ModeratorProfile>::default();
        let mut rx = slot.subscribe();
        assert!(!slot.is_authenticated());

        slot.replace(IdentitySession::authenticated(
            credentials(),
            None,
            ModeratorProfile::default(),
        ));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().account_id(), Some("s-1"));

        // Clearing an anonymous slot through `modify` reports no change
        assert!(!slot.modify(|_| false));
        assert!(!rx.has_changed().unwrap());
    }
}
