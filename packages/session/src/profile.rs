//! # Kind-specific profile extensions
//!
//! Every identity kind shares the credential fields of
//! [`IdentitySession`](crate::IdentitySession) and adds its own profile record.
//! [`IdentityProfile`] is what makes the session machinery generic over kinds:
//! it names the kind, lists the fields to persist, fetches the profile row and
//! decides whether the account may sign in.
//!
//! | Profile | Relation | Persisted suffixes | Sign-in gate |
//! |---------|----------|--------------------|--------------|
//! | [`StudentProfile`] | `students` | `Role`, `Status`, `Lang` | refused when `suspended` |
//! | [`AdminProfile`] | none (name from auth email) | none | none |
//! | [`ModeratorProfile`] | `moderators` | `UniId` | none |
//! | [`ClubModeratorProfile`] | `club_moderators` | `UniId`, `ClubId` | none |
//! | [`CompanyProfile`] | `company` | `Status` | refused when `suspended` |

use std::fmt;

use api::models::{
    tables, ClubModeratorRow, CompanyRow, ModeratorRow, StudentRow, StudentStatus,
};
use api::{backend::decode_row, ApiError, AuthUser, Backend, Query};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::identity::{IdentitySlot, Slots};
use crate::kind::keys;
use crate::{IdentityKind, SessionError};

#[async_trait]
pub trait IdentityProfile:
    Clone + fmt::Debug + Default + PartialEq + Send + Sync + 'static
{
    const KIND: IdentityKind;

    /// `(key suffix, value)` for every persisted profile field.
    fn fields(&self) -> Vec<(&'static str, Option<String>)>;

    /// Load the display name and profile for an authenticated principal,
    /// reading as that principal.
    async fn fetch(
        backend: &dyn Backend,
        user: &AuthUser,
        access_token: &str,
    ) -> Result<(Option<String>, Self), SessionError>;

    /// Whether this profile may start a new session.
    fn admit(&self) -> Result<(), SessionError> {
        Ok(())
    }

    fn slot(slots: &Slots) -> &IdentitySlot<Self>;
}

/// The kind's profile row for `id`; a missing row is [`SessionError::MissingProfile`].
async fn fetch_row<T: DeserializeOwned>(
    backend: &dyn Backend,
    kind: IdentityKind,
    table: &str,
    user: &AuthUser,
    access_token: &str,
) -> Result<T, SessionError> {
    let query = Query::table(table).eq("id", user.id.as_str()).as_user(access_token);
    match backend.select_single(&query).await {
        Ok(row) => Ok(decode_row(table, row)?),
        Err(ApiError::NotSingle { rows: 0, .. }) => Err(SessionError::MissingProfile(kind)),
        Err(e) => Err(e.into()),
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StudentProfile {
    pub role: Option<String>,
    pub status: Option<StudentStatus>,
    pub language: Option<String>,
}

#[async_trait]
impl IdentityProfile for StudentProfile {
    const KIND: IdentityKind = IdentityKind::Student;

    fn fields(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            (keys::ROLE, self.role.clone()),
            (keys::STATUS, self.status.map(|s| s.to_string())),
            (keys::LANGUAGE, self.language.clone()),
        ]
    }

    async fn fetch(
        backend: &dyn Backend,
        user: &AuthUser,
        access_token: &str,
    ) -> Result<(Option<String>, Self), SessionError> {
        let row: StudentRow =
            fetch_row(backend, Self::KIND, tables::STUDENTS, user, access_token).await?;
        let profile = StudentProfile {
            role: row.role,
            status: row.status,
            language: row.language,
        };
        Ok((row.name, profile))
    }

    fn admit(&self) -> Result<(), SessionError> {
        match self.status {
            Some(StudentStatus::Suspended) => Err(SessionError::Suspended(Self::KIND)),
            _ => Ok(()),
        }
    }

    fn slot(slots: &Slots) -> &IdentitySlot<Self> {
        &slots.student
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdminProfile {}

#[async_trait]
impl IdentityProfile for AdminProfile {
    const KIND: IdentityKind = IdentityKind::Admin;

    fn fields(&self) -> Vec<(&'static str, Option<String>)> {
        Vec::new()
    }

    async fn fetch(
        _backend: &dyn Backend,
        user: &AuthUser,
        _access_token: &str,
    ) -> Result<(Option<String>, Self), SessionError> {
        Ok((user.email.clone(), AdminProfile {}))
    }

    fn slot(slots: &Slots) -> &IdentitySlot<Self> {
        &slots.admin
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModeratorProfile {
    pub university_id: Option<String>,
}

#[async_trait]
impl IdentityProfile for ModeratorProfile {
    const KIND: IdentityKind = IdentityKind::Moderator;

    fn fields(&self) -> Vec<(&'static str, Option<String>)> {
        vec![(keys::UNIVERSITY_ID, self.university_id.clone())]
    }

    async fn fetch(
        backend: &dyn Backend,
        user: &AuthUser,
        access_token: &str,
    ) -> Result<(Option<String>, Self), SessionError> {
        let row: ModeratorRow =
            fetch_row(backend, Self::KIND, tables::MODERATORS, user, access_token).await?;
        Ok((
            row.name,
            ModeratorProfile {
                university_id: row.university_id,
            },
        ))
    }

    fn slot(slots: &Slots) -> &IdentitySlot<Self> {
        &slots.moderator
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClubModeratorProfile {
    pub university_id: Option<String>,
    pub club_id: Option<String>,
}

#[async_trait]
impl IdentityProfile for ClubModeratorProfile {
    const KIND: IdentityKind = IdentityKind::ClubModerator;

    fn fields(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            (keys::UNIVERSITY_ID, self.university_id.clone()),
            (keys::CLUB_ID, self.club_id.clone()),
        ]
    }

    async fn fetch(
        backend: &dyn Backend,
        user: &AuthUser,
        access_token: &str,
    ) -> Result<(Option<String>, Self), SessionError> {
        let row: ClubModeratorRow =
            fetch_row(backend, Self::KIND, tables::CLUB_MODERATORS, user, access_token).await?;
        Ok((
            row.name,
            ClubModeratorProfile {
                university_id: row.university_id,
                club_id: row.club_id,
            },
        ))
    }

    fn slot(slots: &Slots) -> &IdentitySlot<Self> {
        &slots.club_moderator
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompanyProfile {
    pub status: Option<String>,
}

#[async_trait]
impl IdentityProfile for CompanyProfile {
    const KIND: IdentityKind = IdentityKind::Company;

    fn fields(&self) -> Vec<(&'static str, Option<String>)> {
        vec![(keys::STATUS, self.status.clone())]
    }

    async fn fetch(
        backend: &dyn Backend,
        user: &AuthUser,
        access_token: &str,
    ) -> Result<(Option<String>, Self), SessionError> {
        let row: CompanyRow =
            fetch_row(backend, Self::KIND, tables::COMPANY, user, access_token).await?;
        Ok((row.name, CompanyProfile { status: row.status }))
    }

    fn admit(&self) -> Result<(), SessionError> {
        match self.status.as_deref() {
            Some("suspended") => Err(SessionError::Suspended(Self::KIND)),
            _ => Ok(()),
        }
    }

    fn slot(slots: &Slots) -> &IdentitySlot<Self> {
        &slots.company
    }
}
