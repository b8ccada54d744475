//! Row models for the relations the app reads.

use serde::{Deserialize, Deserializer};

mod notification;
mod profile;
mod social;

pub use notification::{NotificationRow, RecipientType};
pub use profile::{ClubModeratorRow, CompanyRow, ModeratorRow, StudentRow, StudentStatus};
pub use social::{
    ClubAffiliationRow, GroupParticipantRow, UniversityAffiliationRow, AFFILIATION_ACTIVE,
};

/// Relation names used by the app.
pub mod tables {
    pub const STUDENTS: &str = "students";
    pub const MODERATORS: &str = "moderators";
    pub const CLUB_MODERATORS: &str = "club_moderators";
    pub const COMPANY: &str = "company";
    pub const APPLIED_UNIVERSITIES: &str = "applied_universities";
    pub const APPLIED_CLUBS: &str = "applied_clubs";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const MESSAGES: &str = "messages";
    pub const GROUP_MESSAGES: &str = "group_messages";
    pub const GROUP_PARTICIPANTS: &str = "group_participants";
}

/// Columns the data API returns as `null` when unset; read those as the default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
