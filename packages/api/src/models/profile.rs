//! # Profile rows for each identity kind
//!
//! Each signed-in principal has one profile row in a kind-specific relation.
//! Only the columns the session layer needs are modelled; unknown columns are
//! ignored on decode.
//!
//! | Struct | Relation | Session fields taken from it |
//! |--------|----------|------------------------------|
//! | [`StudentRow`] | `students` | name, role, status, language |
//! | [`ModeratorRow`] | `moderators` | name, university id |
//! | [`ClubModeratorRow`] | `club_moderators` | name, university id, club id |
//! | [`CompanyRow`] | `company` | name, status |
//!
//! Admins have no profile relation; their display name is the auth email.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a student account.
///
/// `Pending → Approved → Active`. `Suspended` blocks sign-in. Unknown values
/// from the backend decode as `Pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Approved,
    Active,
    Suspended,
    #[serde(other)]
    Pending,
}

impl StudentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Pending => "pending",
            StudentStatus::Approved => "approved",
            StudentStatus::Active => "active",
            StudentStatus::Suspended => "suspended",
        }
    }

    /// Whether the profile-completion flow should be shown.
    pub fn needs_profile_setup(&self) -> bool {
        matches!(self, StudentStatus::Approved)
    }
}

impl fmt::Display for StudentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StudentStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "approved" => StudentStatus::Approved,
            "active" => StudentStatus::Active,
            "suspended" => StudentStatus::Suspended,
            _ => StudentStatus::Pending,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StudentRow {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub status: Option<StudentStatus>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub expo_push_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeratorRow {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub university_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClubModeratorRow {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub university_id: Option<String>,
    #[serde(default)]
    pub club_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompanyRow {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_student_status_decoding() {
        let row: StudentRow = serde_json::from_value(json!({
            "id": "s-1",
            "status": "approved",
            "unrelated": 3
        }))
        .unwrap();
        assert_eq!(row.status, Some(StudentStatus::Approved));
        assert!(row.name.is_none());

        let odd: StudentRow =
            serde_json::from_value(json!({"id": "s-2", "status": "archived"})).unwrap();
        assert_eq!(odd.status, Some(StudentStatus::Pending));

        for status in ["pending", "approved", "active", "suspended"] {
            let decoded: StudentStatus = serde_json::from_value(json!(status)).unwrap();
            assert_eq!(decoded.as_str(), status);
        }
    }

    #[test]
    fn test_status_strings() {
        for status in [
            StudentStatus::Pending,
            StudentStatus::Approved,
            StudentStatus::Active,
            StudentStatus::Suspended,
        ] {
            assert_eq!(status.as_str().parse::<StudentStatus>().unwrap(), status);
        }
        assert!(StudentStatus::Approved.needs_profile_setup());
        assert!(!StudentStatus::Active.needs_profile_setup());
    }
}
