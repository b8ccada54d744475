use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status value of an affiliation that counts as current membership.
pub const AFFILIATION_ACTIVE: &str = "active";

/// A row of `applied_universities`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniversityAffiliationRow {
    pub student_id: String,
    pub university_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// A row of `applied_clubs`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClubAffiliationRow {
    pub student_id: String,
    pub club_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// A student's seat in a group chat, with the read watermark.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupParticipantRow {
    pub group_id: String,
    pub student_id: String,
    #[serde(default)]
    pub last_read_at: Option<DateTime<Utc>>,
}
