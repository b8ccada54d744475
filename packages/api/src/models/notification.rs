use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::null_as_default;

/// Who a notification is addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    /// Every student.
    All,
    /// Students listed in `recipient_ids`.
    Specific,
    /// Students whose role is in `recipient_roles`.
    Role,
    /// Students affiliated with a university in `recipient_universities`.
    University,
    /// Members of `recipient_club`.
    Club,
    /// Anything newer clients may send; addressed to nobody here.
    #[serde(other)]
    Unknown,
}

/// A row of the `notifications` relation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub recipient_type: RecipientType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recipient_ids: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recipient_roles: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recipient_universities: Vec<String>,
    #[serde(default)]
    pub recipient_club: Option<String>,
    /// Ids of the principals that have read this notification.
    #[serde(default, deserialize_with = "null_as_default")]
    pub read_by: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active", deserialize_with = "null_as_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

fn null_as_active<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or_else(default_active))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sparse_notification_decodes() {
        let row: NotificationRow = serde_json::from_value(json!({
            "id": "n-1",
            "recipient_type": "university",
            "recipient_universities": ["u-1"],
            "expires_at": "2030-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(row.recipient_type, RecipientType::University);
        assert!(row.read_by.is_empty());
        assert!(row.is_active);
        assert!(row.expires_at.is_some());

        let future: NotificationRow =
            serde_json::from_value(json!({"id": "n-2", "recipient_type": "cohort"})).unwrap();
        assert_eq!(future.recipient_type, RecipientType::Unknown);
    }

    #[test]
    fn test_null_columns_decode_as_defaults() {
        let row: NotificationRow = serde_json::from_value(json!({
            "id": "n-3",
            "title": "Welcome week",
            "body": null,
            "recipient_type": "all",
            "recipient_ids": null,
            "recipient_roles": null,
            "recipient_universities": null,
            "recipient_club": null,
            "read_by": null,
            "expires_at": null,
            "is_active": null
        }))
        .unwrap();
        assert_eq!(row.recipient_type, RecipientType::All);
        assert!(row.recipient_ids.is_empty());
        assert!(row.recipient_roles.is_empty());
        assert!(row.recipient_universities.is_empty());
        assert!(row.read_by.is_empty());
        assert!(row.is_active);
        assert!(row.expires_at.is_none());
    }
}
