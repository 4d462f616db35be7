use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ItemId = String;
pub type CommunityId = String;
pub type UserId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: String,
    pub community_id: CommunityId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub comment_count: u32,
    // Derived by the activity engine, never trusted from the wire
    #[serde(default)]
    pub is_trending: bool,
    /// Newest comment not written by this item's author, whoever is viewing.
    #[serde(default)]
    pub latest_other_comment_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Most recent moment anything happened on this item, used to order personal activity.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        match self.latest_other_comment_at {
            Some(at) if at > self.created_at => at,
            _ => self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub item_id: ItemId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A university board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub is_subscribed: bool,
    #[serde(default)]
    pub item_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewer {
    pub id: UserId,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    SignedIn(Viewer),
    SignedOut,
}

impl SessionState {
    pub fn viewer(&self) -> Option<&Viewer> {
        match self {
            SessionState::SignedIn(viewer) => Some(viewer),
            _ => None,
        }
    }

    pub fn viewer_id(&self) -> Option<&str> {
        self.viewer().map(|v| v.id.as_str())
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, SessionState::Pending)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalActivity {
    #[serde(default)]
    pub authored: Vec<Item>,
    #[serde(default)]
    pub commented_on: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub item_id: ItemId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn item_decodes_from_service_json_without_derived_fields() {
        let json = r#"{
            "id": "p1",
            "title": "Dorm wifi down again",
            "authorId": "u7",
            "communityId": "mit",
            "createdAt": "2024-03-01T10:00:00Z",
            "commentCount": 3
        }"#;
        let item: Item = serde_json::from_str(json).unwrap();
        assert_eq!(item.community_id, "mit");
        assert_eq!(item.comment_count, 3);
        assert!(!item.is_trending);
        assert_eq!(item.latest_other_comment_at, None);
        assert_eq!(item.body, "");
    }

    #[test]
    fn last_activity_prefers_newer_comment() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let mut item: Item = serde_json::from_value(serde_json::json!({
            "id": "p1", "title": "t", "authorId": "a", "communityId": "c",
            "createdAt": created,
        }))
        .unwrap();
        assert_eq!(item.last_activity_at(), created);

        let later = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        item.latest_other_comment_at = Some(later);
        assert_eq!(item.last_activity_at(), later);
    }
}
