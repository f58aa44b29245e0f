//! Wire contract shared by the client transport and the server.
//!
//! Payloads are decoded once, strictly, at this boundary. The only lenient
//! fields are timestamps, which fall back to "now" where they are consumed.

use serde::{Deserialize, Serialize};

/// A note as pushed by a client in a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientNote {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default, with = "flag")]
    pub temp_delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// `POST /notes/sync` body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub notes: Vec<ClientNote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,
}

impl SyncRequest {
    /// Whether the server should return every note rather than a delta
    pub const fn is_full_fetch(&self) -> bool {
        self.last_sync_time.is_none()
    }
}

/// A note as stored by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNote {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    pub is_draft: bool,
    #[serde(with = "flag")]
    pub temp_delete: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub synced_at: Option<String>,
}

/// A note the server failed to accept, optionally with its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub note_id: String,
    pub reason: String,
    #[serde(default)]
    pub server_note: Option<ServerNote>,
}

/// `POST /notes/sync` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub server_notes: Vec<ServerNote>,
    pub conflicts: Vec<SyncConflict>,
    pub synced: Vec<String>,
    pub sync_time: String,
}

/// `POST /notes` body. `id` lets the client choose the canonical id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNoteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_draft: bool,
}

/// `PUT /notes/{id}` body; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNoteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_draft: Option<bool>,
}

impl UpdateNoteRequest {
    pub const fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.is_draft.is_none()
    }
}

/// Entry of `GET /notes/trash/all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashedNote {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    pub deleted_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashListResponse {
    pub notes: Vec<TrashedNote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteListResponse {
    pub notes: Vec<ServerNote>,
}

/// A note permanently removed on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedNote {
    pub id: String,
    pub deleted_at: String,
}

/// `GET /notes/trash/sync` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedNotesFeed {
    pub deleted_notes: Vec<DeletedNote>,
    pub last_sync_time: String,
}

/// Plain `{ "message": ... }` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Reasons reported in [`SyncConflict::reason`].
pub mod conflict_reason {
    pub const SYNC_ERROR: &str = "sync_error";
    pub const CONTENT_WRITE_FAILED: &str = "content_write_failed";
    pub const INVALID_NOTE: &str = "invalid_note";
}

/// `temp_delete` travels as the integer 0 or 1; anything else is rejected.
mod flag {
    use serde::de::{Error, Unexpected};
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(D::Error::invalid_value(
                Unexpected::Unsigned(u64::from(other)),
                &"0 or 1",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn sync_request_uses_camel_case_cursor() {
        let request = SyncRequest {
            notes: vec![ClientNote {
                id: "abc123".to_string(),
                title: "Groceries".to_string(),
                content: "milk".to_string(),
                is_draft: false,
                temp_delete: true,
                created_at: Some("2024-01-01 00:00:00".to_string()),
                updated_at: Some("2024-01-02 00:00:00".to_string()),
            }],
            last_sync_time: Some("2024-01-03 00:00:00".to_string()),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "notes": [{
                    "id": "abc123",
                    "title": "Groceries",
                    "content": "milk",
                    "is_draft": false,
                    "temp_delete": 1,
                    "created_at": "2024-01-01 00:00:00",
                    "updated_at": "2024-01-02 00:00:00"
                }],
                "lastSyncTime": "2024-01-03 00:00:00"
            })
        );
        assert!(!request.is_full_fetch());
    }

    #[test]
    fn sync_response_decodes_conflicts() {
        let response: SyncResponse = serde_json::from_value(json!({
            "serverNotes": [],
            "conflicts": [{"noteId": "x", "reason": "sync_error", "serverNote": null}],
            "synced": ["y"],
            "syncTime": "2024-01-01 00:00:00"
        }))
        .unwrap();

        assert_eq!(response.conflicts[0].note_id, "x");
        assert!(response.conflicts[0].server_note.is_none());
        assert_eq!(response.synced, vec!["y".to_string()]);
    }

    #[test]
    fn rejects_non_binary_temp_delete() {
        let result = serde_json::from_value::<ServerNote>(json!({
            "id": "a",
            "title": "t",
            "is_draft": false,
            "temp_delete": 2
        }));
        assert!(result.is_err());

        let result = serde_json::from_value::<ServerNote>(json!({
            "id": "a",
            "title": "t",
            "is_draft": false,
            "temp_delete": "yes"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_response_missing_required_fields() {
        let result = serde_json::from_value::<SyncResponse>(json!({
            "serverNotes": [],
            "synced": []
        }));
        assert!(result.is_err());
    }
}
