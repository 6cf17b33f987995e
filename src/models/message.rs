use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::{DocumentRef, StoredDocument};

/// Display name used when the sender has none.
pub const ANONYMOUS_SENDER_NAME: &str = "익명";

/// Blob path prefix for photo attachments.
pub const IMAGE_PATH_PREFIX: &str = "images/";

/// Field holding the server-assigned creation timestamp.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Message fields as stored in the document store.
///
/// Field names follow the chat client's wire shape (`senderUid`, `imageUrl`,
/// `storagePath`). The creation timestamp is owned by the store and lives on
/// [`StoredDocument`], not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFields {
    pub sender_uid: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
}

/// A chat message read back from the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub reference: DocumentRef,
    pub created_at: DateTime<Utc>,
    pub fields: MessageFields,
}

impl MessageRecord {
    /// Decode a stored document into a message.
    pub fn from_document(doc: &StoredDocument) -> Result<Self, serde_json::Error> {
        let fields: MessageFields = serde_json::from_value(Value::Object(doc.fields.clone()))?;
        Ok(Self {
            reference: doc.reference.clone(),
            created_at: doc.created_at,
            fields,
        })
    }

    pub fn id(&self) -> &str {
        &self.reference.id
    }

    /// Path of the attached blob, if the message carries a photo.
    ///
    /// Requires both the image URL and the storage path; a message carrying
    /// only one of them has no deletable blob.
    pub fn blob_path(&self) -> Option<&str> {
        match (non_empty(&self.fields.image_url), non_empty(&self.fields.storage_path)) {
            (Some(_), Some(path)) => Some(path),
            _ => None,
        }
    }

    /// True when exactly one of image URL / storage path is set.
    pub fn has_inconsistent_attachment(&self) -> bool {
        non_empty(&self.fields.image_url).is_some() != non_empty(&self.fields.storage_path).is_some()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Blob path of a stored message, read from the raw fields.
///
/// Works on documents that fail to decode as a [`MessageRecord`], so a photo
/// is never stranded by an unrelated bad field.
pub fn stored_blob_path(fields: &Map<String, Value>) -> Option<&str> {
    match (string_field(fields, "imageUrl"), string_field(fields, "storagePath")) {
        (Some(_), Some(path)) => Some(path),
        _ => None,
    }
}

/// True when exactly one of `imageUrl` / `storagePath` is set in the raw fields.
pub fn stored_attachment_is_inconsistent(fields: &Map<String, Value>) -> bool {
    string_field(fields, "imageUrl").is_some() != string_field(fields, "storagePath").is_some()
}

fn string_field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Errors from the chat-send path's message validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageValidationError {
    #[error("sender uid is required")]
    MissingSender,

    #[error("message text cannot be empty")]
    EmptyText,

    #[error("a photo message needs a memo")]
    PhotoWithoutMemo,

    #[error("image url and storage path must be set together")]
    IncompleteAttachment,

    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Photo attachment already uploaded to blob storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub image_url: String,
    pub storage_path: String,
}

/// A message as submitted by the chat-send path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_uid: String,
    pub sender_name: Option<String>,
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl NewMessage {
    /// Validate and convert into the stored field map.
    pub fn into_fields(self) -> Result<Map<String, Value>, MessageValidationError> {
        let sender_uid = self.sender_uid.trim().to_string();
        if sender_uid.is_empty() {
            return Err(MessageValidationError::MissingSender);
        }

        let text = self.text.trim().to_string();
        if text.is_empty() {
            return Err(match self.attachment {
                Some(_) => MessageValidationError::PhotoWithoutMemo,
                None => MessageValidationError::EmptyText,
            });
        }

        let (image_url, storage_path) = match self.attachment {
            Some(Attachment {
                image_url,
                storage_path,
            }) => {
                if image_url.trim().is_empty() || storage_path.trim().is_empty() {
                    return Err(MessageValidationError::IncompleteAttachment);
                }
                (Some(image_url), Some(storage_path))
            }
            None => (None, None),
        };

        let sender_name = self
            .sender_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| ANONYMOUS_SENDER_NAME.to_string());

        let fields = MessageFields {
            sender_uid,
            sender_name,
            memo: Some(text),
            image_url,
            storage_path,
        };

        match serde_json::to_value(fields)
            .map_err(|e| MessageValidationError::Encode(e.to_string()))?
        {
            Value::Object(map) => Ok(map),
            other => Err(MessageValidationError::Encode(format!(
                "expected an object, got {other}"
            ))),
        }
    }
}

/// Blob path for a photo uploaded by `sender_uid` at `uploaded_at`.
pub fn image_storage_path(sender_uid: &str, uploaded_at: DateTime<Utc>) -> String {
    format!(
        "{IMAGE_PATH_PREFIX}{sender_uid}_{}.jpg",
        uploaded_at.timestamp_millis()
    )
}
