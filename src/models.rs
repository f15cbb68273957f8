use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::types::{FileSize, MimeType};

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Error,
}

/// One entry of the conversation log. Never changed after it is appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: i64,
}

impl Message {
    fn new(role: Role, content: impl Into<String>, image_url: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            content: content.into(),
            image_url,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn user(content: impl Into<String>, image_url: Option<String>) -> Self {
        Self::new(Role::User, content, image_url)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, None)
    }

    pub fn assistant_with_image(content: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, Some(image_url.into()))
    }

    /// Error messages never carry an image.
    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Role::Error, content, None)
    }
}

// ============================================================================
// Attachments
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttachmentStatus {
    Analyzing,
    Ready,
    Failed,
}

impl AttachmentStatus {
    /// Analysis is over, whatever its outcome.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Analyzing)
    }
}

/// How a file reached us. Drops are filtered on media type, picks are not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FileSource {
    #[default]
    Picker,
    Drop,
}

/// A selected or dropped file, as received.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub media_type: MimeType,
    pub bytes: Bytes,
}

impl ImageFile {
    pub fn new(file_name: impl Into<String>, media_type: MimeType, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            media_type,
            bytes,
        }
    }

    pub fn size(&self) -> FileSize {
        FileSize::bytes(self.bytes.len() as u64)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub id: Uuid,
    pub file_name: String,
    pub media_type: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    pub preview_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    pub status: AttachmentStatus,
}

impl Attachment {
    pub fn analyzing(
        id: Uuid,
        file: &ImageFile,
        dimensions: Option<Dimensions>,
        preview_uri: impl Into<String>,
    ) -> Self {
        Self {
            id,
            file_name: file.file_name.clone(),
            media_type: file.media_type.to_string(),
            size: file.size().as_bytes(),
            dimensions,
            preview_uri: preview_uri.into(),
            caption: None,
            extracted_text: None,
            status: AttachmentStatus::Analyzing,
        }
    }

    /// Side context for the chat call. Only a `ready` attachment contributes.
    pub fn context(&self) -> ImageContext {
        match self.status {
            AttachmentStatus::Ready => ImageContext {
                caption: self.caption.clone(),
                extracted_text: self.extracted_text.clone(),
            },
            _ => ImageContext::default(),
        }
    }
}

/// Caption and extracted text handed to the chat call alongside the message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageContext {
    pub caption: Option<String>,
    pub extracted_text: Option<String>,
}

impl ImageContext {
    pub fn is_empty(&self) -> bool {
        self.caption.is_none() && self.extracted_text.is_none()
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub messages: usize,
    pub turn_in_progress: bool,
}

impl HealthStatus {
    pub fn healthy(messages: usize, turn_in_progress: bool) -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            messages,
            turn_in_progress,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn file() -> ImageFile {
        ImageFile::new("cat.png", MimeType::new("image/png"), Bytes::from_static(b"png"))
    }

    #[test]
    fn test_error_message_has_no_image() {
        let msg = Message::error("boom");
        assert_eq!(msg.role, Role::Error);
        assert!(msg.image_url.is_none());
    }

    #[test]
    fn test_only_ready_attachment_gives_context() {
        let mut attachment = Attachment::analyzing(Uuid::now_v7(), &file(), None, "/p/1");
        attachment.caption = Some("a cat".into());
        assert!(attachment.context().is_empty());

        attachment.status = AttachmentStatus::Failed;
        assert!(attachment.context().is_empty());

        attachment.status = AttachmentStatus::Ready;
        assert_eq!(attachment.context().caption.as_deref(), Some("a cat"));
        assert!(attachment.status.is_settled());
    }

    #[test]
    fn test_role_and_source_strings() {
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(FileSource::from_str("drop").unwrap(), FileSource::Drop);
        assert_eq!(AttachmentStatus::Analyzing.to_string(), "analyzing");
        let json = serde_json::to_string(&Message::user("hi", None)).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(!json.contains("image_url"));
    }
}
