use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, ImageContext, Message};

/// Everything that can change a conversation. Fed to `state::reduce`, and
/// forwarded to subscribers alongside the resulting state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    // Composer events
    InputChanged {
        text: String,
    },

    // Attachment lifecycle
    AttachmentSelected {
        attachment: Attachment,
    },
    AttachmentAnalyzed {
        attachment_id: Uuid,
        caption: Option<String>,
        extracted_text: Option<String>,
    },
    AttachmentFailed {
        attachment_id: Uuid,
        diagnostic: String,
    },
    AttachmentRemoved {
        attachment_id: Uuid,
    },

    // Turn lifecycle
    TurnSubmitted {
        message: Message,
        #[serde(skip_serializing_if = "Option::is_none")]
        consumed_attachment: Option<Uuid>,
        context: ImageContext,
    },
    PrimaryRequested,
    ImageGenerationRequested {
        prompt: String,
    },
    AssistantReplied {
        message: Message,
    },
    TurnFailed {
        message: Message,
    },
}
