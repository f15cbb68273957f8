use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};
use crate::init::AiConfig;

pub const SYSTEM_PROMPT: &str = "You are an AI assistant that helps people find detailed \
information on web-browsers or from the context they provide or attach to you. If the user \
asks for an image, respond with the text 'GENERATE_IMAGE: ' followed by a detailed prompt for \
DALL-E 3 to generate the requested image.";

pub const CAPTION_HEADER: &str = "Image description:";
pub const EXTRACTED_TEXT_HEADER: &str = "Text extracted from the image:";

/// The user turn: the message, then each present context section after a
/// blank line under its own header.
pub fn compose_user_turn(
    message: &str,
    caption: Option<&str>,
    extracted_text: Option<&str>,
) -> String {
    let mut content = message.to_string();
    let sections = [(CAPTION_HEADER, caption), (EXTRACTED_TEXT_HEADER, extracted_text)];
    for (header, body) in sections {
        if let Some(body) = body.map(str::trim).filter(|b| !b.is_empty()) {
            content.push_str("\n\n");
            content.push_str(header);
            content.push('\n');
            content.push_str(body);
        }
    }
    content
}

// ============================================================================
// Chat completion
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(
        config: &AiConfig,
        message: &str,
        caption: Option<&str>,
        extracted_text: Option<&str>,
    ) -> Self {
        Self {
            messages: vec![
                ChatTurn {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatTurn {
                    role: "user",
                    content: compose_user_turn(message, caption, extracted_text),
                },
            ],
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }

    pub fn user_content_len(&self) -> usize {
        self.messages.last().map(|m| m.content.len()).unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl ChatResponse {
    pub fn into_content(self) -> ServiceResult<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| ServiceError::malformed("response has no choices[0].message.content"))
    }
}

// ============================================================================
// Image generation
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ImageRequest<'a> {
    pub prompt: &'a str,
    pub n: u8,
    pub size: &'a str,
}

impl<'a> ImageRequest<'a> {
    pub fn new(prompt: &'a str, size: &'a str) -> Self {
        Self { prompt, n: 1, size }
    }
}

#[derive(Debug, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: Option<String>,
}

impl ImageResponse {
    pub fn into_url(self) -> ServiceResult<String> {
        self.data
            .into_iter()
            .next()
            .and_then(|d| d.url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ServiceError::malformed("response has no data[0].url"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn user_turn_appends_present_sections() {
        assert_eq!(compose_user_turn("hi", None, None), "hi");
        assert_eq!(
            compose_user_turn("what is this?", Some("a cat on a mat"), None),
            "what is this?\n\nImage description:\na cat on a mat"
        );
        assert_eq!(
            compose_user_turn("read it", Some("a sign"), Some("STOP\nAHEAD")),
            "read it\n\nImage description:\na sign\n\nText extracted from the image:\nSTOP\nAHEAD"
        );
        assert_eq!(compose_user_turn("x", Some("  "), Some("")), "x");
    }

    #[test]
    fn chat_response_requires_content() {
        let ok: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#)
                .unwrap();
        assert_eq!(ok.into_content().unwrap(), "hello");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(empty.into_content().unwrap_err().kind, ErrorKind::Malformed);

        let missing: ChatResponse = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert_eq!(missing.into_content().unwrap_err().kind, ErrorKind::Malformed);
    }

    #[test]
    fn image_response_requires_url() {
        let ok: ImageResponse =
            serde_json::from_str(r#"{"created":1,"data":[{"url":"https://img/cat.png"}]}"#).unwrap();
        assert_eq!(ok.into_url().unwrap(), "https://img/cat.png");

        let missing: ImageResponse = serde_json::from_str(r#"{"data":[{}]}"#).unwrap();
        assert_eq!(missing.into_url().unwrap_err().kind, ErrorKind::Malformed);
    }

    #[test]
    fn image_request_is_single_fixed_size() {
        let json = serde_json::to_value(ImageRequest::new("a cat", "1024x1024")).unwrap();
        assert_eq!(json["n"], 1);
        assert_eq!(json["size"], "1024x1024");
    }
}
