//! Boundary over the remote AI services: chat completion, image generation
//! and image analysis (caption + text extraction).
//!
//! Every operation is a single request/response from the caller's point of
//! view and fails only with a [`ServiceError`].

pub mod azure;
pub mod chat;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod vision;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::agents::cancellation::CancellationToken;
use crate::error::{ServiceError, ServiceResult};

pub use azure::AzureGateway;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{GatewayCall, MockGateway};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageCaption {
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
}

#[async_trait]
pub trait ServiceGateway: Send + Sync {
    /// Single-turn completion. `caption` and `extracted_text` are appended to
    /// the user turn as labeled sections when present.
    async fn chat_complete(
        &self,
        message: &str,
        caption: Option<&str>,
        extracted_text: Option<&str>,
        cancel: &CancellationToken,
    ) -> ServiceResult<String>;

    /// Returns the URI of the generated image.
    async fn generate_image(&self, prompt: &str, cancel: &CancellationToken)
    -> ServiceResult<String>;

    async fn analyze_image(
        &self,
        image: Bytes,
        cancel: &CancellationToken,
    ) -> ServiceResult<ImageCaption>;

    /// Submits an asynchronous read job and polls it to completion.
    async fn extract_text(
        &self,
        image: Bytes,
        cancel: &CancellationToken,
    ) -> ServiceResult<ExtractedText>;
}

// ============================================================================
// Poll policy
// ============================================================================

/// Bounds for polling an asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until the job reaches a terminal status.
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: Some(60),
        }
    }
}

impl PollPolicy {
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    pub(crate) fn exhausted_error(&self, attempts: u32) -> ServiceError {
        ServiceError::upstream(format!(
            "text extraction did not finish after {} status checks",
            attempts
        ))
    }
}
