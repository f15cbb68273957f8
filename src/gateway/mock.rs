use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::agents::cancellation::CancellationToken;
use crate::error::{ServiceError, ServiceResult};
use crate::gateway::{ExtractedText, ImageCaption, ServiceGateway};

/// One recorded gateway invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Chat {
        message: String,
        caption: Option<String>,
        extracted_text: Option<String>,
    },
    GenerateImage {
        prompt: String,
    },
    AnalyzeImage {
        bytes: usize,
    },
    ExtractText {
        bytes: usize,
    },
}

/// Scripted in-memory gateway. Each operation pops its next queued result
/// and falls back to a fixed success when its queue is empty.
#[derive(Clone, Default)]
pub struct MockGateway {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    chat: VecDeque<ServiceResult<String>>,
    images: VecDeque<ServiceResult<String>>,
    captions: VecDeque<ServiceResult<ImageCaption>>,
    texts: VecDeque<ServiceResult<ExtractedText>>,
    calls: Vec<GatewayCall>,
    chat_delay: Option<Duration>,
    analysis_delay: Option<Duration>,
    analysis_panics: bool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chat(&self, result: ServiceResult<String>) -> &Self {
        self.lock().chat.push_back(result);
        self
    }

    pub fn push_image(&self, result: ServiceResult<String>) -> &Self {
        self.lock().images.push_back(result);
        self
    }

    pub fn push_caption(&self, result: ServiceResult<ImageCaption>) -> &Self {
        self.lock().captions.push_back(result);
        self
    }

    pub fn push_text(&self, result: ServiceResult<ExtractedText>) -> &Self {
        self.lock().texts.push_back(result);
        self
    }

    /// Delays chat and image calls; the delay ends early on cancellation.
    pub fn set_chat_delay(&self, delay: Duration) -> &Self {
        self.lock().chat_delay = Some(delay);
        self
    }

    pub fn set_analysis_delay(&self, delay: Duration) -> &Self {
        self.lock().analysis_delay = Some(delay);
        self
    }

    /// Makes both analysis operations panic, as a fault escaping the join.
    pub fn set_analysis_panics(&self, panics: bool) -> &Self {
        self.lock().analysis_panics = panics;
        self
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn pause(delay: Option<Duration>, cancel: &CancellationToken) -> ServiceResult<()> {
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ServiceError::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        cancel.check()
    }
}

#[async_trait]
impl ServiceGateway for MockGateway {
    async fn chat_complete(
        &self,
        message: &str,
        caption: Option<&str>,
        extracted_text: Option<&str>,
        cancel: &CancellationToken,
    ) -> ServiceResult<String> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(GatewayCall::Chat {
                message: message.to_string(),
                caption: caption.map(str::to_string),
                extracted_text: extracted_text.map(str::to_string),
            });
            inner.chat_delay
        };
        Self::pause(delay, cancel).await?;
        self.lock()
            .chat
            .pop_front()
            .unwrap_or_else(|| Ok("mock reply".to_string()))
    }

    async fn generate_image(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<String> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(GatewayCall::GenerateImage {
                prompt: prompt.to_string(),
            });
            inner.chat_delay
        };
        Self::pause(delay, cancel).await?;
        self.lock()
            .images
            .pop_front()
            .unwrap_or_else(|| Ok("https://mock/image.png".to_string()))
    }

    async fn analyze_image(
        &self,
        image: Bytes,
        cancel: &CancellationToken,
    ) -> ServiceResult<ImageCaption> {
        let (delay, panics) = {
            let mut inner = self.lock();
            inner.calls.push(GatewayCall::AnalyzeImage { bytes: image.len() });
            (inner.analysis_delay, inner.analysis_panics)
        };
        if panics {
            panic!("mock analysis fault");
        }
        Self::pause(delay, cancel).await?;
        self.lock().captions.pop_front().unwrap_or_else(|| {
            Ok(ImageCaption {
                text: "a mock image".to_string(),
                confidence: 0.9,
            })
        })
    }

    async fn extract_text(
        &self,
        image: Bytes,
        cancel: &CancellationToken,
    ) -> ServiceResult<ExtractedText> {
        let (delay, panics) = {
            let mut inner = self.lock();
            inner.calls.push(GatewayCall::ExtractText { bytes: image.len() });
            (inner.analysis_delay, inner.analysis_panics)
        };
        if panics {
            panic!("mock extraction fault");
        }
        Self::pause(delay, cancel).await?;
        self.lock().texts.pop_front().unwrap_or_else(|| {
            Ok(ExtractedText {
                text: "mock text".to_string(),
            })
        })
    }
}
