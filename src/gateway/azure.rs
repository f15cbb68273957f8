use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::agents::cancellation::CancellationToken;
use crate::error::{ServiceError, ServiceResult};
use crate::gateway::chat::{ChatRequest, ChatResponse, ImageRequest, ImageResponse};
use crate::gateway::vision::{self, AnalyzeResponse, ReadOperation};
use crate::gateway::{ExtractedText, ImageCaption, ServiceGateway};
use crate::init::AiConfig;

const OPENAI_KEY_HEADER: &str = "api-key";
const VISION_KEY_HEADER: &str = "ocp-apim-subscription-key";
const OPERATION_LOCATION: &str = "operation-location";

/// Gateway over Azure OpenAI (chat + image generation) and Azure AI Vision
/// (caption + read).
#[derive(Clone)]
pub struct AzureGateway {
    http: Client,
    config: AiConfig,
}

impl AzureGateway {
    pub fn new(config: AiConfig) -> ServiceResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ServiceError::transport(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    fn key_header(name: &'static str, key: &str) -> ServiceResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(key)
            .map_err(|e| ServiceError::transport(format!("invalid {} header: {}", name, e)))?;
        headers.insert(name, value);
        Ok(headers)
    }

    fn openai_headers(&self) -> ServiceResult<HeaderMap> {
        let mut headers = Self::key_header(OPENAI_KEY_HEADER, &self.config.openai_api_key)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn vision_headers(&self) -> ServiceResult<HeaderMap> {
        Self::key_header(VISION_KEY_HEADER, &self.config.vision_api_key)
    }

    fn binary_post(&self, url: String, image: Bytes) -> ServiceResult<RequestBuilder> {
        Ok(self
            .http
            .post(url)
            .headers(self.vision_headers()?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image))
    }

    /// Sends once; no retries. Non-success statuses become `upstream`.
    async fn send(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> ServiceResult<Response> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ServiceError::cancelled()),
            result = request.send() => result.map_err(|e| {
                ServiceError::transport(format!("request failed: {}", e))
            })?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::upstream_status(
            status.as_u16(),
            upstream_message(&body),
        ))
    }

    async fn send_json<R: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> ServiceResult<R> {
        let response = self.send(request, cancel).await?;
        read_json(response).await
    }
}

async fn read_json<R: DeserializeOwned>(response: Response) -> ServiceResult<R> {
    let body = response
        .bytes()
        .await
        .map_err(|e| ServiceError::transport(format!("reading response failed: {}", e)))?;
    serde_json::from_slice(&body)
        .map_err(|e| ServiceError::malformed(format!("invalid response body: {}", e)))
}

#[derive(Deserialize)]
struct UpstreamErrorBody {
    error: Option<UpstreamErrorDetail>,
}

#[derive(Deserialize)]
struct UpstreamErrorDetail {
    message: Option<String>,
}

/// `error.message` from an Azure error body, if it has one.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<UpstreamErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| "Unknown error".to_string())
}

#[async_trait]
impl ServiceGateway for AzureGateway {
    async fn chat_complete(
        &self,
        message: &str,
        caption: Option<&str>,
        extracted_text: Option<&str>,
        cancel: &CancellationToken,
    ) -> ServiceResult<String> {
        let payload = ChatRequest::new(&self.config, message, caption, extracted_text);
        log::debug!("Chat completion request ({} chars)", payload.user_content_len());

        let request = self
            .http
            .post(self.config.chat_url())
            .headers(self.openai_headers()?)
            .json(&payload);

        let response: ChatResponse = self.send_json(request, cancel).await?;
        response.into_content()
    }

    async fn generate_image(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> ServiceResult<String> {
        let payload = ImageRequest::new(prompt, &self.config.image_size);
        let request = self
            .http
            .post(self.config.image_url())
            .headers(self.openai_headers()?)
            .json(&payload);

        let response: ImageResponse = self.send_json(request, cancel).await?;
        response.into_url()
    }

    async fn analyze_image(
        &self,
        image: Bytes,
        cancel: &CancellationToken,
    ) -> ServiceResult<ImageCaption> {
        let request = self.binary_post(self.config.analyze_url(), image)?;
        let response: AnalyzeResponse = self.send_json(request, cancel).await?;
        response.into_caption()
    }

    async fn extract_text(
        &self,
        image: Bytes,
        cancel: &CancellationToken,
    ) -> ServiceResult<ExtractedText> {
        let request = self.binary_post(self.config.read_url(), image)?;
        let submitted = self.send(request, cancel).await?;

        let status_url = submitted
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::malformed("read submission returned no Operation-Location header")
            })?;
        log::debug!("Read job submitted: {}", status_url);

        let headers = self.vision_headers()?;
        let result = vision::poll_until_done(&self.config.poll, cancel, |attempt| {
            let request = self.http.get(&status_url).headers(headers.clone());
            async move {
                log::trace!("Polling read job (attempt {})", attempt);
                self.send_json::<ReadOperation>(request, cancel).await
            }
        })
        .await?;

        Ok(ExtractedText {
            text: result.joined_text(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_message_reads_azure_error_body() {
        let body = r#"{"error":{"code":"429","message":"Rate limit is exceeded"}}"#;
        assert_eq!(upstream_message(body), "Rate limit is exceeded");
        assert_eq!(upstream_message("<html>bad gateway</html>"), "Unknown error");
        assert_eq!(upstream_message(r#"{"error":{}}"#), "Unknown error");
    }
}
