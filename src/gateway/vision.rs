use std::future::Future;

use serde::Deserialize;

use crate::agents::cancellation::CancellationToken;
use crate::error::{ServiceError, ServiceResult};
use crate::gateway::{ImageCaption, PollPolicy};

// ============================================================================
// Caption
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AnalyzeResponse {
    description: Option<Description>,
}

#[derive(Debug, Deserialize)]
struct Description {
    #[serde(default)]
    captions: Vec<Caption>,
}

#[derive(Debug, Deserialize)]
struct Caption {
    text: String,
    #[serde(default)]
    confidence: f32,
}

impl AnalyzeResponse {
    /// Most confident caption. An empty or missing list is malformed.
    pub fn into_caption(self) -> ServiceResult<ImageCaption> {
        self.description
            .map(|d| d.captions)
            .unwrap_or_default()
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|c| ImageCaption {
                text: c.text,
                confidence: c.confidence,
            })
            .ok_or_else(|| ServiceError::malformed("analysis returned no captions"))
    }
}

// ============================================================================
// Read (text extraction)
// ============================================================================

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReadStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Deserialize)]
pub struct ReadOperation {
    pub status: ReadStatus,
    #[serde(rename = "analyzeResult")]
    pub analyze_result: Option<ReadResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadResult {
    #[serde(rename = "readResults", default)]
    pages: Vec<ReadPage>,
}

#[derive(Debug, Deserialize)]
struct ReadPage {
    #[serde(default)]
    lines: Vec<ReadLine>,
}

#[derive(Debug, Deserialize)]
struct ReadLine {
    text: String,
}

impl ReadResult {
    /// All lines in service order, newline-joined, trailing whitespace trimmed.
    pub fn joined_text(&self) -> String {
        let lines: Vec<&str> = self
            .pages
            .iter()
            .flat_map(|p| p.lines.iter().map(|l| l.text.as_str()))
            .collect();
        lines.join("\n").trim_end().to_string()
    }
}

/// Fetches job status until it is terminal.
///
/// `submitted -> polling -> succeeded | failed`. `notStarted` and `running`
/// sleep for `policy.interval` and poll again, until `policy.max_attempts`
/// status checks have been made. Cancellation is honoured between and during
/// checks.
pub async fn poll_until_done<F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut fetch: F,
) -> ServiceResult<ReadResult>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ServiceResult<ReadOperation>>,
{
    let mut attempts = 0u32;

    loop {
        cancel.check()?;
        attempts += 1;

        let operation = fetch(attempts).await?;
        match operation.status {
            ReadStatus::Succeeded => {
                return Ok(operation.analyze_result.unwrap_or_default());
            }
            ReadStatus::Failed => {
                return Err(ServiceError::upstream("text extraction job failed"));
            }
            ReadStatus::NotStarted | ReadStatus::Running => {
                if policy.exhausted(attempts) {
                    return Err(policy.exhausted_error(attempts));
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ServiceError::cancelled()),
                    _ = tokio::time::sleep(policy.interval) => {}
                }
            }
        }
    }
}
