use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::agents::cancellation::{CancellationToken, TaskRegistry};
use crate::agents::events::ConversationEvent;
use crate::agents::state::StateStore;
use crate::error::{ServiceError, ServiceResult};
use crate::gateway::ServiceGateway;
use crate::models::{Attachment, Dimensions, FileSource, ImageContext, ImageFile};
use crate::storage::{ImageProcessor, PreviewStore};

/// Turns a selected image into an attachment and fills in its caption and
/// extracted text in the background.
pub struct ImagePreprocessor {
    gateway: Arc<dyn ServiceGateway>,
    store: Arc<StateStore>,
    previews: Arc<PreviewStore>,
    analyses: Arc<TaskRegistry>,
    processor: ImageProcessor,
}

impl ImagePreprocessor {
    pub fn new(
        gateway: Arc<dyn ServiceGateway>,
        store: Arc<StateStore>,
        previews: Arc<PreviewStore>,
        analyses: Arc<TaskRegistry>,
        processor: ImageProcessor,
    ) -> Self {
        Self {
            gateway,
            store,
            previews,
            analyses,
            processor,
        }
    }

    /// Entry point for picked and dropped files.
    ///
    /// Dropped files that are not images are ignored (`Ok(None)`); picked
    /// ones are rejected. Accepted files are validated before analysis.
    pub async fn select_file(
        &self,
        file: ImageFile,
        source: FileSource,
    ) -> ServiceResult<Option<Attachment>> {
        if !file.media_type.is_image() {
            return match source {
                FileSource::Drop => {
                    log::debug!(
                        "Ignoring dropped file {} ({})",
                        file.file_name,
                        file.media_type
                    );
                    Ok(None)
                }
                FileSource::Picker => Err(ServiceError::local_io(format!(
                    "{} is not an image ({})",
                    file.file_name, file.media_type
                ))),
            };
        }

        let dimensions = self.processor.validate_image(&file.bytes)?;
        Ok(Some(self.start_analysis(file, Some(dimensions)).await))
    }

    /// Makes `file` the active attachment in `analyzing` status and returns
    /// it at once. Caption and text extraction run concurrently in a spawned
    /// task; their outcome is dispatched when both have settled.
    pub async fn start_analysis(&self, file: ImageFile, dimensions: Option<Dimensions>) -> Attachment {
        let id = Uuid::now_v7();
        let preview_uri = self
            .previews
            .allocate(id, file.media_type.clone(), file.bytes.clone())
            .await;
        let attachment = Attachment::analyzing(id, &file, dimensions, preview_uri);
        let token = self.analyses.register(id).await;

        let mut replaced = None;
        self.store.transition(|state| {
            replaced = state.attachment.clone();
            Some(ConversationEvent::AttachmentSelected {
                attachment: attachment.clone(),
            })
        });
        if let Some(old) = replaced {
            log::info!("🔁 Attachment {} replaced by {}", old.id, id);
            self.discard(&old).await;
        }

        log::info!(
            "🖼️  Analyzing {} ({}, {})",
            file.file_name,
            file.media_type,
            file.size()
        );
        self.spawn_analysis(id, file.bytes, token);

        attachment
    }

    /// Drops the active attachment, cancelling any analysis still running.
    pub async fn remove_attachment(&self) -> Option<Attachment> {
        let mut removed = None;
        self.store.transition(|state| {
            let current = state.attachment.clone()?;
            let attachment_id = current.id;
            removed = Some(current);
            Some(ConversationEvent::AttachmentRemoved { attachment_id })
        });

        let removed = removed?;
        self.discard(&removed).await;
        log::info!("🗑️  Attachment {} removed", removed.id);
        Some(removed)
    }

    async fn discard(&self, attachment: &Attachment) {
        self.analyses.cancel(&attachment.id).await;
        self.previews.release(&attachment.preview_uri).await;
    }

    fn spawn_analysis(&self, id: Uuid, bytes: Bytes, token: CancellationToken) {
        let gateway = self.gateway.clone();
        let store = self.store.clone();
        let analyses = self.analyses.clone();

        tokio::spawn(async move {
            // Separate task so a fault inside either call surfaces as a
            // JoinError instead of tearing down this one.
            let worker = {
                let token = token.clone();
                tokio::spawn(async move { analyze(gateway.as_ref(), bytes, &token).await })
            };
            let outcome = worker.await;

            if token.is_cancelled() {
                log::debug!("Analysis of {} cancelled", id);
            } else {
                let event = match outcome {
                    Ok(context) => {
                        log::info!(
                            "✅ Attachment {} analyzed (caption: {}, text: {})",
                            id,
                            context.caption.is_some(),
                            context.extracted_text.is_some()
                        );
                        ConversationEvent::AttachmentAnalyzed {
                            attachment_id: id,
                            caption: context.caption,
                            extracted_text: context.extracted_text,
                        }
                    }
                    Err(e) => {
                        log::error!("❌ Analysis of {} failed: {}", id, e);
                        ConversationEvent::AttachmentFailed {
                            attachment_id: id,
                            diagnostic: format!("Image analysis failed: {}", e),
                        }
                    }
                };
                store.dispatch(event);
            }

            analyses.unregister(&id).await;
        });
    }
}

/// Runs caption and text extraction side by side. Each failure only empties
/// its own field.
pub async fn analyze(
    gateway: &dyn ServiceGateway,
    bytes: Bytes,
    cancel: &CancellationToken,
) -> ImageContext {
    let (caption, text) = tokio::join!(
        gateway.analyze_image(bytes.clone(), cancel),
        gateway.extract_text(bytes, cancel)
    );

    let caption = match caption {
        Ok(caption) => Some(caption.text),
        Err(e) => {
            log::warn!("Caption unavailable: {}", e);
            None
        }
    };
    let extracted_text = match text {
        Ok(extracted) if !extracted.text.trim().is_empty() => Some(extracted.text),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Text extraction unavailable: {}", e);
            None
        }
    };

    ImageContext {
        caption,
        extracted_text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ExtractedText, MockGateway};
    use crate::models::AttachmentStatus;
    use crate::types::{FileSize, MimeType};
    use std::time::Duration;

    fn png() -> Bytes {
        let img = image::RgbImage::new(4, 4);
        let mut buffer = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        Bytes::from(buffer)
    }

    fn setup(gateway: &MockGateway) -> (ImagePreprocessor, Arc<StateStore>, Arc<PreviewStore>) {
        let store = Arc::new(StateStore::default());
        let previews = Arc::new(PreviewStore::new());
        let preprocessor = ImagePreprocessor::new(
            Arc::new(gateway.clone()),
            store.clone(),
            previews.clone(),
            Arc::new(TaskRegistry::new()),
            ImageProcessor::new(FileSize::megabytes(1)),
        );
        (preprocessor, store, previews)
    }

    fn image_file(name: &str) -> ImageFile {
        ImageFile::new(name, MimeType::new("image/png"), png())
    }

    async fn settled(store: &StateStore) -> Attachment {
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            store.wait_for(|s| s.attachment.as_ref().is_some_and(|a| a.status.is_settled())),
        )
        .await
        .expect("analysis should settle");
        state.attachment.clone().unwrap()
    }

    #[tokio::test]
    async fn analysis_fills_both_fields() {
        let gateway = MockGateway::new();
        let (preprocessor, store, _) = setup(&gateway);

        let attachment = preprocessor
            .select_file(image_file("cat.png"), FileSource::Picker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attachment.status, AttachmentStatus::Analyzing);
        assert_eq!(attachment.dimensions, Some(Dimensions { width: 4, height: 4 }));

        let done = settled(&store).await;
        assert_eq!(done.status, AttachmentStatus::Ready);
        assert_eq!(done.caption.as_deref(), Some("a mock image"));
        assert_eq!(done.extracted_text.as_deref(), Some("mock text"));
    }

    #[tokio::test]
    async fn one_failed_call_keeps_the_other() {
        let gateway = MockGateway::new();
        gateway.push_text(Err(ServiceError::upstream("text extraction job failed")));
        let (preprocessor, store, _) = setup(&gateway);

        preprocessor.start_analysis(image_file("sign.png"), None).await;
        let done = settled(&store).await;
        assert_eq!(done.status, AttachmentStatus::Ready);
        assert_eq!(done.caption.as_deref(), Some("a mock image"));
        assert!(done.extracted_text.is_none());
    }

    #[tokio::test]
    async fn failed_caption_keeps_extracted_text() {
        let gateway = MockGateway::new();
        gateway.push_caption(Err(ServiceError::transport("connection reset")));
        let (preprocessor, store, _) = setup(&gateway);

        preprocessor.start_analysis(image_file("sign.png"), None).await;
        let done = settled(&store).await;
        assert_eq!(done.status, AttachmentStatus::Ready);
        assert!(done.caption.is_none());
        assert_eq!(done.extracted_text.as_deref(), Some("mock text"));
    }

    #[tokio::test]
    async fn blank_text_counts_as_absent() {
        let gateway = MockGateway::new();
        gateway.push_text(Ok(ExtractedText { text: " \n".into() }));
        let (preprocessor, store, _) = setup(&gateway);

        preprocessor.start_analysis(image_file("photo.png"), None).await;
        assert!(settled(&store).await.extracted_text.is_none());
    }

    #[tokio::test]
    async fn fault_marks_attachment_failed() {
        let gateway = MockGateway::new();
        gateway.set_analysis_panics(true);
        let (preprocessor, store, _) = setup(&gateway);

        preprocessor.start_analysis(image_file("cat.png"), None).await;
        let done = settled(&store).await;
        assert_eq!(done.status, AttachmentStatus::Failed);
        assert!(done.caption.unwrap().starts_with("Image analysis failed"));
    }

    #[tokio::test]
    async fn non_image_drop_is_ignored_but_pick_is_rejected() {
        let gateway = MockGateway::new();
        let (preprocessor, store, _) = setup(&gateway);
        let text = || ImageFile::new("notes.txt", MimeType::new("text/plain"), Bytes::from_static(b"hi"));

        let dropped = preprocessor.select_file(text(), FileSource::Drop).await.unwrap();
        assert!(dropped.is_none());

        let err = preprocessor.select_file(text(), FileSource::Picker).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::LocalIo);

        assert!(store.snapshot().attachment.is_none());
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn removal_releases_preview_and_ignores_late_result() {
        let gateway = MockGateway::new();
        gateway.set_analysis_delay(Duration::from_millis(50));
        let (preprocessor, store, previews) = setup(&gateway);

        let attachment = preprocessor.start_analysis(image_file("cat.png"), None).await;
        assert_eq!(previews.len().await, 1);

        let removed = preprocessor.remove_attachment().await.unwrap();
        assert_eq!(removed.id, attachment.id);
        assert!(previews.is_empty().await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.snapshot().attachment.is_none());
        assert!(preprocessor.remove_attachment().await.is_none());
    }

    #[tokio::test]
    async fn new_selection_replaces_old_one() {
        let gateway = MockGateway::new();
        gateway.set_analysis_delay(Duration::from_millis(20));
        let (preprocessor, store, previews) = setup(&gateway);

        let first = preprocessor.start_analysis(image_file("one.png"), None).await;
        let second = preprocessor.start_analysis(image_file("two.png"), None).await;
        assert_eq!(previews.len().await, 1);
        assert!(previews.get(&first.id).await.is_none());

        let done = settled(&store).await;
        assert_eq!(done.id, second.id);
        assert_eq!(done.status, AttachmentStatus::Ready);
    }
}
