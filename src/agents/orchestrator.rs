use std::sync::{Arc, Mutex};

use serde::Serialize;
use strum_macros::Display;

use crate::agents::cancellation::{CancellationToken, TaskRegistry};
use crate::agents::events::ConversationEvent;
use crate::agents::state::{ConversationState, StateStore};
use crate::error::{ServiceError, ServiceResult};
use crate::gateway::ServiceGateway;
use crate::models::{ImageContext, Message};

/// Marker the assistant uses to ask for an image instead of answering.
pub const IMAGE_DIRECTIVE: &str = "GENERATE_IMAGE: ";

/// The prompt following the image directive, if the reply carries one.
pub fn image_directive(reply: &str) -> Option<&str> {
    reply.strip_prefix(IMAGE_DIRECTIVE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    /// Nothing to send: blank text and no settled attachment.
    Empty,
    /// A turn is already in flight.
    Busy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Rejected(RejectReason),
    /// Every message the turn appended, the user's echo first.
    Completed { appended: Vec<Message> },
}

/// Drives one user turn at a time through the gateway.
pub struct ConversationOrchestrator {
    gateway: Arc<dyn ServiceGateway>,
    store: Arc<StateStore>,
    analyses: Arc<TaskRegistry>,
    current_turn: Mutex<Option<CancellationToken>>,
}

impl ConversationOrchestrator {
    pub fn new(
        gateway: Arc<dyn ServiceGateway>,
        store: Arc<StateStore>,
        analyses: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            gateway,
            store,
            analyses,
            current_turn: Mutex::new(None),
        }
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.store
            .dispatch(ConversationEvent::InputChanged { text: text.into() });
    }

    /// Aborts the in-flight turn. Returns false when there is none.
    pub fn cancel_turn(&self) -> bool {
        match self.current_turn.lock() {
            Ok(current) => match current.as_ref() {
                Some(token) => {
                    token.cancel();
                    log::info!("🛑 Turn cancelled");
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Sends `input` together with the active attachment.
    ///
    /// Rejected without any state change when a turn is in flight, or when
    /// the trimmed input is blank and there is no settled attachment. Every
    /// accepted turn ends with exactly one assistant or error message.
    pub async fn submit_turn(&self, input: &str) -> TurnOutcome {
        let token = CancellationToken::new();
        let mut rejection = None;
        let mut submitted = None;

        self.store.transition(|state| match Self::admit(state, input) {
            Err(reason) => {
                rejection = Some(reason);
                None
            }
            Ok(event) => {
                // Installed under the store lock: a busy phase always has a token.
                self.set_current(Some(token.clone()));
                submitted = Some(event.clone());
                Some(event)
            }
        });

        let Some(ConversationEvent::TurnSubmitted {
            message,
            consumed_attachment,
            context,
        }) = submitted
        else {
            let reason = rejection.unwrap_or(RejectReason::Busy);
            log::debug!("Turn rejected: {}", reason);
            return TurnOutcome::Rejected(reason);
        };
        let guard = TurnGuard {
            orchestrator: self,
            token: token.clone(),
            settled: false,
        };

        // Preview ownership moved to the message; analysis is no longer needed.
        if let Some(id) = consumed_attachment {
            self.analyses.cancel(&id).await;
        }

        let reply = match self.run_turn(&message, input.trim(), &context, &token).await {
            Ok(reply) => {
                guard.settle(ConversationEvent::AssistantReplied {
                    message: reply.clone(),
                });
                reply
            }
            Err(e) => {
                log::error!("❌ Turn failed: {}", e);
                let failure = Message::error(e.user_message());
                guard.settle(ConversationEvent::TurnFailed {
                    message: failure.clone(),
                });
                failure
            }
        };

        TurnOutcome::Completed {
            appended: vec![message, reply],
        }
    }

    /// Guard and user message for a new turn, evaluated against the state
    /// under the store's lock.
    fn admit(state: &ConversationState, input: &str) -> Result<ConversationEvent, RejectReason> {
        if state.phase.is_busy() {
            return Err(RejectReason::Busy);
        }

        let text = input.trim();
        let attachment = state.attachment.as_ref();
        let settled = attachment.is_some_and(|a| a.status.is_settled());
        if text.is_empty() && !settled {
            return Err(RejectReason::Empty);
        }

        let content = match attachment {
            Some(a) if text.is_empty() => format!("[Attached image: {}]", a.file_name),
            Some(a) => format!("{}\n\n[Attached image: {}]", text, a.file_name),
            None => text.to_string(),
        };

        Ok(ConversationEvent::TurnSubmitted {
            message: Message::user(content, attachment.map(|a| a.preview_uri.clone())),
            consumed_attachment: attachment.map(|a| a.id),
            context: attachment.map(|a| a.context()).unwrap_or_default(),
        })
    }

    async fn run_turn(
        &self,
        message: &Message,
        text: &str,
        context: &ImageContext,
        cancel: &CancellationToken,
    ) -> ServiceResult<Message> {
        self.store.dispatch(ConversationEvent::PrimaryRequested);
        log::info!(
            "💬 Turn {} sent ({} chars, context: {})",
            message.id,
            text.len(),
            !context.is_empty()
        );

        let reply = self
            .gateway
            .chat_complete(
                text,
                context.caption.as_deref(),
                context.extracted_text.as_deref(),
                cancel,
            )
            .await?;
        cancel.check()?;

        let Some(prompt) = image_directive(&reply) else {
            return Ok(Message::assistant(reply));
        };

        self.store.dispatch(ConversationEvent::ImageGenerationRequested {
            prompt: prompt.to_string(),
        });
        log::info!("🎨 Generating image for turn {}", message.id);

        let image_url = self.gateway.generate_image(prompt, cancel).await?;
        cancel.check()?;

        Ok(Message::assistant_with_image(
            format!("Here's the image you requested: {}", prompt),
            image_url,
        ))
    }

    fn set_current(&self, token: Option<CancellationToken>) {
        if let Ok(mut current) = self.current_turn.lock() {
            *current = token;
        }
    }
}

/// Settles an admitted turn exactly once. Dropping it unsettled (the caller
/// went away mid-turn) cancels the turn and records it as failed, so the
/// conversation never stays busy.
struct TurnGuard<'a> {
    orchestrator: &'a ConversationOrchestrator,
    token: CancellationToken,
    settled: bool,
}

impl TurnGuard<'_> {
    fn settle(mut self, event: ConversationEvent) {
        self.finish(event);
    }

    // The token is cleared before the phase leaves busy, so it can never
    // clobber the token of the next admitted turn.
    fn finish(&mut self, event: ConversationEvent) {
        self.settled = true;
        self.orchestrator.set_current(None);
        self.orchestrator.store.dispatch(event);
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        log::warn!("⚠️  Turn dropped before it finished");
        self.token.cancel();
        self.finish(ConversationEvent::TurnFailed {
            message: Message::error(ServiceError::cancelled().user_message()),
        });
    }
}
