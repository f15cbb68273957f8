use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tokio::sync::watch;

use crate::agents::events::ConversationEvent;
use crate::models::{Attachment, AttachmentStatus, Message, Role};

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    Composing,
    Sending,
    AwaitingPrimaryResponse,
    AwaitingImageGeneration,
}

impl TurnPhase {
    /// A turn is in flight; new submissions must be rejected.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Sending | Self::AwaitingPrimaryResponse | Self::AwaitingImageGeneration
        )
    }

    fn settled(input: &str) -> Self {
        if input.trim().is_empty() {
            Self::Idle
        } else {
            Self::Composing
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub phase: TurnPhase,
}

/// The only way a conversation changes. Events that do not apply to the
/// current state (stale attachment ids, phase steps outside a turn) return an
/// unchanged copy.
pub fn reduce(state: &ConversationState, event: &ConversationEvent) -> ConversationState {
    let mut next = state.clone();

    match event {
        ConversationEvent::InputChanged { text } => {
            next.input = text.clone();
            if !next.phase.is_busy() {
                next.phase = TurnPhase::settled(text);
            }
        }
        ConversationEvent::AttachmentSelected { attachment } => {
            next.attachment = Some(attachment.clone());
        }
        ConversationEvent::AttachmentAnalyzed {
            attachment_id,
            caption,
            extracted_text,
        } => {
            if let Some(current) = next.attachment.as_mut().filter(|a| {
                a.id == *attachment_id && a.status == AttachmentStatus::Analyzing
            }) {
                current.caption = caption.clone();
                current.extracted_text = extracted_text.clone();
                current.status = AttachmentStatus::Ready;
            }
        }
        ConversationEvent::AttachmentFailed {
            attachment_id,
            diagnostic,
        } => {
            if let Some(current) = next.attachment.as_mut().filter(|a| {
                a.id == *attachment_id && a.status == AttachmentStatus::Analyzing
            }) {
                current.caption = Some(diagnostic.clone());
                current.extracted_text = None;
                current.status = AttachmentStatus::Failed;
            }
        }
        ConversationEvent::AttachmentRemoved { attachment_id } => {
            if next.attachment.as_ref().is_some_and(|a| a.id == *attachment_id) {
                next.attachment = None;
            }
        }
        ConversationEvent::TurnSubmitted {
            message,
            consumed_attachment,
            ..
        } => {
            next.messages.push(message.clone());
            next.input.clear();
            if next
                .attachment
                .as_ref()
                .is_some_and(|a| Some(a.id) == *consumed_attachment)
            {
                next.attachment = None;
            }
            next.phase = TurnPhase::Sending;
        }
        ConversationEvent::PrimaryRequested => {
            if next.phase == TurnPhase::Sending {
                next.phase = TurnPhase::AwaitingPrimaryResponse;
            }
        }
        ConversationEvent::ImageGenerationRequested { .. } => {
            if next.phase == TurnPhase::AwaitingPrimaryResponse {
                next.phase = TurnPhase::AwaitingImageGeneration;
            }
        }
        ConversationEvent::AssistantReplied { message } => {
            next.messages.push(message.clone());
            next.phase = TurnPhase::settled(&next.input);
        }
        ConversationEvent::TurnFailed { message } => {
            let mut message = message.clone();
            message.role = Role::Error;
            message.image_url = None;
            next.messages.push(message);
            next.phase = TurnPhase::settled(&next.input);
        }
    }

    next
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Debug, Clone)]
pub struct StateChange {
    pub revision: u64,
    /// `None` only for the initial state.
    pub event: Option<ConversationEvent>,
    pub state: Arc<ConversationState>,
}

pub type ObserverId = u64;
type Observer = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Holds the current immutable state and notifies observers after every
/// applied transition. Transitions and their notifications are serialized,
/// so observers see changes in revision order. Observers must not dispatch
/// from inside the callback.
pub struct StateStore {
    current: watch::Sender<StateChange>,
    serial: Mutex<()>,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicU64,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(ConversationState::default())
    }
}

impl StateStore {
    pub fn new(initial: ConversationState) -> Self {
        let (current, _) = watch::channel(StateChange {
            revision: 0,
            event: None,
            state: Arc::new(initial),
        });
        Self {
            current,
            serial: Mutex::new(()),
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> Arc<ConversationState> {
        self.current.borrow().state.clone()
    }

    pub fn revision(&self) -> u64 {
        self.current.borrow().revision
    }

    /// Applies `event`. Returns the change, or `None` when the event left the
    /// state untouched.
    pub fn dispatch(&self, event: ConversationEvent) -> Option<StateChange> {
        self.transition(|_| Some(event))
    }

    /// Atomically inspects the current state and decides which event, if
    /// any, to apply. No other transition can interleave with `decide`.
    pub fn transition<F>(&self, decide: F) -> Option<StateChange>
    where
        F: FnOnce(&ConversationState) -> Option<ConversationEvent>,
    {
        let _serial = self
            .serial
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut applied = None;

        self.current.send_if_modified(|current| {
            let Some(event) = decide(&current.state) else {
                return false;
            };
            let next = reduce(&current.state, &event);
            if next == *current.state {
                return false;
            }
            *current = StateChange {
                revision: current.revision + 1,
                event: Some(event),
                state: Arc::new(next),
            };
            applied = Some(current.clone());
            true
        });

        if let Some(change) = &applied {
            self.notify(change);
        }
        applied
    }

    /// Registers a callback invoked after each applied transition.
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut observers) = self.observers.lock() {
            observers.push((id, Arc::new(observer)));
        }
        id
    }

    pub fn unobserve(&self, id: ObserverId) -> bool {
        match self.observers.lock() {
            Ok(mut observers) => {
                let before = observers.len();
                observers.retain(|(observer_id, _)| *observer_id != id);
                observers.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StateChange> {
        self.current.subscribe()
    }

    /// Waits until the state satisfies `predicate` and returns that state.
    pub async fn wait_for<P>(&self, predicate: P) -> Arc<ConversationState>
    where
        P: Fn(&ConversationState) -> bool,
    {
        let mut rx = self.subscribe();
        match rx.wait_for(|change| predicate(&change.state)).await {
            Ok(change) => change.state.clone(),
            Err(_) => self.snapshot(),
        }
    }

    fn notify(&self, change: &StateChange) {
        let observers: Vec<Observer> = match self.observers.lock() {
            Ok(observers) => observers.iter().map(|(_, o)| o.clone()).collect(),
            Err(_) => return,
        };
        for observer in observers {
            observer(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageContext, ImageFile};
    use crate::types::MimeType;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn attachment() -> Attachment {
        let file = ImageFile::new("cat.png", MimeType::new("image/png"), Bytes::from_static(b"x"));
        Attachment::analyzing(Uuid::now_v7(), &file, None, "/api/previews/1")
    }

    #[test]
    fn input_moves_between_idle_and_composing() {
        let state = ConversationState::default();
        let typed = reduce(&state, &ConversationEvent::InputChanged { text: "hi".into() });
        assert_eq!(typed.phase, TurnPhase::Composing);

        let cleared = reduce(&typed, &ConversationEvent::InputChanged { text: "  ".into() });
        assert_eq!(cleared.phase, TurnPhase::Idle);
    }

    #[test]
    fn stale_analysis_is_ignored() {
        let current = attachment();
        let state = ConversationState {
            attachment: Some(current.clone()),
            ..Default::default()
        };

        let stale = reduce(
            &state,
            &ConversationEvent::AttachmentAnalyzed {
                attachment_id: Uuid::now_v7(),
                caption: Some("dog".into()),
                extracted_text: None,
            },
        );
        assert_eq!(stale, state);

        let fresh = reduce(
            &state,
            &ConversationEvent::AttachmentAnalyzed {
                attachment_id: current.id,
                caption: Some("cat".into()),
                extracted_text: None,
            },
        );
        let analyzed = fresh.attachment.unwrap();
        assert_eq!(analyzed.status, AttachmentStatus::Ready);
        assert_eq!(analyzed.caption.as_deref(), Some("cat"));
    }

    #[test]
    fn failure_sets_diagnostic_caption() {
        let current = attachment();
        let state = ConversationState {
            attachment: Some(current.clone()),
            ..Default::default()
        };
        let failed = reduce(
            &state,
            &ConversationEvent::AttachmentFailed {
                attachment_id: current.id,
                diagnostic: "Image analysis failed".into(),
            },
        );
        let failed = failed.attachment.unwrap();
        assert_eq!(failed.status, AttachmentStatus::Failed);
        assert_eq!(failed.caption.as_deref(), Some("Image analysis failed"));
    }

    #[test]
    fn turn_walks_through_phases() {
        let current = attachment();
        let state = ConversationState {
            input: "what is this".into(),
            attachment: Some(current.clone()),
            phase: TurnPhase::Composing,
            ..Default::default()
        };

        let sent = reduce(
            &state,
            &ConversationEvent::TurnSubmitted {
                message: Message::user("what is this", Some(current.preview_uri.clone())),
                consumed_attachment: Some(current.id),
                context: ImageContext::default(),
            },
        );
        assert_eq!(sent.phase, TurnPhase::Sending);
        assert!(sent.input.is_empty());
        assert!(sent.attachment.is_none());
        assert_eq!(sent.messages.len(), 1);

        let waiting = reduce(&sent, &ConversationEvent::PrimaryRequested);
        assert_eq!(waiting.phase, TurnPhase::AwaitingPrimaryResponse);

        let drawing = reduce(
            &waiting,
            &ConversationEvent::ImageGenerationRequested { prompt: "cat".into() },
        );
        assert_eq!(drawing.phase, TurnPhase::AwaitingImageGeneration);

        let done = reduce(
            &drawing,
            &ConversationEvent::AssistantReplied {
                message: Message::assistant_with_image("cat", "https://img/cat.png"),
            },
        );
        assert_eq!(done.phase, TurnPhase::Idle);
        assert_eq!(done.messages.len(), 2);
    }

    #[test]
    fn failed_turn_strips_image() {
        let mut message = Message::error("boom");
        message.image_url = Some("https://img".into());
        let state = ConversationState {
            phase: TurnPhase::AwaitingPrimaryResponse,
            ..Default::default()
        };
        let next = reduce(&state, &ConversationEvent::TurnFailed { message });
        assert_eq!(next.phase, TurnPhase::Idle);
        assert!(next.messages[0].image_url.is_none());
    }

    #[test]
    fn store_notifies_observers_and_skips_noops() {
        let store = StateStore::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let id = {
            let seen = seen.clone();
            store.observe(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(store.dispatch(ConversationEvent::InputChanged { text: "a".into() }).is_some());
        // Same input again changes nothing.
        assert!(store.dispatch(ConversationEvent::InputChanged { text: "a".into() }).is_none());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(store.revision(), 1);

        assert!(store.unobserve(id));
        store.dispatch(ConversationEvent::InputChanged { text: "ab".into() });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(store.snapshot().input, "ab");
    }

    #[test]
    fn transition_can_decline() {
        let store = StateStore::default();
        let change = store.transition(|state| {
            if state.phase.is_busy() {
                Some(ConversationEvent::PrimaryRequested)
            } else {
                None
            }
        });
        assert!(change.is_none());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn observers_see_revisions_in_order_across_threads() {
        let store = Arc::new(StateStore::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            store.observe(move |change| seen.lock().unwrap().push(change.revision));
        }

        let writers: Vec<_> = (0..4)
            .map(|writer| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.dispatch(ConversationEvent::InputChanged {
                            text: format!("{}-{}", writer, i),
                        });
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 200);
        assert!(seen.windows(2).all(|pair| pair[0] + 1 == pair[1]));
    }
}
