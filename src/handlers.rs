use std::convert::Infallible;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::{Json, extract::State};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::agents::events::ConversationEvent;
use crate::agents::orchestrator::{RejectReason, TurnOutcome};
use crate::agents::state::{ConversationState, StateChange};
use crate::error::*;
use crate::init::AppState;
use crate::models::*;

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Falls back to the composer input when absent.
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InputRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelErrorResponse {
    pub error: String,
    pub message: String,
}

/// One SSE frame: the event that was applied and the state it produced.
#[derive(Debug, Serialize)]
pub struct StateFrame<'a> {
    pub revision: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<&'a ConversationEvent>,
    pub state: &'a ConversationState,
}

impl<'a> From<&'a StateChange> for StateFrame<'a> {
    fn from(change: &'a StateChange) -> Self {
        Self {
            revision: change.revision,
            event: change.event.as_ref(),
            state: &change.state,
        }
    }
}

// ============================================================================
// HEALTH
// ============================================================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let snapshot = state.store.snapshot();
    Json(HealthStatus::healthy(
        snapshot.messages.len(),
        snapshot.phase.is_busy(),
    ))
}

// ============================================================================
// CONVERSATION
// ============================================================================

/// GET /api/conversation
pub async fn get_conversation_handler(
    State(state): State<Arc<AppState>>,
) -> Json<ConversationState> {
    Json(state.store.snapshot().as_ref().clone())
}

/// PUT /api/conversation/input
pub async fn update_input_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InputRequest>,
) -> StatusCode {
    state.orchestrator.set_input(request.text);
    StatusCode::NO_CONTENT
}

/// Handler for streaming conversation state via SSE
///
/// GET /api/conversation/events
///
/// Sends the current state first, then one frame per applied transition.
/// Frames skipped by a slow client are coalesced into the latest state.
pub async fn conversation_events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut rx = state.store.subscribe();

    let stream = async_stream::stream! {
        loop {
            let change = rx.borrow_and_update().clone();

            match serde_json::to_string(&StateFrame::from(&change)) {
                Ok(json_data) => {
                    yield Ok(Event::default()
                        .event("state")
                        .id(change.revision.to_string())
                        .data(json_data));
                }
                Err(e) => {
                    log::error!("State serialization error: {}", e);
                    yield Ok(Event::default()
                        .event("error")
                        .data(format!("Serialization error: {}", e)));
                    break;
                }
            }

            if rx.changed().await.is_err() {
                break;
            }
        }

        yield Ok(Event::default().event("done").data("Stream closed"));
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// ============================================================================
// CHAT
// ============================================================================

/// POST /api/chat
///
/// Runs one turn to completion and returns the messages it appended.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    let input = match request.message {
        Some(message) => message,
        None => state.store.snapshot().input.clone(),
    };

    match state.orchestrator.submit_turn(&input).await {
        TurnOutcome::Completed { appended } => Ok(Json(ChatResponse { messages: appended })),
        TurnOutcome::Rejected(RejectReason::Busy) => {
            Err(AppError::conflict("A message is already being processed"))
        }
        TurnOutcome::Rejected(RejectReason::Empty) => Err(AppError::validation(
            "Type a message or wait for the attached image to be analyzed",
        )),
    }
}

/// Handler for cancelling the in-flight turn
///
/// DELETE /api/chat
pub async fn cancel_chat_handler(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<CancelResponse>, (StatusCode, Json<CancelErrorResponse>)> {
    if state.orchestrator.cancel_turn() {
        Ok(Json(CancelResponse {
            success: true,
            message: "Request cancelled successfully".to_string(),
        }))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(CancelErrorResponse {
                error: "NOT_FOUND".to_string(),
                message: "No request in progress".to_string(),
            }),
        ))
    }
}
