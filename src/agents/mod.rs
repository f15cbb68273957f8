// Public module exports
pub mod cancellation;
pub mod events;
pub mod orchestrator;
pub mod preprocessor;
pub mod state;

// Re-export main types for convenience
pub use cancellation::{CancellationToken, TaskRegistry};
pub use events::ConversationEvent;
pub use orchestrator::{ConversationOrchestrator, RejectReason, TurnOutcome};
pub use preprocessor::ImagePreprocessor;
pub use state::{ConversationState, StateChange, StateStore, TurnPhase, reduce};
