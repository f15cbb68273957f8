pub mod agents;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod init;
pub mod models;
pub mod storage;
pub mod types;

pub use crate::agents::{CancellationToken, ConversationOrchestrator, ImagePreprocessor, StateStore};
pub use crate::gateway::{AzureGateway, ServiceGateway};
#[cfg(any(test, feature = "test-util"))]
pub use crate::gateway::MockGateway;
pub use crate::init::{AiConfig, AppState, Config};
