//! Conversation transcript, urgency classification and context windows

pub mod classifier;
pub mod context_window;
pub mod models;
pub mod store;
pub mod token_estimator;

pub use classifier::{classify, UrgencyClassifier, DEFAULT_URGENCY_TERMS};
pub use context_window::{
    build_context, ContextWindowBuilder, DEFAULT_HISTORY_WINDOW, URGENCY_PREAMBLE,
};
pub use models::{OutgoingMessage, Role, Turn, TurnId};
pub use store::{ConversationStore, StoreError};
pub use token_estimator::{TiktokenEstimator, TokenEstimator, WordBasedEstimator};
