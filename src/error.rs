//! Crate-level error type

use crate::completion::CompletionError;
use crate::config::ConfigError;
use crate::conversation::StoreError;
use thiserror::Error;

/// Errors surfaced by the companion core
#[derive(Debug, Error)]
pub enum CompanionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Conversation store error: {0}")]
    Store(#[from] StoreError),

    #[error("Completion service error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
}

pub type Result<T> = std::result::Result<T, CompanionError>;
