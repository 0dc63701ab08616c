//! Context window construction
//!
//! Derives the bounded, oldest-first message list sent upstream for a new user
//! turn. The urgency preamble only ever touches the outgoing copy of the newest
//! turn; the transcript keeps what the user actually typed.

use super::models::{OutgoingMessage, Role, Turn};
use super::token_estimator::{TokenEstimator, WordBasedEstimator};
use std::sync::Arc;
use tracing::debug;

/// Default number of history turns sent upstream
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

/// Prefix added to the outgoing copy of an urgent user turn
pub const URGENCY_PREAMBLE: &str =
    "[High urgency context: the user may be in an emergency.]\n\n";

/// Builds the outgoing message list for the completion service
#[derive(Clone)]
pub struct ContextWindowBuilder {
    max_turns: usize,
    max_history_tokens: Option<usize>,
    estimator: Arc<dyn TokenEstimator>,
}

impl ContextWindowBuilder {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            max_history_tokens: None,
            estimator: Arc::new(WordBasedEstimator::default()),
        }
    }

    /// Additionally cap the history by estimated token count
    pub fn with_token_limit(mut self, max_history_tokens: usize) -> Self {
        self.max_history_tokens = Some(max_history_tokens);
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Build the context for `new_user_text` on top of `history`
    pub fn build(
        &self,
        history: &[Turn],
        new_user_text: &str,
        urgent: bool,
    ) -> Vec<OutgoingMessage> {
        // Streaming, empty and app-written turns never go upstream
        let eligible: Vec<&Turn> = history
            .iter()
            .filter(|t| !t.streaming && !t.notice && !t.content.trim().is_empty())
            .collect();

        let start = eligible.len().saturating_sub(self.max_turns);
        let mut window = &eligible[start..];

        if let Some(limit) = self.max_history_tokens {
            let mut used: usize = window.iter().map(|t| self.estimator.estimate(&t.content)).sum();
            while used > limit && !window.is_empty() {
                used -= self.estimator.estimate(&window[0].content);
                window = &window[1..];
            }
        }

        let mut messages: Vec<OutgoingMessage> =
            window.iter().map(|t| OutgoingMessage::from(*t)).collect();

        let content = if urgent {
            format!("{}{}", URGENCY_PREAMBLE, new_user_text)
        } else {
            new_user_text.to_string()
        };
        messages.push(OutgoingMessage::new(Role::User, content));

        debug!(
            "Built context window: {} of {} history turns, urgent={}",
            messages.len() - 1,
            history.len(),
            urgent
        );

        messages
    }
}

impl Default for ContextWindowBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}

/// Build a context window with the default cap
pub fn build_context(
    history: &[Turn],
    new_user_text: &str,
    urgent: bool,
) -> Vec<OutgoingMessage> {
    ContextWindowBuilder::default().build(history, new_user_text, urgent)
}
