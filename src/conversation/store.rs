//! Ordered, append-only transcript store
//!
//! Insertion order is transcript order. Every mutation is addressed by
//! [`TurnId`], never by position, so a retired turn cannot be hit by a stale
//! positional reference after a reset.

use super::models::{Turn, TurnId};
use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

/// Conversation store errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Turn not found: {0}")]
    NotFound(TurnId),

    #[error("Turn {0} is not streaming")]
    NotStreaming(TurnId),

    #[error("Turn {existing} is already streaming")]
    StreamingTurnExists { existing: TurnId },

    #[error("Turn {0} already exists")]
    DuplicateId(TurnId),
}

/// Transcript owned by a single session
#[derive(Debug, Default)]
pub struct ConversationStore {
    turns: IndexMap<TurnId, Turn>,
    next_sequence: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding a single seed turn
    pub fn with_seed(seed: Turn) -> Self {
        let mut store = Self::new();
        store.reset(Some(seed));
        store
    }

    /// Append a turn at the end and assign its sequence
    pub fn append(&mut self, mut turn: Turn) -> Result<TurnId, StoreError> {
        if self.turns.contains_key(&turn.id) {
            return Err(StoreError::DuplicateId(turn.id));
        }
        if turn.streaming {
            if let Some(existing) = self.streaming_turn() {
                return Err(StoreError::StreamingTurnExists { existing: existing.id });
            }
        }

        turn.sequence = self.next_sequence;
        self.next_sequence += 1;

        let id = turn.id;
        debug!("Appending {} turn {} at sequence {}", turn.role.as_str(), id, turn.sequence);
        self.turns.insert(id, turn);
        Ok(id)
    }

    /// Concatenate `text` to a streaming turn
    pub fn append_chunk(&mut self, id: TurnId, text: &str) -> Result<(), StoreError> {
        let turn = self.streaming_mut(id)?;
        turn.content.push_str(text);
        Ok(())
    }

    /// Mark a streaming turn as final
    pub fn finalize(&mut self, id: TurnId) -> Result<(), StoreError> {
        let turn = self.streaming_mut(id)?;
        turn.streaming = false;
        Ok(())
    }

    /// Substitute the text of a streaming turn and finalize it
    ///
    /// Id, sequence and role stay as they were. Finalized turns cannot be
    /// replaced.
    pub fn replace(&mut self, id: TurnId, replacement: Turn) -> Result<(), StoreError> {
        let turn = self.streaming_mut(id)?;
        turn.content = replacement.content;
        turn.is_emergency = replacement.is_emergency;
        turn.notice = replacement.notice;
        turn.streaming = false;
        Ok(())
    }

    /// Empty the store, optionally installing one seed turn
    ///
    /// Sequence numbers keep increasing across resets.
    pub fn reset(&mut self, seed: Option<Turn>) {
        self.turns.clear();
        if let Some(mut seed) = seed {
            seed.streaming = false;
            seed.sequence = self.next_sequence;
            self.next_sequence += 1;
            self.turns.insert(seed.id, seed);
        }
    }

    /// Copy of the transcript in order
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.values().cloned().collect()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.values()
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.get(&id)
    }

    /// The turn currently receiving chunks, if any
    pub fn streaming_turn(&self) -> Option<&Turn> {
        self.turns.values().find(|t| t.streaming)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn streaming_mut(&mut self, id: TurnId) -> Result<&mut Turn, StoreError> {
        let turn = self.turns.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !turn.streaming {
            return Err(StoreError::NotStreaming(id));
        }
        Ok(turn)
    }
}
