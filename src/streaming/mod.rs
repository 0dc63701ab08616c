//! Streaming ingestion
//!
//! Owns the lifecycle of one outstanding request/response stream and reports
//! chunks, completion and errors to a [`StreamObserver`].

pub mod controller;

pub use controller::{IngestionController, StreamHandle};

/// Lifecycle of a single answer stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Idle = 0,
    Opening = 1,
    Streaming = 2,
    Done = 3,
    Errored = 4,
    Aborted = 5,
}

impl StreamState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Opening,
            2 => StreamState::Streaming,
            3 => StreamState::Done,
            4 => StreamState::Errored,
            5 => StreamState::Aborted,
            _ => StreamState::Idle,
        }
    }

    /// No further callbacks can follow a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamState::Done | StreamState::Errored | StreamState::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::Opening => "opening",
            StreamState::Streaming => "streaming",
            StreamState::Done => "done",
            StreamState::Errored => "errored",
            StreamState::Aborted => "aborted",
        }
    }
}

/// Receives the events of one answer stream
///
/// Callbacks run on the stream task and must not block.
pub trait StreamObserver: Send + Sync {
    fn on_chunk(&self, text: &str);
    fn on_done(&self);
    fn on_error(&self, message: &str);
}
