//! Session controller
//!
//! A [`ChatSession`] owns the transcript, accepts submissions one at a time and
//! folds stream events into the store.

pub mod chat_session;

pub use chat_session::{
    ChatSession, RejectReason, SessionEvent, StreamEnvelope, StreamEvent, SubmitOutcome,
};
