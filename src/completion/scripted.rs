//! In-memory completion service driven by the caller
//!
//! Each queued response is either a stream the caller feeds through a
//! [`ScriptedStream`] or an immediate failure. Useful for tests and for running
//! a session without network access.

use super::{ChunkStream, CompletionError, CompletionParams, CompletionService, StreamItem};
use crate::conversation::OutgoingMessage;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

type ItemSender = mpsc::UnboundedSender<Result<StreamItem, CompletionError>>;
type ItemReceiver = mpsc::UnboundedReceiver<Result<StreamItem, CompletionError>>;

enum Script {
    Stream(ItemReceiver),
    Fail(CompletionError),
}

/// A request as received by the scripted service
#[derive(Debug, Clone)]
pub struct ScriptedRequest {
    pub system_prompt: String,
    pub messages: Vec<OutgoingMessage>,
    pub params: CompletionParams,
}

/// Feeds one scripted answer stream
///
/// Items can be pushed before the stream is opened; they are buffered. Sends
/// report `false` once the consumer has gone away.
#[derive(Debug, Clone)]
pub struct ScriptedStream {
    tx: ItemSender,
}

impl ScriptedStream {
    pub fn chunk(&self, text: impl Into<String>) -> bool {
        self.tx.unbounded_send(Ok(StreamItem::Delta(text.into()))).is_ok()
    }

    pub fn finish(&self) -> bool {
        self.tx.unbounded_send(Ok(StreamItem::Done)).is_ok()
    }

    pub fn fail(&self, error: CompletionError) -> bool {
        self.tx.unbounded_send(Err(error)).is_ok()
    }

    /// End the stream without the explicit end-of-stream item
    pub fn close(self) {
        self.tx.close_channel();
    }
}

/// Completion service answering from a queue of scripts
#[derive(Default)]
pub struct ScriptedCompletionService {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ScriptedRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a stream for the next `open_stream` call
    pub fn push_stream(&self) -> ScriptedStream {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.scripts).push_back(Script::Stream(rx));
        ScriptedStream { tx }
    }

    /// Queue an open failure for the next `open_stream` call
    pub fn push_failure(&self, error: CompletionError) {
        lock(&self.scripts).push_back(Script::Fail(error));
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<ScriptedRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletionService {
    async fn open_stream(
        &self,
        system_prompt: &str,
        messages: &[OutgoingMessage],
        params: &CompletionParams,
    ) -> Result<ChunkStream, CompletionError> {
        lock(&self.requests).push(ScriptedRequest {
            system_prompt: system_prompt.to_string(),
            messages: messages.to_vec(),
            params: *params,
        });

        let script = lock(&self.scripts).pop_front();
        match script {
            Some(Script::Stream(rx)) => Ok(rx.boxed()),
            Some(Script::Fail(error)) => Err(error),
            None => Err(CompletionError::NotConfigured(
                "no scripted response queued".to_string(),
            )),
        }
    }
}
