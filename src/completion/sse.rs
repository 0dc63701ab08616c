//! Server-sent event decoding for OpenAI-compatible chat completion streams

use super::{ChunkStream, CompletionError, StreamItem};
use eventsource_stream::Event;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Display;
use tracing::{trace, warn};

/// End-of-stream sentinel sent as the final `data:` payload
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

fn extract_api_error(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".to_string())
}

/// Decode one `data:` payload
///
/// Returns `Ok(None)` for events that carry no text (role-only deltas,
/// keepalives, usage frames).
pub fn parse_event_data(data: &str) -> Result<Option<StreamItem>, CompletionError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == DONE_SENTINEL {
        return Ok(Some(StreamItem::Done));
    }

    let value: Value = serde_json::from_str(data)
        .map_err(|e| CompletionError::MalformedStream(format!("{}, data: {}", e, data)))?;

    if let Some(message) = extract_api_error(&value) {
        return Err(CompletionError::StreamError(message));
    }

    let payload: ChunkPayload = serde_json::from_value(value)
        .map_err(|e| CompletionError::MalformedStream(format!("{}, data: {}", e, data)))?;

    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty());

    Ok(content.map(StreamItem::Delta))
}

/// Turn a parsed event stream into a [`ChunkStream`]
///
/// The resulting stream ends after `Done` or the first error. A body that
/// closes before the sentinel yields `MalformedStream`.
pub fn into_chunk_stream<S, E>(events: S) -> ChunkStream
where
    S: Stream<Item = Result<Event, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    futures::stream::unfold((events, false), |(mut events, finished)| async move {
        if finished {
            return None;
        }
        loop {
            let event = match events.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    warn!("SSE transport error: {}", e);
                    let err = CompletionError::RequestFailed(format!("SSE stream error: {}", e));
                    return Some((Err(err), (events, true)));
                }
                None => {
                    let err = CompletionError::MalformedStream(
                        "stream closed before completion".to_string(),
                    );
                    return Some((Err(err), (events, true)));
                }
            };

            trace!("SSE event: {:?}", event.data);
            match parse_event_data(&event.data) {
                Ok(Some(StreamItem::Done)) => return Some((Ok(StreamItem::Done), (events, true))),
                Ok(Some(item)) => return Some((Ok(item), (events, false))),
                Ok(None) => continue,
                Err(e) => return Some((Err(e), (events, true))),
            }
        }
    })
    .boxed()
}
