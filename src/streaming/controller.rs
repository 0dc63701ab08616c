//! Ingestion controller and stream handles

use super::{StreamObserver, StreamState};
use crate::completion::{CompletionService, PromptProfile, StreamItem};
use crate::conversation::OutgoingMessage;
use crate::metrics::METRICS;
use futures::StreamExt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// State shared between a handle and its stream task
///
/// Every observer callback runs while holding `gate`. Once the gate is closed
/// nothing more is delivered, so a closed gate is the single source of truth
/// for "this stream is over".
struct StreamShared {
    gate: Mutex<bool>,
    state: AtomicU8,
    started_at: Instant,
}

impl StreamShared {
    fn new() -> Self {
        Self {
            gate: Mutex::new(true),
            state: AtomicU8::new(StreamState::Opening as u8),
            started_at: Instant::now(),
        }
    }

    fn gate(&self) -> MutexGuard<'_, bool> {
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move to `Streaming` unless the stream is already over
    fn mark_streaming(&self) -> bool {
        let open = self.gate();
        if !*open {
            return false;
        }
        self.set_state(StreamState::Streaming);
        true
    }

    /// Run a non-terminal callback if the gate is still open
    fn deliver(&self, callback: impl FnOnce()) -> bool {
        let open = self.gate();
        if !*open {
            return false;
        }
        self.set_state(StreamState::Streaming);
        callback();
        true
    }

    /// Close the gate with a terminal state, running `callback` first
    ///
    /// Returns false if the stream had already terminated.
    fn terminate(&self, state: StreamState, callback: impl FnOnce()) -> bool {
        let mut open = self.gate();
        if !*open {
            return false;
        }
        *open = false;
        self.set_state(state);
        callback();
        drop(open);

        METRICS.streams.with_label_values(&[state.as_str()]).inc();
        METRICS
            .stream_duration
            .observe(self.started_at.elapsed().as_secs_f64());
        true
    }
}

/// Handle to one running answer stream
///
/// Dropping the handle detaches the stream; call [`StreamHandle::abort`] to
/// stop it.
pub struct StreamHandle {
    shared: Arc<StreamShared>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Stop the stream
    ///
    /// No observer callback runs after this returns. Aborting a stream that
    /// already reached a terminal state only leaves that state in place.
    pub fn abort(&self) {
        let aborted = self.shared.terminate(StreamState::Aborted, || {});
        self.task.abort();
        if aborted {
            debug!("Stream aborted");
        }
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// Starts answer streams against a completion service
#[derive(Clone)]
pub struct IngestionController {
    service: Arc<dyn CompletionService>,
    profile: PromptProfile,
}

impl IngestionController {
    pub fn new(service: Arc<dyn CompletionService>, profile: PromptProfile) -> Self {
        Self { service, profile }
    }

    /// Open a stream for `context` on a new tokio task
    ///
    /// `urgent` selects the emergency persona and the larger token budget.
    /// Must be called from within a tokio runtime.
    pub fn start(
        &self,
        context: Vec<OutgoingMessage>,
        urgent: bool,
        observer: Arc<dyn StreamObserver>,
    ) -> StreamHandle {
        let shared = Arc::new(StreamShared::new());
        let task = tokio::spawn(run_stream(
            Arc::clone(&self.service),
            self.profile.clone(),
            context,
            urgent,
            Arc::clone(&shared),
            observer,
        ));
        StreamHandle { shared, task }
    }
}

async fn run_stream(
    service: Arc<dyn CompletionService>,
    profile: PromptProfile,
    context: Vec<OutgoingMessage>,
    urgent: bool,
    shared: Arc<StreamShared>,
    observer: Arc<dyn StreamObserver>,
) {
    let system_prompt = profile.system_prompt(urgent);
    let params = profile.params(urgent);

    let mut stream = match service.open_stream(&system_prompt, &context, &params).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to open answer stream: {}", e);
            let message = e.to_string();
            shared.terminate(StreamState::Errored, || observer.on_error(&message));
            return;
        }
    };

    if !shared.mark_streaming() {
        return;
    }

    let mut chunks = 0usize;
    while let Some(item) = stream.next().await {
        match item {
            Ok(StreamItem::Delta(text)) => {
                if text.is_empty() {
                    continue;
                }
                if !shared.deliver(|| observer.on_chunk(&text)) {
                    return;
                }
                chunks += 1;
                METRICS.stream_chunks.inc();
            }
            Ok(StreamItem::Done) => break,
            Err(e) => {
                warn!("Answer stream failed after {} chunks: {}", chunks, e);
                let message = e.to_string();
                shared.terminate(StreamState::Errored, || observer.on_error(&message));
                return;
            }
        }
    }

    if shared.terminate(StreamState::Done, || observer.on_done()) {
        info!(
            "Answer stream completed: chunks={}, elapsed_ms={}",
            chunks,
            shared.started_at.elapsed().as_millis()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionError, ScriptedCompletionService, EMERGENCY_PERSONA};
    use crate::conversation::Role;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Chunk(String),
        Done,
        Error(String),
    }

    struct Recorder {
        tx: mpsc::UnboundedSender<Seen>,
    }

    impl StreamObserver for Recorder {
        fn on_chunk(&self, text: &str) {
            let _ = self.tx.send(Seen::Chunk(text.to_string()));
        }

        fn on_done(&self) {
            let _ = self.tx.send(Seen::Done);
        }

        fn on_error(&self, message: &str) {
            let _ = self.tx.send(Seen::Error(message.to_string()));
        }
    }

    fn setup() -> (
        Arc<ScriptedCompletionService>,
        IngestionController,
        Arc<Recorder>,
        mpsc::UnboundedReceiver<Seen>,
    ) {
        let service = Arc::new(ScriptedCompletionService::new());
        let controller = IngestionController::new(service.clone(), PromptProfile::default());
        let (tx, rx) = mpsc::unbounded_channel();
        (service, controller, Arc::new(Recorder { tx }), rx)
    }

    fn context() -> Vec<OutgoingMessage> {
        vec![OutgoingMessage::new(Role::User, "Can I donate platelets?")]
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_chunks_then_done() {
        let (service, controller, recorder, mut rx) = setup();
        let script = service.push_stream();
        script.chunk("Yes, ");
        script.chunk("");
        script.chunk("every two weeks.");
        script.finish();

        let handle = controller.start(context(), false, recorder);

        assert_eq!(rx.recv().await, Some(Seen::Chunk("Yes, ".into())));
        assert_eq!(rx.recv().await, Some(Seen::Chunk("every two weeks.".into())));
        assert_eq!(rx.recv().await, Some(Seen::Done));
        settle().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.state(), StreamState::Done);
    }

    #[tokio::test]
    async fn test_stream_end_without_done_item_completes() {
        let (service, controller, recorder, mut rx) = setup();
        let script = service.push_stream();
        script.chunk("partial");
        script.close();

        let handle = controller.start(context(), false, recorder);

        assert_eq!(rx.recv().await, Some(Seen::Chunk("partial".into())));
        assert_eq!(rx.recv().await, Some(Seen::Done));
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_open_failure_reports_error() {
        let (service, controller, recorder, mut rx) = setup();
        service.push_failure(CompletionError::Upstream {
            status: 500,
            body: "down".into(),
        });

        let handle = controller.start(context(), false, recorder);

        assert!(matches!(rx.recv().await, Some(Seen::Error(_))));
        settle().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.state(), StreamState::Errored);
    }

    #[tokio::test]
    async fn test_error_mid_stream_is_single_terminal() {
        let (service, controller, recorder, mut rx) = setup();
        let script = service.push_stream();
        script.chunk("Platelets ");
        script.fail(CompletionError::MalformedStream("bad json".into()));
        script.chunk("ignored");
        script.finish();

        let handle = controller.start(context(), false, recorder);

        assert_eq!(rx.recv().await, Some(Seen::Chunk("Platelets ".into())));
        assert!(matches!(rx.recv().await, Some(Seen::Error(_))));
        settle().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.state(), StreamState::Errored);
    }

    #[tokio::test]
    async fn test_no_callbacks_after_abort() {
        let (service, controller, recorder, mut rx) = setup();
        let script = service.push_stream();
        script.chunk("first");

        let handle = controller.start(context(), false, recorder);
        assert_eq!(rx.recv().await, Some(Seen::Chunk("first".into())));

        handle.abort();
        assert_eq!(handle.state(), StreamState::Aborted);

        script.chunk("late one");
        script.chunk("late two");
        script.finish();
        settle().await;

        assert!(rx.try_recv().is_err());
        assert_eq!(handle.state(), StreamState::Aborted);
    }

    #[tokio::test]
    async fn test_abort_after_done_keeps_done() {
        let (service, controller, recorder, mut rx) = setup();
        let script = service.push_stream();
        script.finish();

        let handle = controller.start(context(), false, recorder);
        assert_eq!(rx.recv().await, Some(Seen::Done));

        handle.abort();
        assert_eq!(handle.state(), StreamState::Done);
    }

    #[tokio::test]
    async fn test_urgent_stream_uses_emergency_profile() {
        let (service, controller, recorder, mut rx) = setup();
        service.push_stream().finish();

        controller.start(context(), true, recorder);
        assert_eq!(rx.recv().await, Some(Seen::Done));

        let requests = service.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].params.urgent);
        assert_eq!(requests[0].params.max_tokens, 3072);
        assert!(requests[0].system_prompt.ends_with(EMERGENCY_PERSONA));
        assert_eq!(requests[0].messages, context());
    }
}
