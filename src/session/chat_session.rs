use crate::completion::{ChatCompletionsClient, CompletionService, PromptProfile};
use crate::config::{Config, ConversationConfig, TokenizerKind};
use crate::conversation::{
    ContextWindowBuilder, ConversationStore, OutgoingMessage, TiktokenEstimator, Turn, TurnId,
    UrgencyClassifier,
};
use crate::error::Result;
use crate::metrics::METRICS;
use crate::streaming::{IngestionController, StreamHandle, StreamObserver};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of a submission attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted {
        user_turn: TurnId,
        assistant_turn: TurnId,
        urgent: bool,
    },
    Rejected(RejectReason),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// An answer is still streaming
    Busy,
    /// Nothing left after trimming
    EmptyInput,
}

/// A stream event as applied to the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Chunk { turn_id: TurnId, text: String },
    Completed { turn_id: TurnId },
    /// The answer failed and was replaced by the fallback text
    Failed { turn_id: TurnId, error: String },
}

/// Observer callback payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    Error(String),
}

/// An observer callback tagged with the request it belongs to
#[derive(Debug, Clone)]
pub struct StreamEnvelope {
    pub generation: u64,
    pub turn_id: TurnId,
    pub event: StreamEvent,
}

/// Forwards callbacks to the owning session's channel
struct ChannelObserver {
    generation: u64,
    turn_id: TurnId,
    tx: mpsc::UnboundedSender<StreamEnvelope>,
}

impl ChannelObserver {
    fn forward(&self, event: StreamEvent) {
        let envelope = StreamEnvelope {
            generation: self.generation,
            turn_id: self.turn_id,
            event,
        };
        if self.tx.send(envelope).is_err() {
            debug!("Session gone, dropping stream event for turn {}", self.turn_id);
        }
    }
}

impl StreamObserver for ChannelObserver {
    fn on_chunk(&self, text: &str) {
        self.forward(StreamEvent::Chunk(text.to_string()));
    }

    fn on_done(&self) {
        self.forward(StreamEvent::Done);
    }

    fn on_error(&self, message: &str) {
        self.forward(StreamEvent::Error(message.to_string()));
    }
}

/// The live in-flight request
struct PendingRequest {
    generation: u64,
    turn_id: TurnId,
    urgent: bool,
    context: Vec<OutgoingMessage>,
    handle: StreamHandle,
    started_at: Instant,
}

/// One conversation with the assistant
///
/// All transitions happen through `&mut self`; the only concurrency is the
/// stream task feeding the event channel.
pub struct ChatSession {
    store: ConversationStore,
    classifier: UrgencyClassifier,
    context_builder: ContextWindowBuilder,
    controller: IngestionController,
    texts: ConversationConfig,
    pending: Option<PendingRequest>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<StreamEnvelope>,
    events_rx: mpsc::UnboundedReceiver<StreamEnvelope>,
}

impl ChatSession {
    pub fn new(config: &Config, service: Arc<dyn CompletionService>) -> Self {
        let conversation = &config.conversation;

        let mut context_builder = ContextWindowBuilder::new(conversation.history_window);
        if let Some(limit) = conversation.max_history_tokens {
            context_builder = context_builder.with_token_limit(limit);
            if conversation.tokenizer == TokenizerKind::Tiktoken {
                match TiktokenEstimator::new() {
                    Ok(estimator) => {
                        context_builder = context_builder.with_estimator(Arc::new(estimator));
                    }
                    Err(e) => warn!("Falling back to word-based token estimates: {}", e),
                }
            }
        }

        let controller =
            IngestionController::new(service, PromptProfile::from_config(&config.completion));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            store: ConversationStore::with_seed(Turn::notice(
                conversation.welcome_message.clone(),
                false,
            )),
            classifier: UrgencyClassifier::new(&conversation.urgency_terms),
            context_builder,
            controller,
            texts: conversation.clone(),
            pending: None,
            generation: 0,
            events_tx,
            events_rx,
        }
    }

    /// Session backed by the HTTP completion client
    pub fn connect(config: &Config) -> Result<Self> {
        let client = ChatCompletionsClient::new(config.completion.clone())?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Submit a user question
    ///
    /// Rejected without side effects while an answer is streaming or when the
    /// text is blank.
    pub fn submit(&mut self, text: &str) -> SubmitOutcome {
        let text = text.trim();
        if text.is_empty() {
            debug!("Rejecting empty submission");
            METRICS.submissions.with_label_values(&["empty"]).inc();
            return SubmitOutcome::Rejected(RejectReason::EmptyInput);
        }
        if self.is_busy() {
            debug!("Rejecting submission while an answer is streaming");
            METRICS.submissions.with_label_values(&["busy"]).inc();
            return SubmitOutcome::Rejected(RejectReason::Busy);
        }

        let urgent = self.classifier.classify(text);
        let context = self
            .context_builder
            .build(&self.store.snapshot(), text, urgent);

        let user_turn = match self.store.append(Turn::user(text, urgent)) {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to record user turn: {}", e);
                return SubmitOutcome::Rejected(RejectReason::Busy);
            }
        };
        let assistant_turn = match self.store.append(Turn::assistant_streaming(urgent)) {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to open assistant turn: {}", e);
                return SubmitOutcome::Rejected(RejectReason::Busy);
            }
        };

        self.generation += 1;
        let observer = Arc::new(ChannelObserver {
            generation: self.generation,
            turn_id: assistant_turn,
            tx: self.events_tx.clone(),
        });
        let handle = self.controller.start(context.clone(), urgent, observer);

        info!(
            "Accepted submission: generation={}, chars={}, context_messages={}, urgent={}",
            self.generation,
            text.chars().count(),
            context.len(),
            urgent
        );
        METRICS.submissions.with_label_values(&["accepted"]).inc();
        if urgent {
            METRICS.urgent_submissions.inc();
        }

        self.pending = Some(PendingRequest {
            generation: self.generation,
            turn_id: assistant_turn,
            urgent,
            context,
            handle,
            started_at: Instant::now(),
        });

        SubmitOutcome::Accepted {
            user_turn,
            assistant_turn,
            urgent,
        }
    }

    /// Wait for the next event of the live answer and apply it
    ///
    /// Returns `None` when no answer is in flight.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        while self.pending.is_some() {
            let envelope = self.events_rx.recv().await?;
            if let Some(event) = self.apply(envelope) {
                return Some(event);
            }
        }
        None
    }

    /// Apply events until the live answer finishes
    pub async fn run_until_idle(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    /// Stop the live answer, keeping whatever text already arrived
    ///
    /// Returns false when nothing was in flight.
    pub fn cancel(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        pending.handle.abort();

        let received = self
            .store
            .get(pending.turn_id)
            .map(|turn| !turn.content.is_empty())
            .unwrap_or(false);

        let result = if received {
            self.store.finalize(pending.turn_id)
        } else {
            let stopped = Turn::notice(self.texts.stopped_message.clone(), pending.urgent);
            self.store.replace(pending.turn_id, stopped)
        };
        if let Err(e) = result {
            warn!("Failed to close cancelled turn {}: {}", pending.turn_id, e);
        }

        info!(
            "Cancelled answer: generation={}, elapsed_ms={}",
            pending.generation,
            pending.started_at.elapsed().as_millis()
        );
        true
    }

    /// Abort any live answer and start over from the welcome turn
    pub fn reset(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
            debug!("Reset aborted generation {}", pending.generation);
        }
        self.store.reset(Some(Turn::notice(
            self.texts.welcome_message.clone(),
            false,
        )));
        METRICS.resets.inc();
        info!("Conversation reset");
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.store.snapshot()
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some() || self.store.streaming_turn().is_some()
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Outgoing context of the live answer
    pub fn in_flight_context(&self) -> Option<&[OutgoingMessage]> {
        self.pending.as_ref().map(|p| p.context.as_slice())
    }

    fn apply(&mut self, envelope: StreamEnvelope) -> Option<SessionEvent> {
        let pending = self.pending.as_ref()?;
        if envelope.generation != pending.generation || envelope.turn_id != pending.turn_id {
            debug!(
                "Dropping event from retired generation {} (live: {})",
                envelope.generation, pending.generation
            );
            return None;
        }
        let turn_id = pending.turn_id;
        let urgent = pending.urgent;

        match envelope.event {
            StreamEvent::Chunk(text) => match self.store.append_chunk(turn_id, &text) {
                Ok(()) => Some(SessionEvent::Chunk { turn_id, text }),
                Err(e) => {
                    warn!("Dropping chunk for turn {}: {}", turn_id, e);
                    None
                }
            },
            StreamEvent::Done => {
                self.pending = None;
                let empty = self
                    .store
                    .get(turn_id)
                    .map(|turn| turn.content.trim().is_empty())
                    .unwrap_or(true);
                if empty {
                    return Some(self.fail(turn_id, urgent, "answer stream was empty".to_string()));
                }
                if let Err(e) = self.store.finalize(turn_id) {
                    warn!("Failed to finalize turn {}: {}", turn_id, e);
                }
                Some(SessionEvent::Completed { turn_id })
            }
            StreamEvent::Error(error) => {
                self.pending = None;
                Some(self.fail(turn_id, urgent, error))
            }
        }
    }

    fn fail(&mut self, turn_id: TurnId, urgent: bool, error: String) -> SessionEvent {
        warn!("Answer failed for turn {}: {}", turn_id, error);
        let fallback = Turn::notice(self.texts.fallback_for(urgent), urgent);
        if let Err(e) = self.store.replace(turn_id, fallback) {
            warn!("Failed to install fallback for turn {}: {}", turn_id, e);
        }
        SessionEvent::Failed { turn_id, error }
    }
}
