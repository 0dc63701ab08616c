//! LifeForge companion: streaming conversational assistant core
//!
//! A user question flows through the urgency classifier, the context window
//! builder and the ingestion controller; streamed chunks land in the
//! conversation store owned by a [`session::ChatSession`].
//!
//! ```no_run
//! use lifeforge_companion::prelude::*;
//!
//! # async fn demo() -> lifeforge_companion::error::Result<()> {
//! let config = Config::load()?;
//! let mut session = ChatSession::connect(&config)?;
//! session.submit("Is it safe to donate platelets every two weeks?");
//! for event in session.run_until_idle().await {
//!     if let SessionEvent::Chunk { text, .. } = event {
//!         print!("{}", text);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod config;
pub mod conversation;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod session;
pub mod streaming;

pub mod prelude {
    pub use crate::completion::{
        ChatCompletionsClient, CompletionError, CompletionParams, CompletionService,
        PromptProfile, ScriptedCompletionService, StreamItem,
    };
    pub use crate::config::Config;
    pub use crate::conversation::{
        build_context, classify, ContextWindowBuilder, ConversationStore, OutgoingMessage, Role,
        Turn, TurnId, UrgencyClassifier,
    };
    pub use crate::error::{CompanionError, Result};
    pub use crate::session::{ChatSession, RejectReason, SessionEvent, SubmitOutcome};
    pub use crate::streaming::{IngestionController, StreamHandle, StreamObserver, StreamState};
}
