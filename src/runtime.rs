//! Runtime for a single embedded conversation
//!
//! One task owns the state; handles post intents and subscribe to updates.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{Ack, ConversationRuntime, Envelope};
pub use traits::*;

use crate::attachment::{AttachmentError, AttachmentPolicy, FileRef};
use crate::dialog::{HttpDialogClient, LoggingDialogClient, UserIdentity};
use crate::state_machine::{
    ConvContext, ConversationState, Event, ScenarioPrompt, TransitionError,
};
use crate::store::SqliteKvStore;
use std::path::Path;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime = ConversationRuntime<
    KvStateStore<SqliteKvStore>,
    LoggingDialogClient<HttpDialogClient>,
    SystemClock,
>;

/// Events sent to the presentation layer
#[derive(Debug, Clone)]
pub enum WidgetEvent {
    StateChanged { state: ConversationState },
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum WidgetError {
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    /// The runtime refused the intent (e.g. a reply is still pending)
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    #[error("Widget runtime has stopped")]
    Closed,
}

/// Handle to interact with a running conversation
///
/// Cloneable; the runtime stops once every handle is dropped. Each intent
/// resolves after the runtime has applied it and written the store.
#[derive(Clone)]
pub struct WidgetHandle {
    event_tx: mpsc::Sender<Envelope>,
    broadcast_tx: broadcast::Sender<WidgetEvent>,
    policy: AttachmentPolicy,
}

impl WidgetHandle {
    /// Subscribe to state updates and non-fatal errors
    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.broadcast_tx.subscribe()
    }

    pub async fn compose_text(&self, text: impl Into<String>) -> Result<(), WidgetError> {
        self.post(Event::ComposeText { text: text.into() }).await
    }

    /// Attach a file, replacing any previous one
    pub async fn attach_file(&self, file: FileRef) -> Result<(), WidgetError> {
        self.policy.check(&file)?;
        self.post(Event::AttachFile { file }).await
    }

    pub async fn attach_path(&self, path: impl AsRef<Path>) -> Result<(), WidgetError> {
        let file = FileRef::from_path(path)?;
        self.attach_file(file).await
    }

    /// Drag-and-drop: only the first file is kept
    pub async fn attach_dropped(&self, files: Vec<FileRef>) -> Result<(), WidgetError> {
        let file = self.policy.pick_dropped(files)?;
        self.post(Event::AttachFile { file }).await
    }

    pub async fn remove_attachment(&self) -> Result<(), WidgetError> {
        self.post(Event::RemoveAttachment).await
    }

    /// Send the attachment if there is one, else the draft text
    pub async fn send(&self) -> Result<(), WidgetError> {
        self.post(Event::Send {
            request_id: uuid::Uuid::new_v4().to_string(),
        })
        .await
    }

    pub async fn select_prompt(&self, prompt: ScenarioPrompt) -> Result<(), WidgetError> {
        self.post(Event::SelectPrompt { prompt }).await
    }

    async fn post(&self, event: Event) -> Result<(), WidgetError> {
        let (envelope, ack) = Envelope::intent(event);
        self.event_tx
            .send(envelope)
            .await
            .map_err(|_| WidgetError::Closed)?;
        let outcome = ack.await.map_err(|_| WidgetError::Closed)?;
        Ok(outcome?)
    }
}

/// Collaborators and tunables for one widget instance
pub struct WidgetParts<S, D, C> {
    pub context: ConvContext,
    pub storage: S,
    pub dialog: D,
    pub clock: C,
    pub identity: UserIdentity,
    pub policy: AttachmentPolicy,
}

/// Load the persisted conversation and spawn its runtime
///
/// The returned receiver is subscribed before the runtime starts, so it
/// always observes the initial `StateChanged`.
pub async fn start<S, D, C>(
    parts: WidgetParts<S, D, C>,
) -> (WidgetHandle, broadcast::Receiver<WidgetEvent>)
where
    S: StateStore + 'static,
    D: crate::dialog::DialogClient + 'static,
    C: Clock + 'static,
{
    let WidgetParts {
        context,
        storage,
        dialog,
        clock,
        identity,
        policy,
    } = parts;

    let outcome = storage.load_state(&clock.display_time()).await;
    for warning in &outcome.warnings {
        tracing::warn!(source = ?outcome.source, %warning, "Recovered from bad persisted field");
    }
    tracing::info!(
        source = ?outcome.source,
        messages = outcome.state.messages.len(),
        "Loaded conversation"
    );

    let (event_tx, event_rx) = mpsc::channel(32);
    let (broadcast_tx, events) = broadcast::channel(128);

    let runtime = ConversationRuntime::new(
        context,
        outcome.state,
        storage,
        dialog,
        clock,
        identity,
        event_rx,
        &event_tx,
        broadcast_tx.clone(),
    );

    tokio::spawn(async move {
        runtime.run().await;
    });

    let handle = WidgetHandle {
        event_tx,
        broadcast_tx,
        policy,
    };
    (handle, events)
}
