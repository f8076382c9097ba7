//! Event loop that owns the conversation state

use super::traits::{Clock, StateStore};
use super::WidgetEvent;

use crate::dialog::{DialogClient, DialogRequest, UserIdentity};
use crate::state_machine::{
    transition, ConvContext, ConversationState, Effect, Event, TransitionError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Outcome reported back to the caller of an intent
pub type Ack = oneshot::Sender<Result<(), TransitionError>>;

/// An event on its way into the loop
///
/// Intents from a handle carry an ack that is answered once the transition
/// and its effects (including the store write) are done. Follow-ups posted
/// by the runtime itself carry none.
#[derive(Debug)]
pub struct Envelope {
    pub(crate) event: Event,
    pub(crate) ack: Option<Ack>,
}

impl Envelope {
    pub(crate) fn intent(event: Event) -> (Self, oneshot::Receiver<Result<(), TransitionError>>) {
        let (tx, rx) = oneshot::channel();
        let envelope = Self {
            event,
            ack: Some(tx),
        };
        (envelope, rx)
    }

    pub(crate) fn follow_up(event: Event) -> Self {
        Self { event, ack: None }
    }
}

/// Generic conversation runtime that can work with any storage, dialog and clock
pub struct ConversationRuntime<S, D, C>
where
    S: StateStore + 'static,
    D: DialogClient + 'static,
    C: Clock + 'static,
{
    context: ConvContext,
    state: ConversationState,
    storage: S,
    dialog: Arc<D>,
    clock: C,
    identity: UserIdentity,
    event_rx: mpsc::Receiver<Envelope>,
    /// Weak so that dropping every handle stops the loop
    event_tx: mpsc::WeakSender<Envelope>,
    broadcast_tx: broadcast::Sender<WidgetEvent>,
    /// Token shared by every scheduled follow-up; replaced on reset
    follow_ups: CancellationToken,
}

impl<S, D, C> ConversationRuntime<S, D, C>
where
    S: StateStore + 'static,
    D: DialogClient + 'static,
    C: Clock + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: ConvContext,
        state: ConversationState,
        storage: S,
        dialog: D,
        clock: C,
        identity: UserIdentity,
        event_rx: mpsc::Receiver<Envelope>,
        event_tx: &mpsc::Sender<Envelope>,
        broadcast_tx: broadcast::Sender<WidgetEvent>,
    ) -> Self {
        Self {
            context,
            state,
            storage,
            dialog: Arc::new(dialog),
            clock,
            identity,
            event_rx,
            event_tx: event_tx.downgrade(),
            broadcast_tx,
            follow_ups: CancellationToken::new(),
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            messages = self.state.messages.len(),
            generation = self.state.generation,
            "Starting conversation runtime"
        );
        self.notify();

        // Process events one at a time: a transition and its effects finish
        // before the caller is answered and the next intent is looked at
        while let Some(Envelope { event, ack }) = self.event_rx.recv().await {
            let outcome = self.process_event(event).await;
            if let Err(e) = &outcome {
                tracing::warn!(error = %e, "Event rejected");
            }
            if let Some(ack) = ack {
                // The caller may have stopped waiting
                let _ = ack.send(outcome);
            }
        }

        self.follow_ups.cancel();
        tracing::info!("Conversation runtime stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<(), TransitionError> {
        let kind = event.kind();
        let now = self.clock.display_time();

        let result = match transition(&self.state, &self.context, event, &now) {
            Ok(r) => r,
            Err(TransitionError::Stale(reason)) => {
                tracing::debug!(event = kind, %reason, "Ignoring stale event");
                return Ok(());
            }
            Err(e) => {
                // Rejections are user-facing (e.g. "reply pending")
                let _ = self.broadcast_tx.send(WidgetEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        tracing::debug!(event = kind, effects = result.effects.len(), "Transition applied");
        self.state = result.new_state;

        for effect in result.effects {
            self.execute_effect(effect).await;
        }
        Ok(())
    }

    /// Execute an effect; failures are logged and reported, never fatal
    async fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::PersistState => {
                if let Err(e) = self.storage.save_state(&self.state).await {
                    tracing::warn!(error = %e, "Failed to persist conversation");
                    let _ = self.broadcast_tx.send(WidgetEvent::Error {
                        message: format!("Failed to save conversation: {e}"),
                    });
                }
            }

            Effect::PurgeStore => {
                if let Err(e) = self.storage.purge(&self.state).await {
                    tracing::warn!(error = %e, "Failed to purge conversation store");
                    let _ = self.broadcast_tx.send(WidgetEvent::Error {
                        message: format!("Failed to clear conversation: {e}"),
                    });
                }
            }

            Effect::RequestReply { request_id, text } => {
                let dialog = self.dialog.clone();
                let event_tx = self.event_tx.clone();
                let request = DialogRequest::for_identity(text, &self.identity);

                tokio::spawn(async move {
                    tracing::info!(
                        request_id = %request_id,
                        "Requesting dialog reply (background)"
                    );

                    let event = match dialog.send_request(&request).await {
                        Ok(reply) => Event::ReplyReceived { request_id, reply },
                        Err(e) => Event::ReplyFailed {
                            request_id,
                            message: e.message,
                        },
                    };
                    post(&event_tx, event).await;
                });
            }

            Effect::ScheduleReadReceipt {
                message_id,
                generation,
                delay,
            } => {
                self.schedule(
                    delay,
                    Event::MarkRead {
                        message_id,
                        generation,
                    },
                );
            }

            Effect::ScheduleFileAck { generation, delay } => {
                self.schedule(delay, Event::FileAcknowledged { generation });
            }

            Effect::CancelFollowUps => {
                tracing::info!("Cancelling scheduled follow-ups");
                self.follow_ups.cancel();
                self.follow_ups = CancellationToken::new();
            }

            Effect::NotifyClient => self.notify(),
        }
    }

    /// Post `event` back to the loop after `delay`, unless cancelled first
    fn schedule(&self, delay: Duration, event: Event) {
        let cancel = self.follow_ups.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::debug!(event = event.kind(), "Follow-up cancelled");
                }

                () = tokio::time::sleep(delay) => {
                    post(&event_tx, event).await;
                }
            }
        });
    }

    fn notify(&self) {
        // No subscribers is fine
        let _ = self.broadcast_tx.send(WidgetEvent::StateChanged {
            state: self.state.clone(),
        });
    }
}

/// Send a follow-up to the loop if it is still running
async fn post(event_tx: &mpsc::WeakSender<Envelope>, event: Event) {
    let Some(tx) = event_tx.upgrade() else {
        tracing::debug!(event = event.kind(), "Runtime gone, dropping event");
        return;
    };
    if tx.send(Envelope::follow_up(event)).await.is_err() {
        tracing::debug!("Runtime stopped before event was delivered");
    }
}
