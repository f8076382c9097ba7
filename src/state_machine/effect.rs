//! Effects produced by state transitions

use std::time::Duration;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Mirror the new state into persistent storage
    PersistState,

    /// Erase every persisted key
    PurgeStore,

    /// Ask the dialog backend for a reply to `text`
    RequestReply { request_id: String, text: String },

    /// Post `MarkRead` for this message after `delay`
    ScheduleReadReceipt {
        message_id: u64,
        generation: u64,
        delay: Duration,
    },

    /// Post `FileAcknowledged` after `delay`
    ScheduleFileAck { generation: u64, delay: Duration },

    /// Drop every follow-up scheduled so far
    CancelFollowUps,

    /// Push the new state to presentation
    NotifyClient,
}

impl Effect {
    pub fn request_reply(request_id: impl Into<String>, text: impl Into<String>) -> Self {
        Effect::RequestReply {
            request_id: request_id.into(),
            text: text.into(),
        }
    }

    pub fn read_receipt(message_id: u64, generation: u64, delay: Duration) -> Self {
        Effect::ScheduleReadReceipt {
            message_id,
            generation,
            delay,
        }
    }

    /// Persist followed by a client notification, the tail of most transitions
    pub fn persist_and_notify() -> [Self; 2] {
        [Effect::PersistState, Effect::NotifyClient]
    }
}
